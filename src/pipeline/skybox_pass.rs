//! Skybox pass
//!
//! Draws the sky cube around the camera after lighting. The cube ignores
//! camera translation and is forced to the far plane, so the G-buffer depth
//! test only lets it through where no geometry was written.

use super::GBufferViews;
use crate::backend::*;
use crate::resources::{TextureCache, DEFAULT_TEXTURE};
use crate::scene::{Camera, Projection, SkyBox};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SkyboxUniformData {
    pub projection_view_model: Mat4,
    pub color: Vec4,
    /// x = has texture
    pub params: Vec4,
}

impl SkyboxUniformData {
    pub fn new(skybox: &SkyBox, camera: &Camera, projection: &Projection) -> Self {
        let mut view = camera.view_matrix();
        view.w_axis = Vec4::W;

        let material = skybox.model().materials().first();
        let color = material.map_or(Vec4::ONE, |m| m.diffuse);
        let textured = material.is_some_and(|m| m.texture.is_some());

        Self {
            projection_view_model: projection.matrix() * view * skybox.entity().model_matrix(),
            color,
            params: Vec4::new(if textured { 1.0 } else { 0.0 }, 0.0, 0.0, 0.0),
        }
    }
}

pub struct SkyboxPass {
    pipeline: RenderPipelineHandle,
    layout: BindGroupLayoutHandle,
    uniform_buffer: BufferHandle,
    sampler: SamplerHandle,
    depth_view: TextureViewHandle,
    /// Bind group and the texture key it was built for
    bound: Option<(BindGroupHandle, String)>,
}

impl SkyboxPass {
    pub fn new<B: GraphicsBackend>(backend: &mut B, gbuffer: &GBufferViews) -> BackendResult<Self> {
        let layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStageFlags::VERTEX_FRAGMENT,
                ty: BindingType::UniformBuffer,
            },
            BindGroupLayoutEntry {
                binding: 1,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: true },
                },
            },
            BindGroupLayoutEntry {
                binding: 2,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::Sampler { comparison: false },
            },
        ])?;

        let uniform_buffer = backend.create_buffer(&BufferDescriptor::uniform(
            "Skybox Uniforms",
            std::mem::size_of::<SkyboxUniformData>() as u64,
        ))?;
        let sampler = backend.create_sampler(&SamplerDescriptor {
            label: Some("Skybox Sampler".into()),
            ..Default::default()
        })?;

        let pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("Skybox Pipeline".into()),
            shader: SKYBOX_SHADER.to_string(),
            has_fragment_stage: true,
            vertex_layouts: vec![SkinnedVertex::layout()],
            bind_group_layouts: vec![layout],
            primitive_topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            // Seen from inside
            cull_mode: CullMode::None,
            depth_stencil: Some(DepthStencilState {
                format: TextureFormat::Depth32Float,
                depth_write_enabled: false,
                depth_compare: CompareFunction::LessEqual,
                depth_bias: 0,
                depth_bias_slope_scale: 0.0,
            }),
            color_targets: vec![ColorTargetState {
                format: backend.swapchain_format(),
                blend: None,
            }],
        })?;

        Ok(Self {
            pipeline,
            layout,
            uniform_buffer,
            sampler,
            depth_view: gbuffer.depth,
            bound: None,
        })
    }

    /// Point the depth test at a rebuilt G-buffer
    pub fn bind_depth(&mut self, gbuffer: &GBufferViews) {
        self.depth_view = gbuffer.depth;
    }

    /// Build the bind group for the skybox texture, once per texture
    pub fn prepare<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        skybox: &SkyBox,
        textures: &TextureCache,
    ) -> BackendResult<()> {
        let key = skybox
            .model()
            .materials()
            .first()
            .and_then(|m| m.texture.clone())
            .unwrap_or_else(|| DEFAULT_TEXTURE.to_string());
        if self.bound.as_ref().is_some_and(|(_, bound)| *bound == key) {
            return Ok(());
        }

        let view = textures
            .view_or(Some(&key), DEFAULT_TEXTURE)
            .ok_or_else(|| BackendError::TextureCreationFailed(format!("Skybox texture '{key}' not uploaded")))?;

        if let Some((old, _)) = self.bound.take() {
            backend.destroy_bind_group(old);
        }
        let bind_group = backend.create_bind_group(
            self.layout,
            &[
                (
                    0,
                    BindGroupEntry::Buffer {
                        buffer: self.uniform_buffer,
                        offset: 0,
                        size: None,
                    },
                ),
                (1, BindGroupEntry::Texture(view)),
                (2, BindGroupEntry::Sampler(self.sampler)),
            ],
        )?;
        self.bound = Some((bind_group, key));
        Ok(())
    }

    pub fn write_uniforms<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        skybox: &SkyBox,
        camera: &Camera,
        projection: &Projection,
    ) {
        let data = SkyboxUniformData::new(skybox, camera, projection);
        backend.write_buffer(self.uniform_buffer, 0, bytemuck::bytes_of(&data));
    }

    pub fn render<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        skybox: &SkyBox,
        target: TextureViewHandle,
        width: u32,
        height: u32,
    ) {
        let Some((bind_group, _)) = &self.bound else {
            return;
        };

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Skybox Pass".into()),
            color_attachments: vec![ColorAttachment {
                view: target,
                load_op: LoadOp::Load,
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: self.depth_view,
                depth_load_op: LoadOp::Load,
                depth_store_op: StoreOp::Store,
                depth_clear_value: 1.0,
            }),
        });
        backend.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
        backend.set_render_pipeline(self.pipeline);
        backend.set_bind_group(0, *bind_group);

        for material in skybox.model().materials() {
            for mesh in material.meshes() {
                let Some(gpu) = mesh.gpu() else { continue };
                backend.set_vertex_buffer(0, gpu.vertex_buffer, 0);
                backend.set_index_buffer(gpu.index_buffer, 0, IndexFormat::Uint32);
                backend.draw_indexed(0..gpu.index_count, 0, 0..1);
            }
        }

        backend.end_render_pass();
    }

    pub fn destroy<B: GraphicsBackend>(&mut self, backend: &mut B) {
        if let Some((bind_group, _)) = self.bound.take() {
            backend.destroy_bind_group(bind_group);
        }
        backend.destroy_buffer(self.uniform_buffer);
    }
}

const SKYBOX_SHADER: &str = r#"
struct SkyboxUniforms {
    projection_view_model: mat4x4<f32>,
    color: vec4<f32>,
    params: vec4<f32>,
}

@group(0) @binding(0) var<uniform> sky: SkyboxUniforms;
@group(0) @binding(1) var sky_texture: texture_2d<f32>;
@group(0) @binding(2) var sky_sampler: sampler;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(4) uv: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    let clip = sky.projection_view_model * vec4<f32>(in.position, 1.0);
    // Far plane
    out.position = clip.xyww;
    out.uv = in.uv;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    if (sky.params.x > 0.5) {
        return textureSample(sky_texture, sky_sampler, in.uv);
    }
    return sky.color;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{GBufferPass, SceneLayouts};
    use glam::Vec3;

    #[test]
    fn sky_ignores_camera_translation() {
        let sky = SkyBox::cube(Vec4::new(0.1, 0.2, 0.3, 1.0), None).unwrap();
        let projection = Projection::new(100, 100);
        let near = Camera::new(Vec3::ZERO);
        let far = Camera::new(Vec3::new(50.0, -3.0, 12.0));

        let a = SkyboxUniformData::new(&sky, &near, &projection);
        let b = SkyboxUniformData::new(&sky, &far, &projection);
        assert!(a.projection_view_model.abs_diff_eq(b.projection_view_model, 1e-5));
        assert_eq!(a.color, Vec4::new(0.1, 0.2, 0.3, 1.0));
        assert_eq!(a.params.x, 0.0);
    }

    #[test]
    fn bind_group_is_built_once_per_texture() {
        let mut backend = RecordingBackend::new(64, 64);
        let layouts = SceneLayouts::new(&mut backend).unwrap();
        let gbuffer = GBufferPass::new(&mut backend, &layouts, 64, 64).unwrap();
        let mut pass = SkyboxPass::new(&mut backend, &gbuffer.views()).unwrap();
        let mut textures = TextureCache::new();
        textures.upload(&mut backend).unwrap();
        let sky = SkyBox::cube(Vec4::ONE, None).unwrap();

        let before = backend.bind_group_count();
        pass.prepare(&mut backend, &sky, &textures).unwrap();
        pass.prepare(&mut backend, &sky, &textures).unwrap();
        assert_eq!(backend.bind_group_count(), before + 1);
    }
}
