//! G-Buffer generation pass
//!
//! Renders scene geometry into multiple render targets:
//! - Albedo (diffuse color or texture)
//! - View-space normals, encoded to [0, 1]
//! - Specular color with reflectance in alpha
//! - Depth

use super::{create_uniform, draw_scene, EntityGpu, SceneLayouts, OBJECT_SKINNING};
use crate::backend::*;
use crate::scene::{Camera, Projection, Scene};
use std::collections::HashMap;

const ALBEDO_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;
const NORMAL_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
const SPECULAR_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;
const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Views of the G-buffer attachments, read by the lighting and skybox passes
#[derive(Debug, Clone, Copy)]
pub struct GBufferViews {
    pub albedo: TextureViewHandle,
    pub normal: TextureViewHandle,
    pub specular: TextureViewHandle,
    pub depth: TextureViewHandle,
}

struct Attachment {
    texture: TextureHandle,
    view: TextureViewHandle,
}

impl Attachment {
    fn new<B: GraphicsBackend>(
        backend: &mut B,
        label: &str,
        format: TextureFormat,
        width: u32,
        height: u32,
    ) -> BackendResult<Self> {
        let texture = backend.create_texture(&TextureDescriptor {
            label: Some(label.to_string()),
            width,
            height,
            format,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        })?;
        let view = backend.create_texture_view(texture)?;
        Ok(Self { texture, view })
    }

    fn destroy<B: GraphicsBackend>(&self, backend: &mut B) {
        backend.destroy_texture_view(self.view);
        backend.destroy_texture(self.texture);
    }
}

struct Targets {
    width: u32,
    height: u32,
    albedo: Attachment,
    normal: Attachment,
    specular: Attachment,
    depth: Attachment,
}

impl Targets {
    fn new<B: GraphicsBackend>(backend: &mut B, width: u32, height: u32) -> BackendResult<Self> {
        Ok(Self {
            width,
            height,
            albedo: Attachment::new(backend, "gbuffer_albedo", ALBEDO_FORMAT, width, height)?,
            normal: Attachment::new(backend, "gbuffer_normal", NORMAL_FORMAT, width, height)?,
            specular: Attachment::new(backend, "gbuffer_specular", SPECULAR_FORMAT, width, height)?,
            depth: Attachment::new(backend, "gbuffer_depth", DEPTH_FORMAT, width, height)?,
        })
    }

    fn destroy<B: GraphicsBackend>(&self, backend: &mut B) {
        self.depth.destroy(backend);
        self.specular.destroy(backend);
        self.normal.destroy(backend);
        self.albedo.destroy(backend);
    }
}

/// Geometry pass filling the G-buffer
pub struct GBufferPass {
    pipeline: RenderPipelineHandle,
    camera_buffer: BufferHandle,
    camera_bind_group: BindGroupHandle,
    targets: Targets,
}

impl GBufferPass {
    pub fn new<B: GraphicsBackend>(
        backend: &mut B,
        layouts: &SceneLayouts,
        width: u32,
        height: u32,
    ) -> BackendResult<Self> {
        let pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("G-Buffer Pipeline".into()),
            shader: format!("{OBJECT_SKINNING}{GBUFFER_SHADER}"),
            has_fragment_stage: true,
            vertex_layouts: vec![SkinnedVertex::layout()],
            bind_group_layouts: vec![layouts.camera, layouts.object, layouts.material],
            primitive_topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            cull_mode: CullMode::Back,
            depth_stencil: Some(DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: CompareFunction::Less,
                depth_bias: 0,
                depth_bias_slope_scale: 0.0,
            }),
            color_targets: [ALBEDO_FORMAT, NORMAL_FORMAT, SPECULAR_FORMAT]
                .into_iter()
                .map(|format| ColorTargetState { format, blend: None })
                .collect(),
        })?;

        let camera = Camera::default().uniform_data(&Projection::new(width, height));
        let (camera_buffer, camera_bind_group) =
            create_uniform(backend, layouts.camera, "Camera Uniforms", bytemuck::bytes_of(&camera))?;

        Ok(Self {
            pipeline,
            camera_buffer,
            camera_bind_group,
            targets: Targets::new(backend, width, height)?,
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.targets.width, self.targets.height)
    }

    pub fn views(&self) -> GBufferViews {
        GBufferViews {
            albedo: self.targets.albedo.view,
            normal: self.targets.normal.view,
            specular: self.targets.specular.view,
            depth: self.targets.depth.view,
        }
    }

    /// Recreate every attachment at the new size
    pub fn resize<B: GraphicsBackend>(&mut self, backend: &mut B, width: u32, height: u32) -> BackendResult<()> {
        if (width, height) == self.size() {
            return Ok(());
        }
        let targets = Targets::new(backend, width, height)?;
        self.targets.destroy(backend);
        self.targets = targets;
        Ok(())
    }

    pub fn write_camera<B: GraphicsBackend>(&self, backend: &mut B, camera: &Camera, projection: &Projection) {
        let data = camera.uniform_data(projection);
        backend.write_buffer(self.camera_buffer, 0, bytemuck::bytes_of(&data));
    }

    pub fn render<B: GraphicsBackend>(&self, backend: &mut B, scene: &Scene, entities: &HashMap<String, EntityGpu>) {
        let clear = |view| ColorAttachment {
            view,
            load_op: LoadOp::Clear([0.0, 0.0, 0.0, 0.0]),
            store_op: StoreOp::Store,
        };

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("G-Buffer Pass".into()),
            color_attachments: vec![
                clear(self.targets.albedo.view),
                clear(self.targets.normal.view),
                clear(self.targets.specular.view),
            ],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: self.targets.depth.view,
                depth_load_op: LoadOp::Clear([1.0, 0.0, 0.0, 0.0]),
                depth_store_op: StoreOp::Store,
                depth_clear_value: 1.0,
            }),
        });

        backend.set_viewport(
            0.0,
            0.0,
            self.targets.width as f32,
            self.targets.height as f32,
            0.0,
            1.0,
        );
        backend.set_render_pipeline(self.pipeline);
        backend.set_bind_group(0, self.camera_bind_group);
        draw_scene(backend, scene, entities, true);

        backend.end_render_pass();
    }

    pub fn destroy<B: GraphicsBackend>(&mut self, backend: &mut B) {
        self.targets.destroy(backend);
        backend.destroy_bind_group(self.camera_bind_group);
        backend.destroy_buffer(self.camera_buffer);
    }
}

const GBUFFER_SHADER: &str = r#"
struct CameraUniforms {
    view: mat4x4<f32>,
    proj: mat4x4<f32>,
    inv_proj: mat4x4<f32>,
    position: vec4<f32>,
    near_far: vec4<f32>,
}

struct MaterialUniforms {
    ambient: vec4<f32>,
    diffuse: vec4<f32>,
    specular: vec4<f32>,
    // x = reflectance, y = has texture, z = has normal map
    params: vec4<f32>,
}

@group(0) @binding(0) var<uniform> camera: CameraUniforms;

@group(2) @binding(0) var<uniform> material: MaterialUniforms;
@group(2) @binding(1) var diffuse_texture: texture_2d<f32>;
@group(2) @binding(2) var normal_map: texture_2d<f32>;
@group(2) @binding(3) var material_sampler: sampler;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) normal: vec3<f32>,
    @location(1) tangent: vec3<f32>,
    @location(2) bitangent: vec3<f32>,
    @location(3) uv: vec2<f32>,
}

struct GBufferOutput {
    @location(0) albedo: vec4<f32>,
    @location(1) normal: vec4<f32>,
    @location(2) specular: vec4<f32>,
}

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    let skin = skin_matrix(in.bone_indices, in.bone_weights);
    let model_view = camera.view * object.model;

    var mv = model_view;
    if (object.params.x > 0.5) {
        // Screen-align every axis except the one a single-axis billboard turns about
        let scale = length(object.model[0].xyz);
        if (object.params.z > 0.5) {
            mv[0] = vec4<f32>(scale, 0.0, 0.0, 0.0);
        }
        if (object.params.y > 0.5) {
            mv[1] = vec4<f32>(0.0, scale, 0.0, 0.0);
        }
        if (object.params.y > 0.5 || object.params.z > 0.5) {
            mv[2] = vec4<f32>(0.0, 0.0, scale, 0.0);
        }
    }

    let view_position = mv * skin * vec4<f32>(in.position, 1.0);
    out.clip_position = camera.proj * view_position;

    let normal_matrix = mv * skin;
    out.normal = normalize((normal_matrix * vec4<f32>(in.normal, 0.0)).xyz);
    out.tangent = (normal_matrix * vec4<f32>(in.tangent, 0.0)).xyz;
    out.bitangent = (normal_matrix * vec4<f32>(in.bitangent, 0.0)).xyz;
    out.uv = in.uv;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> GBufferOutput {
    var out: GBufferOutput;

    var albedo = material.diffuse;
    if (material.params.y > 0.5) {
        albedo = textureSample(diffuse_texture, material_sampler, in.uv);
    }
    if (albedo.a < 0.01) {
        discard;
    }

    var normal = normalize(in.normal);
    if (material.params.z > 0.5 && length(in.tangent) > 0.0 && length(in.bitangent) > 0.0) {
        let tbn = mat3x3<f32>(normalize(in.tangent), normalize(in.bitangent), normal);
        let sampled = textureSample(normal_map, material_sampler, in.uv).rgb * 2.0 - 1.0;
        normal = normalize(tbn * sampled);
    }

    out.albedo = albedo;
    out.normal = vec4<f32>(normal * 0.5 + 0.5, 1.0);
    out.specular = vec4<f32>(material.specular.rgb, material.params.x);
    return out;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_four_attachments() {
        let mut backend = RecordingBackend::new(64, 32);
        let layouts = SceneLayouts::new(&mut backend).unwrap();
        let pass = GBufferPass::new(&mut backend, &layouts, 64, 32).unwrap();

        let expected = [
            ("gbuffer_albedo", ALBEDO_FORMAT),
            ("gbuffer_normal", NORMAL_FORMAT),
            ("gbuffer_specular", SPECULAR_FORMAT),
            ("gbuffer_depth", DEPTH_FORMAT),
        ];
        for (label, format) in expected {
            let textures = backend.textures_labeled(label);
            assert_eq!(textures.len(), 1, "{label}");
            assert_eq!(textures[0].format, format);
        }
        assert_eq!(backend.pipeline(pass.pipeline).unwrap().color_targets.len(), 3);
    }

    #[test]
    fn resize_to_same_size_keeps_targets() {
        let mut backend = RecordingBackend::new(64, 32);
        let layouts = SceneLayouts::new(&mut backend).unwrap();
        let mut pass = GBufferPass::new(&mut backend, &layouts, 64, 32).unwrap();
        let before = pass.views().albedo;

        pass.resize(&mut backend, 64, 32).unwrap();
        assert_eq!(pass.views().albedo, before);

        pass.resize(&mut backend, 128, 64).unwrap();
        assert_ne!(pass.views().albedo, before);
        assert_eq!(backend.texture_count(), 4);
    }
}
