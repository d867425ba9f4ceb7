//! Depth-only shadow map rendering, one pass per cascade

use super::{create_uniform, draw_scene, EntityGpu, SceneLayouts, OBJECT_SKINNING};
use crate::backend::*;
use crate::scene::Scene;
use crate::shadow::{CascadeShadow, CASCADE_COUNT};
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use std::collections::HashMap;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CascadeUniformData {
    pub projection_view: Mat4,
}

struct CascadeTarget {
    texture: TextureHandle,
    view: TextureViewHandle,
    uniform_buffer: BufferHandle,
    bind_group: BindGroupHandle,
}

/// Renders scene depth from the directional light into [`CASCADE_COUNT`] maps
pub struct ShadowPass {
    size: u32,
    pipeline: RenderPipelineHandle,
    cascades: Vec<CascadeTarget>,
}

impl ShadowPass {
    pub fn new<B: GraphicsBackend>(backend: &mut B, layouts: &SceneLayouts, size: u32) -> BackendResult<Self> {
        let pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("Shadow Pipeline".into()),
            shader: format!("{OBJECT_SKINNING}{SHADOW_SHADER}"),
            has_fragment_stage: false,
            vertex_layouts: vec![SkinnedVertex::layout()],
            bind_group_layouts: vec![layouts.camera, layouts.object],
            primitive_topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            cull_mode: CullMode::None,
            depth_stencil: Some(DepthStencilState {
                format: TextureFormat::Depth32Float,
                depth_write_enabled: true,
                depth_compare: CompareFunction::Less,
                depth_bias: 2,
                depth_bias_slope_scale: 2.0,
            }),
            color_targets: Vec::new(),
        })?;

        let mut cascades = Vec::with_capacity(CASCADE_COUNT);
        for i in 0..CASCADE_COUNT {
            let texture = backend.create_texture(&TextureDescriptor {
                label: Some(format!("shadow_cascade_{i}")),
                width: size,
                height: size,
                format: TextureFormat::Depth32Float,
                usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
            })?;
            let view = backend.create_texture_view(texture)?;
            let data = CascadeUniformData {
                projection_view: Mat4::IDENTITY,
            };
            let (uniform_buffer, bind_group) = create_uniform(
                backend,
                layouts.camera,
                &format!("Shadow Cascade {i} Uniforms"),
                bytemuck::bytes_of(&data),
            )?;
            cascades.push(CascadeTarget {
                texture,
                view,
                uniform_buffer,
                bind_group,
            });
        }

        Ok(Self {
            size,
            pipeline,
            cascades,
        })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Depth views of every cascade, nearest first
    pub fn views(&self) -> Vec<TextureViewHandle> {
        self.cascades.iter().map(|c| c.view).collect()
    }

    pub fn write_cascades<B: GraphicsBackend>(&self, backend: &mut B, cascades: &[CascadeShadow; CASCADE_COUNT]) {
        for (target, cascade) in self.cascades.iter().zip(cascades) {
            let data = CascadeUniformData {
                projection_view: cascade.projection_view,
            };
            backend.write_buffer(target.uniform_buffer, 0, bytemuck::bytes_of(&data));
        }
    }

    pub fn render<B: GraphicsBackend>(&self, backend: &mut B, scene: &Scene, entities: &HashMap<String, EntityGpu>) {
        for (i, target) in self.cascades.iter().enumerate() {
            backend.begin_render_pass(&RenderPassDescriptor {
                label: Some(format!("Shadow Cascade {i}")),
                color_attachments: Vec::new(),
                depth_stencil_attachment: Some(DepthStencilAttachment {
                    view: target.view,
                    depth_load_op: LoadOp::Clear([1.0, 0.0, 0.0, 0.0]),
                    depth_store_op: StoreOp::Store,
                    depth_clear_value: 1.0,
                }),
            });
            backend.set_viewport(0.0, 0.0, self.size as f32, self.size as f32, 0.0, 1.0);
            backend.set_render_pipeline(self.pipeline);
            backend.set_bind_group(0, target.bind_group);
            draw_scene(backend, scene, entities, false);
            backend.end_render_pass();
        }
    }

    pub fn destroy<B: GraphicsBackend>(&mut self, backend: &mut B) {
        for target in self.cascades.drain(..).rev() {
            backend.destroy_bind_group(target.bind_group);
            backend.destroy_buffer(target.uniform_buffer);
            backend.destroy_texture_view(target.view);
            backend.destroy_texture(target.texture);
        }
    }
}

const SHADOW_SHADER: &str = r#"
struct CascadeUniforms {
    projection_view: mat4x4<f32>,
}

@group(0) @binding(0) var<uniform> cascade: CascadeUniforms;

@vertex
fn vs_main(in: VertexInput) -> @builtin(position) vec4<f32> {
    let skinned = skin_matrix(in.bone_indices, in.bone_weights) * vec4<f32>(in.position, 1.0);
    return cascade.projection_view * object.model * skinned;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_depth_map_per_cascade() {
        let mut backend = RecordingBackend::new(64, 64);
        let layouts = SceneLayouts::new(&mut backend).unwrap();
        let pass = ShadowPass::new(&mut backend, &layouts, 1024).unwrap();

        assert_eq!(pass.views().len(), CASCADE_COUNT);
        for i in 0..CASCADE_COUNT {
            let textures = backend.textures_labeled(&format!("shadow_cascade_{i}"));
            assert_eq!(textures.len(), 1);
            assert_eq!(textures[0].format, TextureFormat::Depth32Float);
            assert_eq!((textures[0].width, textures[0].height), (1024, 1024));
        }

        let pipeline = backend.pipeline(pass.pipeline).unwrap();
        assert!(!pipeline.has_fragment_stage);
        assert!(pipeline.color_targets.is_empty());
        assert!(pipeline.depth_stencil.as_ref().is_some_and(|d| d.depth_bias > 0));
    }

    #[test]
    fn cascade_matrices_are_uploaded() {
        let mut backend = RecordingBackend::new(64, 64);
        let layouts = SceneLayouts::new(&mut backend).unwrap();
        let pass = ShadowPass::new(&mut backend, &layouts, 256).unwrap();

        let mut cascades = [CascadeShadow::default(); CASCADE_COUNT];
        cascades[1].projection_view = Mat4::from_scale(glam::Vec3::splat(2.0));
        pass.write_cascades(&mut backend, &cascades);

        let written = backend.last_write(pass.cascades[1].uniform_buffer, 0).unwrap();
        let expected = CascadeUniformData {
            projection_view: cascades[1].projection_view,
        };
        assert_eq!(written, bytemuck::bytes_of(&expected));
    }
}
