//! Deferred rendering pipeline
//!
//! Every frame runs, in this order:
//! 1. Shadow pass - depth of the scene from the light, once per cascade
//! 2. G-Buffer pass - albedo, normal, specular and depth of visible geometry
//! 3. Lighting pass - fullscreen pass shading the G-buffer into the swapchain
//! 4. Skybox pass - camera-centered cube behind everything, if the scene has one

pub mod gbuffer_pass;
pub mod lighting_pass;
pub mod shadow_pass;
pub mod skybox_pass;

pub use gbuffer_pass::{GBufferPass, GBufferViews};
pub use lighting_pass::{LightingPass, LightingUniformData};
pub use shadow_pass::{CascadeUniformData, ShadowPass};
pub use skybox_pass::{SkyboxPass, SkyboxUniformData};

use crate::animation::{DEFAULT_BONE_MATRICES, MAX_BONES};
use crate::backend::*;
use crate::error::{EngineError, EngineResult};
use crate::resources::{GpuMaterial, Material, TextureCache, DEFAULT_NORMAL_MAP, DEFAULT_TEXTURE};
use crate::scene::{Entity, EntityKind, Scene};
use crate::shadow::update_cascades;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use std::collections::{HashMap, HashSet};

/// Byte offset of the bone array inside the object uniform buffer
pub const BONES_OFFSET: u64 = std::mem::size_of::<ObjectUniformData>() as u64;

/// Full size of the object uniform buffer: header plus `MAX_BONES` matrices
pub const OBJECT_UNIFORM_SIZE: u64 = BONES_OFFSET + (MAX_BONES * std::mem::size_of::<Mat4>()) as u64;

/// Per-entity header preceding the bone matrices
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ObjectUniformData {
    pub model: Mat4,
    /// x = billboard, y = faces camera about X, z = faces camera about Y
    pub params: Vec4,
}

impl ObjectUniformData {
    pub fn new(entity: &Entity) -> Self {
        let flag = |on: bool| if on { 1.0 } else { 0.0 };
        let params = match entity.kind() {
            EntityKind::Plain => Vec4::ZERO,
            EntityKind::Billboard { x, y } => Vec4::new(1.0, flag(x), flag(y), 0.0),
        };
        Self {
            model: entity.model_matrix(),
            params,
        }
    }
}

/// Object uniforms and skinning shared by the shadow and G-buffer shaders
pub(crate) const OBJECT_SKINNING: &str = r#"
const MAX_BONES: u32 = 150u;

struct ObjectUniforms {
    model: mat4x4<f32>,
    params: vec4<f32>,
    bones: array<mat4x4<f32>, MAX_BONES>,
}

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) tangent: vec3<f32>,
    @location(3) bitangent: vec3<f32>,
    @location(4) uv: vec2<f32>,
    @location(5) bone_indices: vec4<u32>,
    @location(6) bone_weights: vec4<f32>,
}

@group(1) @binding(0) var<uniform> object: ObjectUniforms;

// Blended bone transform. Vertices without weights, or whose bones are all
// zero matrices, keep their bind pose.
fn skin_matrix(indices: vec4<u32>, weights: vec4<f32>) -> mat4x4<f32> {
    let identity = mat4x4<f32>(
        vec4<f32>(1.0, 0.0, 0.0, 0.0),
        vec4<f32>(0.0, 1.0, 0.0, 0.0),
        vec4<f32>(0.0, 0.0, 1.0, 0.0),
        vec4<f32>(0.0, 0.0, 0.0, 1.0),
    );
    var blended = mat4x4<f32>(vec4<f32>(0.0), vec4<f32>(0.0), vec4<f32>(0.0), vec4<f32>(0.0));
    var total = 0.0;
    for (var i = 0u; i < 4u; i++) {
        let w = weights[i];
        if (w > 0.0 && indices[i] < MAX_BONES) {
            blended += object.bones[indices[i]] * w;
            total += w;
        }
    }
    if (total <= 0.0 || abs(blended[3][3]) < 1e-4) {
        return identity;
    }
    return blended;
}
"#;

/// Bind group layouts shared by the scene-drawing passes
#[derive(Debug, Clone, Copy)]
pub struct SceneLayouts {
    /// Group 0: one uniform buffer
    pub camera: BindGroupLayoutHandle,
    /// Group 1: object uniform buffer
    pub object: BindGroupLayoutHandle,
    /// Group 2: material uniform, diffuse texture, normal map, sampler
    pub material: BindGroupLayoutHandle,
}

impl SceneLayouts {
    pub fn new<B: GraphicsBackend>(backend: &mut B) -> BackendResult<Self> {
        let uniform = |binding, visibility| BindGroupLayoutEntry {
            binding,
            visibility,
            ty: BindingType::UniformBuffer,
        };
        let texture = |binding| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStageFlags::FRAGMENT,
            ty: BindingType::Texture {
                sample_type: TextureSampleType::Float { filterable: true },
            },
        };

        let camera = backend.create_bind_group_layout(&[uniform(0, ShaderStageFlags::VERTEX_FRAGMENT)])?;
        let object = backend.create_bind_group_layout(&[uniform(0, ShaderStageFlags::VERTEX)])?;
        let material = backend.create_bind_group_layout(&[
            uniform(0, ShaderStageFlags::FRAGMENT),
            texture(1),
            texture(2),
            BindGroupLayoutEntry {
                binding: 3,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::Sampler { comparison: false },
            },
        ])?;

        Ok(Self {
            camera,
            object,
            material,
        })
    }
}

/// Uniform buffer and bind group of one entity
#[derive(Debug, Clone, Copy)]
pub struct EntityGpu {
    pub buffer: BufferHandle,
    pub bind_group: BindGroupHandle,
}

/// Create a uniform buffer holding `data` and a bind group exposing it at binding 0
pub(crate) fn create_uniform<B: GraphicsBackend>(
    backend: &mut B,
    layout: BindGroupLayoutHandle,
    label: &str,
    data: &[u8],
) -> BackendResult<(BufferHandle, BindGroupHandle)> {
    let buffer = backend.create_buffer_init(&BufferDescriptor::uniform(label, data.len() as u64), data)?;
    let bind_group = backend.create_bind_group(
        layout,
        &[(
            0,
            BindGroupEntry::Buffer {
                buffer,
                offset: 0,
                size: None,
            },
        )],
    )?;
    Ok((buffer, bind_group))
}

/// Draw every instanced mesh of the scene with the currently bound pipeline
///
/// Groups 1 (object) and, when `bind_materials` is set, 2 (material) are
/// bound here; group 0 is the caller's.
pub(crate) fn draw_scene<B: GraphicsBackend>(
    backend: &mut B,
    scene: &Scene,
    entities: &HashMap<String, EntityGpu>,
    bind_materials: bool,
) {
    for (model, instances) in scene.models_with_entities() {
        if instances.is_empty() {
            continue;
        }
        for material in model.materials() {
            if bind_materials {
                let Some(gpu) = material.gpu() else { continue };
                backend.set_bind_group(2, gpu.bind_group);
            }
            for mesh in material.meshes() {
                let Some(gpu) = mesh.gpu() else { continue };
                backend.set_vertex_buffer(0, gpu.vertex_buffer, 0);
                backend.set_index_buffer(gpu.index_buffer, 0, IndexFormat::Uint32);
                for entity in instances {
                    if let Some(entity_gpu) = entities.get(entity.id()) {
                        backend.set_bind_group(1, entity_gpu.bind_group);
                        backend.draw_indexed(0..gpu.index_count, 0, 0..1);
                    }
                }
            }
        }
    }
}

/// Owns every pass and the per-entity GPU state
pub struct Renderer {
    layouts: SceneLayouts,
    material_sampler: SamplerHandle,
    shadow: ShadowPass,
    gbuffer: GBufferPass,
    lighting: LightingPass,
    skybox: SkyboxPass,
    entities: HashMap<String, EntityGpu>,
}

impl Renderer {
    pub fn new<B: GraphicsBackend>(backend: &mut B, shadow_map_size: u32) -> EngineResult<Self> {
        let (width, height) = backend.surface_size();
        let layouts = SceneLayouts::new(backend)?;
        let material_sampler = backend.create_sampler(&SamplerDescriptor {
            label: Some("Material Sampler".into()),
            address_mode: AddressMode::Repeat,
            ..Default::default()
        })?;

        let shadow = ShadowPass::new(backend, &layouts, shadow_map_size)?;
        let gbuffer = GBufferPass::new(backend, &layouts, width, height)?;
        let mut lighting = LightingPass::new(backend)?;
        lighting.bind_inputs(backend, &gbuffer.views(), &shadow.views())?;
        let skybox = SkyboxPass::new(backend, &gbuffer.views())?;

        log::info!(
            "Renderer ready: {}x{} G-buffer, {}x{} shadow maps",
            width,
            height,
            shadow_map_size,
            shadow_map_size
        );

        Ok(Self {
            layouts,
            material_sampler,
            shadow,
            gbuffer,
            lighting,
            skybox,
            entities: HashMap::new(),
        })
    }

    pub fn gbuffer(&self) -> &GBufferPass {
        &self.gbuffer
    }

    pub fn shadow(&self) -> &ShadowPass {
        &self.shadow
    }

    /// Uniform buffer of the entity with `id`, once prepared
    pub fn entity_buffer(&self, id: &str) -> Option<BufferHandle> {
        self.entities.get(id).map(|gpu| gpu.buffer)
    }

    /// Upload everything the scene gained since the last call
    pub fn prepare<B: GraphicsBackend>(&mut self, backend: &mut B, scene: &mut Scene) -> EngineResult<()> {
        scene.textures.upload(backend)?;

        for model in scene.models.values_mut() {
            model.upload_meshes(backend)?;
            for material in model.materials_mut() {
                if material.gpu.is_none() {
                    material.gpu = Some(self.upload_material(backend, material, &scene.textures)?);
                }
            }
        }

        if let Some(skybox) = &mut scene.skybox {
            skybox.model_mut().upload_meshes(backend)?;
            self.skybox.prepare(backend, skybox, &scene.textures)?;
        }

        let live: HashSet<&str> = scene.entities().map(|e| e.id()).collect();
        let stale: Vec<String> = self
            .entities
            .keys()
            .filter(|id| !live.contains(id.as_str()))
            .cloned()
            .collect();
        for id in stale {
            if let Some(gpu) = self.entities.remove(&id) {
                backend.destroy_bind_group(gpu.bind_group);
                backend.destroy_buffer(gpu.buffer);
            }
        }

        for entity in scene.entities() {
            if self.entities.contains_key(entity.id()) {
                continue;
            }
            let buffer = backend.create_buffer(&BufferDescriptor::uniform(entity.id(), OBJECT_UNIFORM_SIZE))?;
            let bind_group = backend.create_bind_group(
                self.layouts.object,
                &[(
                    0,
                    BindGroupEntry::Buffer {
                        buffer,
                        offset: 0,
                        size: None,
                    },
                )],
            )?;
            self.entities
                .insert(entity.id().to_string(), EntityGpu { buffer, bind_group });
        }

        Ok(())
    }

    fn upload_material<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        material: &Material,
        textures: &TextureCache,
    ) -> EngineResult<GpuMaterial> {
        let view = |key: Option<&str>, fallback: &str| -> EngineResult<TextureViewHandle> {
            textures.view_or(key, fallback).ok_or_else(|| EngineError::Texture {
                path: key.unwrap_or(fallback).to_string(),
                reason: "texture was never uploaded".into(),
            })
        };
        let diffuse = view(material.texture.as_deref(), DEFAULT_TEXTURE)?;
        let normal = view(material.normal_map.as_deref(), DEFAULT_NORMAL_MAP)?;

        let uniform = material.uniform_data();
        let uniform_buffer = backend.create_buffer_init(
            &BufferDescriptor::uniform("Material", std::mem::size_of_val(&uniform) as u64),
            bytemuck::bytes_of(&uniform),
        )?;
        let bind_group = backend.create_bind_group(
            self.layouts.material,
            &[
                (
                    0,
                    BindGroupEntry::Buffer {
                        buffer: uniform_buffer,
                        offset: 0,
                        size: None,
                    },
                ),
                (1, BindGroupEntry::Texture(diffuse)),
                (2, BindGroupEntry::Texture(normal)),
                (3, BindGroupEntry::Sampler(self.material_sampler)),
            ],
        )?;

        Ok(GpuMaterial {
            uniform_buffer,
            bind_group,
        })
    }

    fn write_entity_uniforms<B: GraphicsBackend>(&self, backend: &mut B, scene: &Scene) {
        for entity in scene.entities() {
            let Some(gpu) = self.entities.get(entity.id()) else { continue };
            let header = ObjectUniformData::new(entity);
            let bones = entity
                .current_frame()
                .map_or(DEFAULT_BONE_MATRICES.as_slice(), |frame| frame.bone_matrices().as_slice());

            backend.write_buffer(gpu.buffer, 0, bytemuck::bytes_of(&header));
            backend.write_buffer(gpu.buffer, BONES_OFFSET, bytemuck::cast_slice(bones));
        }
    }

    /// Record and present one frame
    pub fn render<B: GraphicsBackend>(&mut self, backend: &mut B, scene: &mut Scene) -> EngineResult<()> {
        self.prepare(backend, scene)?;

        let view = scene.camera.view_matrix();
        let projection = scene.projection.matrix();
        let cascades = update_cascades(
            &view,
            &projection,
            scene.projection.near,
            scene.projection.far,
            scene.lights.directional.direction,
        );

        self.write_entity_uniforms(backend, scene);
        self.shadow.write_cascades(backend, &cascades);
        self.gbuffer.write_camera(backend, &scene.camera, &scene.projection);
        self.lighting.write_uniforms(backend, scene, &cascades);
        if let Some(skybox) = scene.skybox() {
            self.skybox.write_uniforms(backend, skybox, &scene.camera, &scene.projection);
        }

        let frame = backend.begin_frame()?;
        self.shadow.render(backend, scene, &self.entities);
        self.gbuffer.render(backend, scene, &self.entities);
        self.lighting.render(backend, frame.swapchain_view, frame.width, frame.height);
        if let Some(skybox) = scene.skybox() {
            self.skybox.render(backend, skybox, frame.swapchain_view, frame.width, frame.height);
        }
        backend.end_frame()?;

        Ok(())
    }

    /// Resize the surface and rebuild the G-buffer at the new size
    pub fn resize<B: GraphicsBackend>(&mut self, backend: &mut B, width: u32, height: u32) -> EngineResult<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        backend.resize(width, height);
        // The surface may be clamped to the device limit
        let (width, height) = backend.surface_size();
        self.gbuffer.resize(backend, width, height)?;
        self.lighting.bind_inputs(backend, &self.gbuffer.views(), &self.shadow.views())?;
        self.skybox.bind_depth(&self.gbuffer.views());
        log::debug!("Renderer resized to {}x{}", width, height);
        Ok(())
    }

    /// Release GPU resources in reverse creation order
    pub fn cleanup<B: GraphicsBackend>(&mut self, backend: &mut B) {
        for (_, gpu) in self.entities.drain() {
            backend.destroy_bind_group(gpu.bind_group);
            backend.destroy_buffer(gpu.buffer);
        }
        self.skybox.destroy(backend);
        self.lighting.destroy(backend);
        self.gbuffer.destroy(backend);
        self.shadow.destroy(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{AnimatedFrame, Animation, NodeTree, Skeleton};
    use crate::import::ImportedNode;
    use crate::resources::{Mesh, MeshData, Model};
    use crate::scene::SkyBox;
    use glam::Vec3;

    fn cube_model(id: &str) -> Model {
        let mesh = Mesh::new(MeshData::cube(id)).unwrap();
        Model::new(id, vec![Material::new().with_mesh(mesh)])
    }

    fn test_scene() -> Scene {
        let mut scene = Scene::new(320, 240);
        scene.add_model(cube_model("cube"));
        let mut entity = Entity::new("cube-1", "cube");
        entity.set_position(Vec3::new(0.0, 0.0, -5.0), true);
        scene.add_entity(entity).unwrap();
        scene
    }

    fn setup() -> (RecordingBackend, Renderer) {
        let mut backend = RecordingBackend::new(320, 240);
        let renderer = Renderer::new(&mut backend, 256).unwrap();
        (backend, renderer)
    }

    #[test]
    fn passes_run_in_order() {
        let mut scene = test_scene();
        scene.set_skybox(Some(SkyBox::cube(Vec4::new(0.3, 0.5, 0.9, 1.0), None).unwrap()));
        let (mut backend, mut renderer) = setup();

        renderer.render(&mut backend, &mut scene).unwrap();
        assert_eq!(
            backend.pass_labels(),
            vec![
                "Shadow Cascade 0",
                "Shadow Cascade 1",
                "Shadow Cascade 2",
                "G-Buffer Pass",
                "Lighting Pass",
                "Skybox Pass",
            ]
        );
        let header = ObjectUniformData {
            model: Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0)),
            params: Vec4::ZERO,
        };
        let buffer = renderer.entity_buffer("cube-1").unwrap();
        assert_eq!(backend.last_write(buffer, 0), Some(bytemuck::bytes_of(&header)));
        assert_eq!(backend.commands().last(), Some(&RecordedCommand::EndFrame));
    }

    #[test]
    fn skybox_pass_is_skipped_without_skybox() {
        let mut scene = test_scene();
        let (mut backend, mut renderer) = setup();
        renderer.render(&mut backend, &mut scene).unwrap();
        assert_eq!(backend.pass_labels().last().map(String::as_str), Some("Lighting Pass"));
    }

    #[test]
    fn static_entities_submit_zero_bones() {
        let mut scene = test_scene();
        let (mut backend, mut renderer) = setup();
        renderer.render(&mut backend, &mut scene).unwrap();

        let buffer = renderer.entity_buffer("cube-1").unwrap();
        let bones = backend.last_write(buffer, BONES_OFFSET).unwrap();
        assert_eq!(bones.len(), MAX_BONES * 64);
        assert!(bones.iter().all(|b| *b == 0));
    }

    #[test]
    fn animated_entities_submit_current_frame() {
        let mut scene = Scene::new(320, 240);
        let skeleton = Skeleton {
            nodes: NodeTree::from_imported(&ImportedNode::new("root", Mat4::IDENTITY)),
            bones: Vec::new(),
        };
        let clip = Animation {
            name: "pose".into(),
            duration: 1.0,
            frames: vec![AnimatedFrame::identity()],
        };
        scene.add_model(cube_model("rig").with_animations(skeleton, vec![clip]));
        scene.add_entity(Entity::new("rig-1", "rig")).unwrap();
        scene.set_entity_animation("rig-1", 0).unwrap();

        let (mut backend, mut renderer) = setup();
        renderer.render(&mut backend, &mut scene).unwrap();

        let buffer = renderer.entity_buffer("rig-1").unwrap();
        let bones: &[Mat4] = bytemuck::cast_slice(backend.last_write(buffer, BONES_OFFSET).unwrap());
        assert!(bones.iter().all(|m| *m == Mat4::IDENTITY));
    }

    #[test]
    fn shadow_pass_draws_every_instance_per_cascade() {
        let mut scene = test_scene();
        scene.add_entity(Entity::new("cube-2", "cube")).unwrap();
        let (mut backend, mut renderer) = setup();
        renderer.render(&mut backend, &mut scene).unwrap();

        for label in ["Shadow Cascade 0", "Shadow Cascade 2", "G-Buffer Pass"] {
            let draws = backend
                .pass_commands(label)
                .iter()
                .filter(|c| matches!(c, RecordedCommand::DrawIndexed { index_count: 36 }))
                .count();
            assert_eq!(draws, 2, "{label}");
        }
        assert!(backend
            .pass_commands("Lighting Pass")
            .contains(&RecordedCommand::Draw { vertex_count: 6 }));
    }

    #[test]
    fn resize_rebuilds_gbuffer() {
        let mut scene = test_scene();
        let (mut backend, mut renderer) = setup();
        renderer.render(&mut backend, &mut scene).unwrap();

        renderer.resize(&mut backend, 800, 600).unwrap();
        for label in ["gbuffer_albedo", "gbuffer_normal", "gbuffer_specular", "gbuffer_depth"] {
            let textures = backend.textures_labeled(label);
            assert_eq!(textures.len(), 1, "{label}");
            assert_eq!((textures[0].width, textures[0].height), (800, 600));
        }
        assert_eq!(renderer.gbuffer().size(), (800, 600));

        backend.clear_commands();
        renderer.render(&mut backend, &mut scene).unwrap();
        assert!(backend
            .pass_commands("G-Buffer Pass")
            .contains(&RecordedCommand::SetViewport { width: 800.0, height: 600.0 }));
    }

    #[test]
    fn gbuffer_follows_clamped_surface() {
        let mut backend = RecordingBackend::new(320, 240).with_max_dimension(1024);
        let mut renderer = Renderer::new(&mut backend, 256).unwrap();

        renderer.resize(&mut backend, 4000, 600).unwrap();
        assert_eq!(backend.surface_size(), (1024, 600));
        assert_eq!(renderer.gbuffer().size(), (1024, 600));
        let albedo = backend.textures_labeled("gbuffer_albedo");
        assert_eq!((albedo[0].width, albedo[0].height), (1024, 600));
    }

    #[test]
    fn billboard_axes_reach_the_object_uniform() {
        let mut scene = test_scene();
        let mut sign = Entity::billboard("sign", "cube", false, true);
        sign.set_position(Vec3::new(0.0, 2.0, -5.0), true);
        scene.add_entity(sign).unwrap();
        let (mut backend, mut renderer) = setup();
        renderer.render(&mut backend, &mut scene).unwrap();

        let header = |id: &str| {
            let buffer = renderer.entity_buffer(id).unwrap();
            let bytes = backend.last_write(buffer, 0).unwrap();
            bytemuck::pod_read_unaligned::<ObjectUniformData>(bytes)
        };
        assert_eq!(header("sign").params, Vec4::new(1.0, 0.0, 1.0, 0.0));
        assert_eq!(header("cube-1").params, Vec4::ZERO);
    }

    #[test]
    fn removed_entities_release_their_buffers() {
        let mut scene = test_scene();
        let (mut backend, mut renderer) = setup();
        renderer.render(&mut backend, &mut scene).unwrap();
        let before = backend.buffer_count();

        scene.remove_entity("cube-1");
        renderer.render(&mut backend, &mut scene).unwrap();
        assert_eq!(backend.buffer_count(), before - 1);
        assert!(renderer.entity_buffer("cube-1").is_none());
    }

    #[test]
    fn cleanup_releases_everything() {
        let mut scene = test_scene();
        let (mut backend, mut renderer) = setup();
        renderer.render(&mut backend, &mut scene).unwrap();

        renderer.cleanup(&mut backend);
        scene.cleanup(&mut backend);
        assert_eq!(backend.buffer_count(), 0);
        assert_eq!(backend.texture_count(), 0);
    }
}
