//! Deferred lighting pass
//!
//! Shades the G-buffer with a fullscreen quad: ambient, the shadowed
//! directional light, point and spot lights, then optional fog. Pixels
//! without geometry are discarded so the skybox can fill them.

use super::GBufferViews;
use crate::backend::*;
use crate::scene::{FogUniformData, LightsUniformData, Scene};
use crate::shadow::{CascadeShadow, CASCADE_COUNT};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightingUniformData {
    pub inv_proj: Mat4,
    pub inv_view: Mat4,
    pub cascade_matrices: [Mat4; CASCADE_COUNT],
    /// Split distance of each cascade, negative view-space z
    pub cascade_splits: Vec4,
    pub lights: LightsUniformData,
    pub fog: FogUniformData,
}

impl LightingUniformData {
    pub fn new(scene: &Scene, cascades: &[CascadeShadow; CASCADE_COUNT]) -> Self {
        let view = scene.camera.view_matrix();
        let mut splits = Vec4::ZERO;
        for (i, cascade) in cascades.iter().enumerate() {
            splits[i] = cascade.split_distance;
        }

        Self {
            inv_proj: scene.projection.matrix().inverse(),
            inv_view: view.inverse(),
            cascade_matrices: cascades.map(|c| c.projection_view),
            cascade_splits: splits,
            lights: scene.lights.uniform_data(&view),
            fog: scene.fog.uniform_data(),
        }
    }
}

/// Fullscreen pass accumulating light into the swapchain
pub struct LightingPass {
    pipeline: RenderPipelineHandle,
    layout: BindGroupLayoutHandle,
    uniform_buffer: BufferHandle,
    shadow_sampler: SamplerHandle,
    bind_group: Option<BindGroupHandle>,
}

impl LightingPass {
    pub fn new<B: GraphicsBackend>(backend: &mut B) -> BackendResult<Self> {
        let texture = |binding, sample_type| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStageFlags::FRAGMENT,
            ty: BindingType::Texture { sample_type },
        };
        let gbuffer_color = TextureSampleType::Float { filterable: false };

        let mut entries = vec![
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::UniformBuffer,
            },
            texture(1, gbuffer_color),
            texture(2, gbuffer_color),
            texture(3, gbuffer_color),
            texture(4, TextureSampleType::Depth),
        ];
        for i in 0..CASCADE_COUNT as u32 {
            entries.push(texture(5 + i, TextureSampleType::Depth));
        }
        entries.push(BindGroupLayoutEntry {
            binding: 5 + CASCADE_COUNT as u32,
            visibility: ShaderStageFlags::FRAGMENT,
            ty: BindingType::Sampler { comparison: true },
        });
        let layout = backend.create_bind_group_layout(&entries)?;

        let shadow_sampler = backend.create_sampler(&SamplerDescriptor {
            label: Some("Shadow Sampler".into()),
            compare: Some(CompareFunction::LessEqual),
            ..Default::default()
        })?;

        let uniform_buffer = backend.create_buffer(&BufferDescriptor::uniform(
            "Lighting Uniforms",
            std::mem::size_of::<LightingUniformData>() as u64,
        ))?;

        let pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("Lighting Pipeline".into()),
            shader: LIGHTING_SHADER.to_string(),
            has_fragment_stage: true,
            vertex_layouts: Vec::new(),
            bind_group_layouts: vec![layout],
            primitive_topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            cull_mode: CullMode::None,
            depth_stencil: None,
            color_targets: vec![ColorTargetState {
                format: backend.swapchain_format(),
                blend: Some(BlendState::additive()),
            }],
        })?;

        Ok(Self {
            pipeline,
            layout,
            uniform_buffer,
            shadow_sampler,
            bind_group: None,
        })
    }

    /// Rebind G-buffer and shadow map views; needed after every G-buffer resize
    pub fn bind_inputs<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        gbuffer: &GBufferViews,
        shadow_maps: &[TextureViewHandle],
    ) -> BackendResult<()> {
        if let Some(old) = self.bind_group.take() {
            backend.destroy_bind_group(old);
        }

        let mut entries = vec![
            (
                0,
                BindGroupEntry::Buffer {
                    buffer: self.uniform_buffer,
                    offset: 0,
                    size: None,
                },
            ),
            (1, BindGroupEntry::Texture(gbuffer.albedo)),
            (2, BindGroupEntry::Texture(gbuffer.normal)),
            (3, BindGroupEntry::Texture(gbuffer.specular)),
            (4, BindGroupEntry::Texture(gbuffer.depth)),
        ];
        for (i, view) in shadow_maps.iter().take(CASCADE_COUNT).enumerate() {
            entries.push((5 + i as u32, BindGroupEntry::Texture(*view)));
        }
        entries.push((
            5 + CASCADE_COUNT as u32,
            BindGroupEntry::Sampler(self.shadow_sampler),
        ));

        self.bind_group = Some(backend.create_bind_group(self.layout, &entries)?);
        Ok(())
    }

    pub fn write_uniforms<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        scene: &Scene,
        cascades: &[CascadeShadow; CASCADE_COUNT],
    ) {
        let data = LightingUniformData::new(scene, cascades);
        backend.write_buffer(self.uniform_buffer, 0, bytemuck::bytes_of(&data));
    }

    pub fn render<B: GraphicsBackend>(&self, backend: &mut B, target: TextureViewHandle, width: u32, height: u32) {
        let Some(bind_group) = self.bind_group else {
            log::warn!("Lighting pass has no inputs bound, skipping");
            return;
        };

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Lighting Pass".into()),
            color_attachments: vec![ColorAttachment {
                view: target,
                load_op: LoadOp::Clear([0.0, 0.0, 0.0, 1.0]),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: None,
        });
        backend.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
        backend.set_render_pipeline(self.pipeline);
        backend.set_bind_group(0, bind_group);
        backend.draw(0..6, 0..1);
        backend.end_render_pass();
    }

    pub fn destroy<B: GraphicsBackend>(&mut self, backend: &mut B) {
        if let Some(bind_group) = self.bind_group.take() {
            backend.destroy_bind_group(bind_group);
        }
        backend.destroy_buffer(self.uniform_buffer);
    }
}

const LIGHTING_SHADER: &str = r#"
const MAX_POINT_LIGHTS: u32 = 16u;
const MAX_SPOT_LIGHTS: u32 = 16u;
const SPECULAR_POWER: f32 = 10.0;
const SHADOW_BIAS: f32 = 0.0005;

struct PointLight {
    // xyz = view-space position, w = intensity
    position: vec4<f32>,
    color: vec4<f32>,
    // x = constant, y = linear, z = exponent
    attenuation: vec4<f32>,
}

struct SpotLight {
    point: PointLight,
    direction: vec4<f32>,
    // x = cos(inner), y = cos(outer)
    cutoff: vec4<f32>,
}

struct Lights {
    // rgb = color, w = intensity
    ambient: vec4<f32>,
    directional_color: vec4<f32>,
    // toward the light, view space
    directional_direction: vec4<f32>,
    point_lights: array<PointLight, MAX_POINT_LIGHTS>,
    spot_lights: array<SpotLight, MAX_SPOT_LIGHTS>,
    counts: vec4<u32>,
}

struct Fog {
    // w = active
    color: vec4<f32>,
    // x = density
    params: vec4<f32>,
}

struct LightingUniforms {
    inv_proj: mat4x4<f32>,
    inv_view: mat4x4<f32>,
    cascade_matrices: array<mat4x4<f32>, 3>,
    cascade_splits: vec4<f32>,
    lights: Lights,
    fog: Fog,
}

@group(0) @binding(0) var<uniform> u: LightingUniforms;
@group(0) @binding(1) var gbuffer_albedo: texture_2d<f32>;
@group(0) @binding(2) var gbuffer_normal: texture_2d<f32>;
@group(0) @binding(3) var gbuffer_specular: texture_2d<f32>;
@group(0) @binding(4) var gbuffer_depth: texture_depth_2d;
@group(0) @binding(5) var shadow_map_0: texture_depth_2d;
@group(0) @binding(6) var shadow_map_1: texture_depth_2d;
@group(0) @binding(7) var shadow_map_2: texture_depth_2d;
@group(0) @binding(8) var shadow_sampler: sampler_comparison;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var positions = array<vec2<f32>, 6>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(1.0, -1.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(-1.0, 1.0),
    );
    let p = positions[vertex_index];

    var out: VertexOutput;
    out.position = vec4<f32>(p, 0.0, 1.0);
    out.uv = vec2<f32>(p.x * 0.5 + 0.5, 0.5 - p.y * 0.5);
    return out;
}

fn view_position(uv: vec2<f32>, depth: f32) -> vec3<f32> {
    let ndc = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth, 1.0);
    let p = u.inv_proj * ndc;
    return p.xyz / p.w;
}

fn light_color(
    diffuse: vec3<f32>,
    specular: vec3<f32>,
    reflectance: f32,
    color: vec3<f32>,
    intensity: f32,
    position: vec3<f32>,
    to_light: vec3<f32>,
    normal: vec3<f32>,
) -> vec3<f32> {
    let diffuse_factor = max(dot(normal, to_light), 0.0);
    let diffuse_color = diffuse * color * intensity * diffuse_factor;

    let to_camera = normalize(-position);
    let reflected = normalize(reflect(-to_light, normal));
    let specular_factor = pow(max(dot(to_camera, reflected), 0.0), SPECULAR_POWER);
    let specular_color = specular * color * intensity * specular_factor * reflectance;

    return diffuse_color + specular_color;
}

fn point_light(
    light: PointLight,
    diffuse: vec3<f32>,
    specular: vec3<f32>,
    reflectance: f32,
    position: vec3<f32>,
    normal: vec3<f32>,
) -> vec3<f32> {
    let to_light = light.position.xyz - position;
    let distance = length(to_light);
    let color = light_color(
        diffuse, specular, reflectance,
        light.color.rgb, light.position.w,
        position, normalize(to_light), normal,
    );
    let att = light.attenuation;
    let falloff = att.x + att.y * distance + att.z * distance * distance;
    return color / max(falloff, 1e-4);
}

fn spot_light(
    light: SpotLight,
    diffuse: vec3<f32>,
    specular: vec3<f32>,
    reflectance: f32,
    position: vec3<f32>,
    normal: vec3<f32>,
) -> vec3<f32> {
    let from_light = normalize(position - light.point.position.xyz);
    let alignment = dot(from_light, normalize(light.direction.xyz));
    let inner = light.cutoff.x;
    let outer = light.cutoff.y;
    if (alignment <= outer) {
        return vec3<f32>(0.0);
    }
    let cone = clamp((alignment - outer) / max(inner - outer, 1e-4), 0.0, 1.0);
    return point_light(light.point, diffuse, specular, reflectance, position, normal) * cone;
}

fn sample_cascade(index: u32, uv: vec2<f32>, depth: f32) -> f32 {
    if (index == 0u) {
        return textureSampleCompareLevel(shadow_map_0, shadow_sampler, uv, depth);
    } else if (index == 1u) {
        return textureSampleCompareLevel(shadow_map_1, shadow_sampler, uv, depth);
    }
    return textureSampleCompareLevel(shadow_map_2, shadow_sampler, uv, depth);
}

// 1.0 = fully lit
fn shadow_factor(world_position: vec3<f32>, view_z: f32) -> f32 {
    var index = 0u;
    for (var i = 0u; i < 2u; i++) {
        if (view_z < u.cascade_splits[i]) {
            index = i + 1u;
        }
    }

    let light_clip = u.cascade_matrices[index] * vec4<f32>(world_position, 1.0);
    let coords = light_clip.xyz / light_clip.w;
    let uv = vec2<f32>(coords.x * 0.5 + 0.5, 0.5 - coords.y * 0.5);
    if (any(uv < vec2<f32>(0.0)) || any(uv > vec2<f32>(1.0)) || coords.z > 1.0) {
        return 1.0;
    }

    let size = vec2<f32>(textureDimensions(shadow_map_0));
    var lit = 0.0;
    for (var x = -1; x <= 1; x++) {
        for (var y = -1; y <= 1; y++) {
            let offset = vec2<f32>(f32(x), f32(y)) / size;
            lit += sample_cascade(index, uv + offset, coords.z - SHADOW_BIAS);
        }
    }
    return lit / 9.0;
}

fn apply_fog(color: vec3<f32>, position: vec3<f32>) -> vec3<f32> {
    let light = u.lights.ambient.rgb * u.lights.ambient.w
        + u.lights.directional_color.rgb * u.lights.directional_color.w;
    let fog_color = u.fog.color.rgb * light;
    let d = length(position) * u.fog.params.x;
    let factor = clamp(1.0 / exp(d * d), 0.0, 1.0);
    return mix(fog_color, color, factor);
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let coords = vec2<i32>(in.position.xy);
    let depth = textureLoad(gbuffer_depth, coords, 0);
    if (depth >= 1.0) {
        discard;
    }

    let albedo = textureLoad(gbuffer_albedo, coords, 0);
    let normal = normalize(textureLoad(gbuffer_normal, coords, 0).xyz * 2.0 - 1.0);
    let specular_sample = textureLoad(gbuffer_specular, coords, 0);
    let specular = specular_sample.rgb;
    let reflectance = specular_sample.a;

    let position = view_position(in.uv, depth);
    let world_position = (u.inv_view * vec4<f32>(position, 1.0)).xyz;

    var color = albedo.rgb * u.lights.ambient.rgb * u.lights.ambient.w;

    let directional = light_color(
        albedo.rgb, specular, reflectance,
        u.lights.directional_color.rgb, u.lights.directional_color.w,
        position, normalize(u.lights.directional_direction.xyz), normal,
    );
    color += directional * shadow_factor(world_position, position.z);

    for (var i = 0u; i < min(u.lights.counts.x, MAX_POINT_LIGHTS); i++) {
        color += point_light(u.lights.point_lights[i], albedo.rgb, specular, reflectance, position, normal);
    }
    for (var i = 0u; i < min(u.lights.counts.y, MAX_SPOT_LIGHTS); i++) {
        color += spot_light(u.lights.spot_lights[i], albedo.rgb, specular, reflectance, position, normal);
    }

    if (u.fog.color.w > 0.5) {
        color = apply_fog(color, position);
    }

    return vec4<f32>(color, 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{GBufferPass, SceneLayouts};
    use crate::scene::{Fog, PointLight};
    use crate::shadow::update_cascades;
    use glam::Vec3;

    #[test]
    fn uniforms_carry_cascades_lights_and_fog() {
        let mut scene = Scene::new(640, 480);
        scene.lights.points.push(PointLight::new(Vec3::ONE, Vec3::Y, 1.0)).unwrap();
        scene.fog = Fog::new(Vec3::splat(0.5), 0.02);

        let cascades = update_cascades(
            &scene.camera.view_matrix(),
            &scene.projection.matrix(),
            scene.projection.near,
            scene.projection.far,
            scene.lights.directional.direction,
        );
        let data = LightingUniformData::new(&scene, &cascades);

        for i in 0..CASCADE_COUNT {
            assert_eq!(data.cascade_splits[i], cascades[i].split_distance);
            assert_eq!(data.cascade_matrices[i], cascades[i].projection_view);
        }
        assert_eq!(data.lights.counts[0], 1);
        assert_eq!(data.fog.color.w, 1.0);
        assert_eq!(data.fog.params.x, 0.02);
    }

    #[test]
    fn rebinding_replaces_bind_group() {
        let mut backend = RecordingBackend::new(64, 64);
        let layouts = SceneLayouts::new(&mut backend).unwrap();
        let mut gbuffer = GBufferPass::new(&mut backend, &layouts, 64, 64).unwrap();
        let shadow = crate::pipeline::ShadowPass::new(&mut backend, &layouts, 128).unwrap();
        let mut pass = LightingPass::new(&mut backend).unwrap();

        let before = backend.bind_group_count();
        pass.bind_inputs(&mut backend, &gbuffer.views(), &shadow.views()).unwrap();
        assert_eq!(backend.bind_group_count(), before + 1);

        gbuffer.resize(&mut backend, 32, 32).unwrap();
        pass.bind_inputs(&mut backend, &gbuffer.views(), &shadow.views()).unwrap();
        assert_eq!(backend.bind_group_count(), before + 1);
    }

    #[test]
    fn render_without_inputs_is_skipped() {
        let mut backend = RecordingBackend::new(64, 64);
        let pass = LightingPass::new(&mut backend).unwrap();
        let frame = backend.begin_frame().unwrap();
        pass.render(&mut backend, frame.swapchain_view, 64, 64);
        assert!(backend.pass_labels().is_empty());
    }
}
