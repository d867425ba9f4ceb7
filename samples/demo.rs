//! Demo scene: a skinned arm swinging over a ground plane, a ring of cubes,
//! a billboard, colored point lights, fog and a flat sky.
//!
//! Controls: WASD to move, Space/Ctrl for up/down, hold the right mouse
//! button to look around.

use cascade_engine::backend::SkinnedVertex;
use cascade_engine::import::{
    ImportedAnimation, ImportedBone, ImportedMaterial, ImportedMesh, ImportedNode, ImportedScene,
    NodeChannel, QuatKey, VectorKey, VertexWeight,
};
use cascade_engine::resources::{Material, Mesh, MeshData, Model, ModelLoader, TextureData};
use cascade_engine::scene::{
    CameraInput, DirectionalLight, Entity, Fog, FreeLookController, PointLight, SkyBox,
};
use cascade_engine::{AppLogic, Engine, EngineConfig, EngineResult, InputState, Scene};
use clap::Parser;
use glam::{Mat4, Quat, Vec3, Vec4};
use std::path::Path;

#[derive(Parser, Debug)]
#[command(name = "demo", about = "Cascade engine demo scene")]
struct Args {
    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Frame cap, 0 for uncapped
    #[arg(long, default_value_t = 0)]
    fps: u32,

    /// Fixed update rate
    #[arg(long, default_value_t = 30)]
    ups: u32,

    #[arg(long, default_value_t = 2048)]
    shadow_map_size: u32,

    #[arg(long)]
    no_vsync: bool,

    /// Exponential fog density, 0 disables fog
    #[arg(long, default_value_t = 0.02)]
    fog: f32,
}

struct DemoLogic {
    controller: FreeLookController,
    fog_density: f32,
    light_angle: f32,
}

impl DemoLogic {
    fn new(fog_density: f32) -> Self {
        Self {
            controller: FreeLookController::default(),
            fog_density,
            light_angle: 0.0,
        }
    }
}

/// A box split at y = 0 between a lower and an upper bone, with a swing clip
fn skinned_arm() -> ImportedScene {
    let cube = MeshData::cube("arm");
    let stretch = Mat4::from_scale(Vec3::new(0.4, 3.0, 0.4));
    let vertices: Vec<SkinnedVertex> = cube
        .vertices
        .iter()
        .map(|v| SkinnedVertex {
            position: stretch.transform_point3(v.position),
            ..*v
        })
        .collect();

    let weights = |upper: bool| {
        vertices
            .iter()
            .enumerate()
            .filter(|(_, v)| (v.position.y >= 0.0) == upper)
            .map(|(i, _)| VertexWeight {
                vertex_id: i as u32,
                weight: 1.0,
            })
            .collect::<Vec<_>>()
    };

    let mesh = ImportedMesh {
        name: "arm".into(),
        positions: vertices.iter().map(|v| v.position).collect(),
        normals: vertices.iter().map(|v| v.normal).collect(),
        tangents: vertices.iter().map(|v| v.tangent).collect(),
        bitangents: vertices.iter().map(|v| v.bitangent).collect(),
        texcoords: vertices.iter().map(|v| v.uv).collect(),
        indices: cube.indices.clone(),
        material_index: Some(0),
        bones: vec![
            ImportedBone {
                name: "lower".into(),
                offset: Mat4::IDENTITY,
                weights: weights(false),
            },
            ImportedBone {
                name: "upper".into(),
                offset: Mat4::IDENTITY,
                weights: weights(true),
            },
        ],
    };

    let swing = (0..8)
        .map(|i| {
            let t = i as f64 / 8.0;
            let angle = (t * std::f64::consts::TAU).sin() as f32 * 0.6;
            QuatKey {
                time: t,
                value: Quat::from_rotation_z(angle),
            }
        })
        .collect();

    ImportedScene {
        root: ImportedNode::new("root", Mat4::IDENTITY).with_child(
            ImportedNode::new("lower", Mat4::IDENTITY)
                .with_child(ImportedNode::new("upper", Mat4::IDENTITY)),
        ),
        meshes: vec![mesh],
        materials: vec![ImportedMaterial {
            diffuse: Vec4::new(0.9, 0.5, 0.2, 1.0),
            specular: Vec4::ONE,
            reflectance: 0.6,
            ..Default::default()
        }],
        animations: vec![ImportedAnimation {
            name: "swing".into(),
            duration: 1.0,
            channels: vec![NodeChannel {
                node_name: "upper".into(),
                position_keys: vec![VectorKey {
                    time: 0.0,
                    value: Vec3::ZERO,
                }],
                rotation_keys: swing,
                scaling_keys: Vec::new(),
            }],
        }],
    }
}

impl AppLogic for DemoLogic {
    fn init(&mut self, scene: &mut Scene) -> EngineResult<()> {
        let checker = scene.textures_mut().insert(
            "checker",
            TextureData::checkerboard(256, [200, 200, 200, 255], [90, 90, 90, 255]),
        );
        let ground = Material::new()
            .with_texture(checker)
            .with_reflectance(0.1)
            .with_mesh(Mesh::new(MeshData::plane("ground", 60.0))?);
        scene.add_model(Model::new("ground", vec![ground]));
        scene.add_entity(Entity::new("ground", "ground"))?;

        let crate_material = Material::new()
            .with_diffuse(Vec4::new(0.3, 0.6, 0.9, 1.0))
            .with_specular(Vec4::ONE)
            .with_reflectance(0.4)
            .with_mesh(Mesh::new(MeshData::cube("crate"))?);
        scene.add_model(Model::new("crate", vec![crate_material]));
        for i in 0..8 {
            let angle = i as f32 / 8.0 * std::f32::consts::TAU;
            let mut entity = Entity::new(&format!("crate-{i}"), "crate");
            entity.set_position(Vec3::new(angle.cos() * 8.0, 0.5, angle.sin() * 8.0), false);
            entity.set_rotation_axis_angle(Vec3::Y, angle, false);
            entity.set_scale(1.0 + (i % 3) as f32 * 0.5, true);
            scene.add_entity(entity)?;
        }

        let arm = ModelLoader::load("arm", &skinned_arm(), Path::new("."), scene.textures_mut(), true)?;
        scene.add_model(arm);
        let mut arm = Entity::new("arm", "arm");
        arm.set_position(Vec3::new(0.0, 1.5, 0.0), true);
        scene.add_entity(arm)?;
        scene.set_entity_animation("arm", 0)?;

        let sign = Material::new()
            .with_diffuse(Vec4::new(1.0, 0.9, 0.3, 1.0))
            .with_mesh(Mesh::new(MeshData::cube("sign"))?);
        scene.add_model(Model::new("sign", vec![sign]));
        let mut billboard = Entity::billboard("sign", "sign", true, true);
        billboard.set_position(Vec3::new(0.0, 4.5, -4.0), true);
        scene.add_entity(billboard)?;

        scene.lights.ambient.intensity = 0.2;
        scene.lights.directional =
            DirectionalLight::new(Vec3::new(1.0, 0.95, 0.85), Vec3::new(0.4, 1.0, 0.3), 0.8);
        scene.lights.points.push(PointLight::new(
            Vec3::new(1.0, 0.3, 0.2),
            Vec3::new(4.0, 2.0, 0.0),
            2.0,
        ))?;
        scene.lights.points.push(PointLight::new(
            Vec3::new(0.2, 0.4, 1.0),
            Vec3::new(-4.0, 2.0, 0.0),
            2.0,
        ))?;

        if self.fog_density > 0.0 {
            scene.fog = Fog::new(Vec3::new(0.5, 0.55, 0.6), self.fog_density);
        }
        scene.set_skybox(Some(SkyBox::cube(Vec4::new(0.35, 0.55, 0.85, 1.0), None)?));

        scene.camera.set_position(Vec3::new(0.0, 4.0, 14.0));
        scene.camera.set_rotation(0.25, 0.0);
        Ok(())
    }

    fn input(&mut self, input: &InputState, scene: &mut Scene, elapsed_ms: f32, gui_consumed: bool) {
        let input = if gui_consumed {
            CameraInput::default()
        } else {
            input.camera_input()
        };
        self.controller.update(&mut scene.camera, &input, elapsed_ms);
    }

    fn update(&mut self, _input: &InputState, scene: &mut Scene, elapsed_ms: f32) {
        self.light_angle += elapsed_ms * 0.001;
        for i in 0..scene.lights.points.len() {
            let angle = self.light_angle + i as f32 * std::f32::consts::PI;
            if let Some(light) = scene.lights.points.get_mut(i) {
                light.position = Vec3::new(angle.cos() * 4.0, 2.0, angle.sin() * 4.0);
            }
        }
    }

    fn cleanup(&mut self) {
        log::info!("Demo finished");
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = EngineConfig {
        title: "Cascade Engine Demo".to_string(),
        width: args.width,
        height: args.height,
        vsync: !args.no_vsync,
        target_fps: args.fps,
        target_ups: args.ups,
        shadow_map_size: args.shadow_map_size,
    };

    if let Err(e) = Engine::run(config, Box::new(DemoLogic::new(args.fog)), None) {
        log::error!("Demo failed: {}", e);
        std::process::exit(1);
    }
}
