//! Models and conversion of imported scenes into them

use super::{Material, Mesh, MeshData, TextureCache, DEFAULT_COLOR};
use crate::animation::{bake_animations, baker::collect_bones, Animation, NodeTree, Skeleton, MAX_WEIGHTS};
use crate::backend::{GraphicsBackend, SkinnedVertex};
use crate::error::{EngineError, EngineResult};
use crate::import::{ImportedMaterial, ImportedMesh, ImportedScene};
use glam::{Vec2, Vec3};
use std::path::Path;
use std::sync::Arc;

/// Reusable renderable: materials with their meshes, plus baked animations
#[derive(Debug, Clone)]
pub struct Model {
    id: String,
    materials: Vec<Material>,
    animations: Vec<Arc<Animation>>,
    skeleton: Option<Skeleton>,
}

impl Model {
    pub fn new(id: &str, materials: Vec<Material>) -> Self {
        Self {
            id: id.to_string(),
            materials,
            animations: Vec::new(),
            skeleton: None,
        }
    }

    pub fn with_animations(mut self, skeleton: Skeleton, animations: Vec<Animation>) -> Self {
        self.skeleton = Some(skeleton);
        self.animations = animations.into_iter().map(Arc::new).collect();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    pub fn materials_mut(&mut self) -> &mut [Material] {
        &mut self.materials
    }

    pub fn animations(&self) -> &[Arc<Animation>] {
        &self.animations
    }

    pub fn animation(&self, index: usize) -> Option<Arc<Animation>> {
        self.animations.get(index).cloned()
    }

    pub fn skeleton(&self) -> Option<&Skeleton> {
        self.skeleton.as_ref()
    }

    pub fn is_animated(&self) -> bool {
        !self.animations.is_empty()
    }

    /// Upload the vertex and index buffers of every mesh
    pub fn upload_meshes<B: GraphicsBackend>(&mut self, backend: &mut B) -> EngineResult<()> {
        for material in &mut self.materials {
            for mesh in material.meshes_mut() {
                mesh.upload(backend)?;
            }
        }
        Ok(())
    }

    pub fn destroy<B: GraphicsBackend>(&mut self, backend: &mut B) {
        for material in self.materials.iter_mut().rev() {
            for mesh in material.meshes_mut().iter_mut().rev() {
                mesh.destroy(backend);
            }
            if let Some(gpu) = material.gpu.take() {
                backend.destroy_bind_group(gpu.bind_group);
                backend.destroy_buffer(gpu.uniform_buffer);
            }
        }
    }
}

/// Builds [`Model`]s from importer output
pub struct ModelLoader;

impl ModelLoader {
    /// Convert an imported scene into a model
    ///
    /// Texture paths are resolved against `texture_dir` and loaded through
    /// `textures`. With `animated` set, bones are collected and every
    /// animation is baked.
    pub fn load(
        id: &str,
        scene: &ImportedScene,
        texture_dir: &Path,
        textures: &mut TextureCache,
        animated: bool,
    ) -> EngineResult<Model> {
        let mut materials = scene
            .materials
            .iter()
            .map(|m| Self::process_material(m, texture_dir, textures))
            .collect::<EngineResult<Vec<_>>>()?;
        let default_material = materials.len();
        materials.push(Material::default());

        let mut bone_base = 0;
        for imported in &scene.meshes {
            let mesh = Mesh::new(Self::process_mesh(imported, bone_base, animated)?)?;
            if animated {
                bone_base += imported.bones.len() as u32;
            }

            let index = match imported.material_index {
                Some(i) if i < default_material => i,
                Some(i) => {
                    log::warn!(
                        "Mesh '{}' of model '{}' references missing material {}, using default",
                        imported.name,
                        id,
                        i
                    );
                    default_material
                }
                None => default_material,
            };
            materials[index].add_mesh(mesh);
        }

        if materials[default_material].meshes().is_empty() {
            materials.pop();
        }

        let mut model = Model::new(id, materials);
        if animated {
            let skeleton = Skeleton {
                nodes: NodeTree::from_imported(&scene.root),
                bones: collect_bones(id, &scene.meshes)?,
            };
            let animations = bake_animations(&skeleton, &scene.animations);
            model = model.with_animations(skeleton, animations);
        }

        log::info!(
            "Loaded model '{}': {} materials, {} meshes, {} animations",
            id,
            model.materials().len(),
            scene.meshes.len(),
            model.animations().len()
        );

        Ok(model)
    }

    fn process_material(
        imported: &ImportedMaterial,
        texture_dir: &Path,
        textures: &mut TextureCache,
    ) -> EngineResult<Material> {
        let mut material = Material::new()
            .with_ambient(imported.ambient)
            .with_diffuse(imported.diffuse)
            .with_specular(imported.specular)
            .with_reflectance(imported.reflectance);

        if let Some(path) = &imported.diffuse_texture {
            material = material.with_texture(textures.create_texture(texture_dir.join(path))?);
            material.diffuse = DEFAULT_COLOR;
        }
        if let Some(path) = &imported.normal_map {
            material = material.with_normal_map(textures.create_texture(texture_dir.join(path))?);
        }

        Ok(material)
    }

    fn process_mesh(imported: &ImportedMesh, bone_base: u32, animated: bool) -> EngineResult<MeshData> {
        let count = imported.positions.len();
        if count == 0 || imported.indices.is_empty() {
            return Err(EngineError::EmptyGeometry(imported.name.clone()));
        }

        let malformed = |reason: String| EngineError::MalformedGeometry {
            mesh: imported.name.clone(),
            reason,
        };
        let stream = |name: &str, values: &[Vec3]| -> EngineResult<Vec<Vec3>> {
            match values.len() {
                0 => Ok(vec![Vec3::ZERO; count]),
                n if n == count => Ok(values.to_vec()),
                n => Err(malformed(format!("{n} {name} for {count} positions"))),
            }
        };

        let normals = stream("normals", &imported.normals)?;
        let tangents = stream("tangents", &imported.tangents)?;
        let bitangents = stream("bitangents", &imported.bitangents)?;
        let uvs: Vec<Vec2> = match imported.texcoords.len() {
            0 => vec![Vec2::ZERO; count],
            n if n == count => imported.texcoords.iter().map(|uv| Vec2::new(uv.x, 1.0 - uv.y)).collect(),
            n => return Err(malformed(format!("{n} texcoords for {count} positions"))),
        };

        let mut influences: Vec<Vec<(u32, f32)>> = vec![Vec::new(); count];
        if animated {
            for (i, bone) in imported.bones.iter().enumerate() {
                for weight in &bone.weights {
                    let slot = influences.get_mut(weight.vertex_id as usize).ok_or_else(|| {
                        malformed(format!(
                            "bone '{}' weights vertex {} of {count}",
                            bone.name, weight.vertex_id
                        ))
                    })?;
                    slot.push((bone_base + i as u32, weight.weight));
                }
            }
        }

        let vertices = (0..count)
            .map(|v| {
                let mut bone_indices = [0; MAX_WEIGHTS];
                let mut bone_weights = [0.0; MAX_WEIGHTS];
                for (slot, (bone, weight)) in influences[v].iter().take(MAX_WEIGHTS).enumerate() {
                    bone_indices[slot] = *bone;
                    bone_weights[slot] = *weight;
                }
                SkinnedVertex {
                    position: imported.positions[v],
                    normal: normals[v],
                    tangent: tangents[v],
                    bitangent: bitangents[v],
                    uv: uvs[v],
                    bone_indices,
                    bone_weights,
                }
            })
            .collect();

        Ok(MeshData::new(&imported.name, vertices, imported.indices.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::MAX_BONES;
    use crate::import::{ImportedAnimation, ImportedBone, ImportedNode, NodeChannel, VectorKey, VertexWeight};
    use glam::{Mat4, Vec4};

    fn triangle(name: &str, material_index: Option<usize>) -> ImportedMesh {
        ImportedMesh {
            name: name.to_string(),
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            texcoords: vec![Vec2::new(0.0, 0.25), Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0)],
            indices: vec![0, 1, 2],
            material_index,
            ..Default::default()
        }
    }

    fn scene(meshes: Vec<ImportedMesh>, materials: Vec<ImportedMaterial>) -> ImportedScene {
        ImportedScene {
            root: ImportedNode::new("root", Mat4::IDENTITY).with_child(ImportedNode::new("arm", Mat4::IDENTITY)),
            meshes,
            materials,
            animations: Vec::new(),
        }
    }

    fn load(scene: &ImportedScene, animated: bool) -> EngineResult<Model> {
        ModelLoader::load("test", scene, Path::new("."), &mut TextureCache::new(), animated)
    }

    #[test]
    fn meshes_are_grouped_under_their_material() {
        let red = ImportedMaterial {
            diffuse: Vec4::new(1.0, 0.0, 0.0, 1.0),
            ..Default::default()
        };
        let model = load(
            &scene(vec![triangle("a", Some(0)), triangle("b", Some(0))], vec![red]),
            false,
        )
        .unwrap();

        assert_eq!(model.materials().len(), 1);
        assert_eq!(model.materials()[0].meshes().len(), 2);
        assert_eq!(model.materials()[0].diffuse, Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert!(!model.is_animated());
    }

    #[test]
    fn missing_material_falls_back_to_default() {
        let model = load(&scene(vec![triangle("stray", Some(4))], Vec::new()), false).unwrap();
        assert_eq!(model.materials().len(), 1);
        assert_eq!(model.materials()[0].diffuse, DEFAULT_COLOR);
        assert_eq!(model.materials()[0].meshes()[0].name(), "stray");
    }

    #[test]
    fn texcoords_are_flipped() {
        let model = load(&scene(vec![triangle("uv", None)], Vec::new()), false).unwrap();
        let vertices = &model.materials()[0].meshes()[0].data().vertices;
        assert_eq!(vertices[0].uv, Vec2::new(0.0, 0.75));
        assert_eq!(vertices[2].uv, Vec2::new(0.0, 0.0));
        assert_eq!(vertices[1].normal, Vec3::ZERO);
    }

    #[test]
    fn empty_geometry_fails_the_load() {
        let mut empty = triangle("hollow", None);
        empty.indices.clear();
        let err = load(&scene(vec![empty], Vec::new()), false).unwrap_err();
        assert!(matches!(err, EngineError::EmptyGeometry(name) if name == "hollow"));
    }

    #[test]
    fn missing_texture_fails_the_load() {
        let material = ImportedMaterial {
            diffuse_texture: Some("no_such_texture.png".into()),
            ..Default::default()
        };
        let err = load(&scene(vec![triangle("t", Some(0))], vec![material]), false).unwrap_err();
        assert!(matches!(err, EngineError::Texture { .. }));
    }

    #[test]
    fn weights_out_of_range_are_malformed() {
        let mut mesh = triangle("skin", None);
        mesh.bones.push(ImportedBone {
            name: "arm".into(),
            offset: Mat4::IDENTITY,
            weights: vec![VertexWeight { vertex_id: 7, weight: 1.0 }],
        });
        let err = load(&scene(vec![mesh], Vec::new()), true).unwrap_err();
        assert!(matches!(err, EngineError::MalformedGeometry { .. }));
    }

    #[test]
    fn animated_load_offsets_bone_ids_per_mesh() {
        let bone = |name: &str| ImportedBone {
            name: name.to_string(),
            offset: Mat4::IDENTITY,
            weights: vec![VertexWeight { vertex_id: 0, weight: 1.0 }],
        };
        let mut first = triangle("first", None);
        first.bones = vec![bone("root"), bone("arm")];
        let mut second = triangle("second", None);
        second.bones = vec![bone("arm")];

        let mut imported = scene(vec![first, second], Vec::new());
        imported.animations.push(ImportedAnimation {
            name: "wave".into(),
            duration: 2.0,
            channels: vec![NodeChannel {
                node_name: "arm".into(),
                position_keys: vec![
                    VectorKey { time: 0.0, value: Vec3::ZERO },
                    VectorKey { time: 1.0, value: Vec3::X },
                ],
                ..Default::default()
            }],
        });

        let model = load(&imported, true).unwrap();
        let meshes = model.materials()[0].meshes();
        assert_eq!(meshes[0].data().vertices[0].bone_indices, [0, 1, 0, 0]);
        assert_eq!(meshes[0].data().vertices[0].bone_weights, [1.0, 1.0, 0.0, 0.0]);
        assert_eq!(meshes[1].data().vertices[0].bone_indices[0], 2);

        let skeleton = model.skeleton().unwrap();
        assert_eq!(skeleton.bones.len(), 3);
        let clip = model.animation(0).unwrap();
        assert_eq!(clip.frame_count(), 2);
        assert_eq!(clip.frames[1].bone_matrices().len(), MAX_BONES);
        let expected = Mat4::from_translation(Vec3::X);
        assert!(clip.frames[1].bone_matrices()[2].abs_diff_eq(expected, 1e-6));
    }
}
