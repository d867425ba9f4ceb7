//! Camera-centered sky drawn behind everything else

use super::Entity;
use crate::error::EngineResult;
use crate::import::ImportedScene;
use crate::resources::{Material, Mesh, MeshData, Model, ModelLoader, TextureCache};
use glam::Vec4;
use std::path::Path;

pub const SKYBOX_MODEL_ID: &str = "skybox-model";
pub const SKYBOX_ENTITY_ID: &str = "skybox-entity";

/// Sky model plus the entity that scales it
#[derive(Debug)]
pub struct SkyBox {
    model: Model,
    entity: Entity,
}

impl SkyBox {
    pub fn new(model: Model) -> Self {
        let mut entity = Entity::new(SKYBOX_ENTITY_ID, model.id());
        entity.update_model_matrix();
        Self { model, entity }
    }

    /// Sky from an imported cube; its material supplies the texture
    pub fn load(scene: &ImportedScene, texture_dir: &Path, textures: &mut TextureCache) -> EngineResult<Self> {
        let model = ModelLoader::load(SKYBOX_MODEL_ID, scene, texture_dir, textures, false)?;
        Ok(Self::new(model))
    }

    /// Unit cube in a flat color, or textured when `texture` names a cache key
    pub fn cube(color: Vec4, texture: Option<&str>) -> EngineResult<Self> {
        let mut material = Material::new().with_diffuse(color).with_ambient(color);
        if let Some(key) = texture {
            material = material.with_texture(key);
        }
        let material = material.with_mesh(Mesh::new(MeshData::cube("skybox"))?);
        Ok(Self::new(Model::new(SKYBOX_MODEL_ID, vec![material])))
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn entity_mut(&mut self) -> &mut Entity {
        &mut self.entity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colored_cube_has_one_material() {
        let sky = SkyBox::cube(Vec4::new(0.2, 0.4, 0.8, 1.0), None).unwrap();
        assert_eq!(sky.model().materials().len(), 1);
        assert_eq!(sky.model().materials()[0].meshes()[0].vertex_count(), 24);
        assert!(sky.model().materials()[0].texture.is_none());
        assert_eq!(sky.entity().model_id(), SKYBOX_MODEL_ID);
    }
}
