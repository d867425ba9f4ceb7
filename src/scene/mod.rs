//! Scene management
//!
//! A [`Scene`] owns the model registry, the entities instancing those
//! models, lights, fog, the optional skybox and the texture cache.

mod camera;
mod camera_input;
mod entity;
mod fog;
mod light;
mod skybox;

pub use camera::*;
pub use camera_input::*;
pub use entity::*;
pub use fog::*;
pub use light::*;
pub use skybox::*;

use crate::backend::GraphicsBackend;
use crate::error::{EngineError, EngineResult};
use crate::resources::{Model, TextureCache};
use std::collections::{HashMap, HashSet};

/// Everything drawn in a frame
pub struct Scene {
    pub(crate) models: HashMap<String, Model>,
    /// Registration order, used for drawing and reverse-order release
    model_order: Vec<String>,
    entities: HashMap<String, Vec<Entity>>,
    entity_ids: HashSet<String>,
    pub(crate) textures: TextureCache,
    pub(crate) skybox: Option<SkyBox>,
    pub camera: Camera,
    pub projection: Projection,
    pub lights: SceneLights,
    pub fog: Fog,
}

impl Scene {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            models: HashMap::new(),
            model_order: Vec::new(),
            entities: HashMap::new(),
            entity_ids: HashSet::new(),
            textures: TextureCache::new(),
            skybox: None,
            camera: Camera::default(),
            projection: Projection::new(width, height),
            lights: SceneLights::default(),
            fog: Fog::default(),
        }
    }

    /// Register a model; a model with the same id is replaced
    pub fn add_model(&mut self, model: Model) {
        let id = model.id().to_string();
        if self.models.insert(id.clone(), model).is_some() {
            log::warn!("Model '{}' registered twice, keeping the latest", id);
        } else {
            self.model_order.push(id);
        }
    }

    pub fn model(&self, id: &str) -> Option<&Model> {
        self.models.get(id)
    }

    /// Models in registration order
    pub fn models(&self) -> impl Iterator<Item = &Model> {
        self.model_order.iter().filter_map(move |id| self.models.get(id))
    }

    /// Models in registration order with the entities instancing each one
    pub fn models_with_entities(&self) -> impl Iterator<Item = (&Model, &[Entity])> {
        self.models().map(move |model| (model, self.entities_of(model.id())))
    }

    /// Add an entity referencing an already registered model
    pub fn add_entity(&mut self, entity: Entity) -> EngineResult<()> {
        if !self.models.contains_key(entity.model_id()) {
            return Err(EngineError::MissingModel(entity.model_id().to_string()));
        }
        if !self.entity_ids.insert(entity.id().to_string()) {
            return Err(EngineError::DuplicateEntity(entity.id().to_string()));
        }
        self.entities
            .entry(entity.model_id().to_string())
            .or_default()
            .push(entity);
        Ok(())
    }

    pub fn remove_entity(&mut self, id: &str) -> Option<Entity> {
        if !self.entity_ids.remove(id) {
            return None;
        }
        self.entities.values_mut().find_map(|list| {
            let index = list.iter().position(|e| e.id() == id)?;
            Some(list.remove(index))
        })
    }

    pub fn entities_of(&self, model_id: &str) -> &[Entity] {
        self.entities.get(model_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values().flatten()
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities().find(|e| e.id() == id)
    }

    pub fn entity_mut(&mut self, id: &str) -> Option<&mut Entity> {
        self.entities.values_mut().flatten().find(|e| e.id() == id)
    }

    pub fn entity_count(&self) -> usize {
        self.entity_ids.len()
    }

    /// Start animation `index` of the entity's model on entity `id`
    pub fn set_entity_animation(&mut self, id: &str, index: usize) -> EngineResult<()> {
        let entity = self
            .entities
            .values_mut()
            .flatten()
            .find(|e| e.id() == id)
            .ok_or_else(|| EngineError::MissingEntity(id.to_string()))?;
        let model = self
            .models
            .get(entity.model_id())
            .ok_or_else(|| EngineError::MissingModel(entity.model_id().to_string()))?;
        entity.set_animation(model, index)
    }

    pub fn set_skybox(&mut self, skybox: Option<SkyBox>) {
        self.skybox = skybox;
    }

    pub fn skybox(&self) -> Option<&SkyBox> {
        self.skybox.as_ref()
    }

    pub fn textures(&self) -> &TextureCache {
        &self.textures
    }

    pub fn textures_mut(&mut self) -> &mut TextureCache {
        &mut self.textures
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.projection.update(width, height);
    }

    /// One fixed update: advance animations, refresh transforms, move sounds
    pub fn update(&mut self) {
        let camera_position = self.camera.position();
        for entity in self.entities.values_mut().flatten() {
            if let Some(animation) = entity.animation_mut() {
                animation.next_frame();
            }
            entity.recompute_transform(camera_position);
            entity.push_sound_position();
        }
    }

    /// Release every GPU resource owned by the scene, newest first
    pub fn cleanup<B: GraphicsBackend>(&mut self, backend: &mut B) {
        if let Some(skybox) = &mut self.skybox {
            skybox.model_mut().destroy(backend);
        }
        for id in self.model_order.iter().rev() {
            if let Some(model) = self.models.get_mut(id) {
                model.destroy(backend);
            }
        }
        self.textures.destroy(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{AnimatedFrame, Animation, NodeTree, Skeleton};
    use crate::import::ImportedNode;
    use glam::{Mat4, Vec3};

    fn animated_model(id: &str, frames: usize) -> Model {
        let skeleton = Skeleton {
            nodes: NodeTree::from_imported(&ImportedNode::new("root", Mat4::IDENTITY)),
            bones: Vec::new(),
        };
        let clip = Animation {
            name: "loop".into(),
            duration: 1.0,
            frames: vec![AnimatedFrame::identity(); frames],
        };
        Model::new(id, Vec::new()).with_animations(skeleton, vec![clip])
    }

    #[test]
    fn entities_need_a_registered_model() {
        let mut scene = Scene::new(640, 480);
        let err = scene.add_entity(Entity::new("e1", "ghost")).unwrap_err();
        assert!(matches!(err, EngineError::MissingModel(id) if id == "ghost"));
    }

    #[test]
    fn entity_ids_are_unique() {
        let mut scene = Scene::new(640, 480);
        scene.add_model(Model::new("box", Vec::new()));
        scene.add_entity(Entity::new("e1", "box")).unwrap();
        let err = scene.add_entity(Entity::new("e1", "box")).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateEntity(_)));

        assert!(scene.remove_entity("e1").is_some());
        scene.add_entity(Entity::new("e1", "box")).unwrap();
        assert_eq!(scene.entity_count(), 1);
    }

    #[test]
    fn instances_share_a_model() {
        let mut scene = Scene::new(640, 480);
        scene.add_model(Model::new("tree", Vec::new()));
        scene.add_model(Model::new("rock", Vec::new()));
        for i in 0..3 {
            scene.add_entity(Entity::new(&format!("tree-{i}"), "tree")).unwrap();
        }

        let grouped: Vec<_> = scene
            .models_with_entities()
            .map(|(m, e)| (m.id().to_string(), e.len()))
            .collect();
        assert_eq!(grouped, vec![("tree".to_string(), 3), ("rock".to_string(), 0)]);
    }

    #[test]
    fn update_advances_animation_and_transforms() {
        let mut scene = Scene::new(640, 480);
        scene.add_model(animated_model("walker", 3));

        let mut entity = Entity::new("w", "walker");
        entity.set_position(Vec3::new(2.0, 0.0, 0.0), false);
        scene.add_entity(entity).unwrap();
        scene.set_entity_animation("w", 0).unwrap();

        scene.update();
        let entity = scene.entity("w").unwrap();
        assert_eq!(entity.animation().unwrap().frame_index(), 1);
        assert_eq!(entity.model_matrix(), Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0)));

        scene.update();
        scene.update();
        assert_eq!(scene.entity("w").unwrap().animation().unwrap().frame_index(), 0);
    }

    #[test]
    fn animating_an_unknown_entity_is_reported() {
        let mut scene = Scene::new(640, 480);
        scene.add_model(animated_model("walker", 2));
        let err = scene.set_entity_animation("nobody", 0).unwrap_err();
        assert!(matches!(err, EngineError::MissingEntity(id) if id == "nobody"));
    }

    #[test]
    fn resize_updates_projection() {
        let mut scene = Scene::new(100, 100);
        scene.resize(200, 100);
        assert!((scene.projection.aspect - 2.0).abs() < 1e-6);
    }
}
