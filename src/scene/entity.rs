//! Scene entities: placed instances of a model

use crate::animation::{AnimatedFrame, AnimationData};
use crate::error::{EngineError, EngineResult};
use crate::resources::Model;
use glam::{Mat4, Quat, Vec3};
use parking_lot::Mutex;
use std::sync::Arc;

/// Positional audio source attached to an entity
pub trait SoundEmitter {
    fn set_position(&mut self, position: Vec3);
}

/// Sound handle shared with the audio system
pub type SoundHandle = Arc<Mutex<dyn SoundEmitter + Send>>;

/// How an entity derives its orientation each update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntityKind {
    #[default]
    Plain,
    /// Turns to face the camera about the flagged axes
    Billboard { x: bool, y: bool },
}

/// An instance of a model placed in the scene
pub struct Entity {
    id: String,
    model_id: String,
    kind: EntityKind,
    position: Vec3,
    rotation: Quat,
    scale: f32,
    model_matrix: Mat4,
    animation: Option<AnimationData>,
    sound: Option<SoundHandle>,
}

impl Entity {
    pub fn new(id: &str, model_id: &str) -> Self {
        Self {
            id: id.to_string(),
            model_id: model_id.to_string(),
            kind: EntityKind::Plain,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: 1.0,
            model_matrix: Mat4::IDENTITY,
            animation: None,
            sound: None,
        }
    }

    pub fn billboard(id: &str, model_id: &str, x: bool, y: bool) -> Self {
        Self {
            kind: EntityKind::Billboard { x, y },
            ..Self::new(id, model_id)
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn is_billboard(&self) -> bool {
        matches!(self.kind, EntityKind::Billboard { .. })
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn model_matrix(&self) -> Mat4 {
        self.model_matrix
    }

    pub fn set_position(&mut self, position: Vec3, recompute: bool) {
        self.position = position;
        if recompute {
            self.update_model_matrix();
        }
    }

    pub fn set_rotation(&mut self, rotation: Quat, recompute: bool) {
        self.rotation = rotation;
        if recompute {
            self.update_model_matrix();
        }
    }

    /// Rotation of `angle` radians about `axis`
    pub fn set_rotation_axis_angle(&mut self, axis: Vec3, angle: f32, recompute: bool) {
        self.set_rotation(Quat::from_axis_angle(axis.normalize_or_zero(), angle), recompute);
    }

    pub fn set_scale(&mut self, scale: f32, recompute: bool) {
        self.scale = scale;
        if recompute {
            self.update_model_matrix();
        }
    }

    /// `T * R * S` from the current position, rotation and scale
    pub fn update_model_matrix(&mut self) {
        self.model_matrix =
            Mat4::from_scale_rotation_translation(Vec3::splat(self.scale), self.rotation, self.position);
    }

    /// Per-update transform refresh; billboards turn toward `camera_position` first
    pub fn recompute_transform(&mut self, camera_position: Vec3) {
        if let EntityKind::Billboard { x, y } = self.kind {
            let direction = (camera_position - self.position).normalize_or_zero();
            let mut rotation = Quat::IDENTITY;
            if direction != Vec3::ZERO {
                if x {
                    rotation *= Quat::from_rotation_x(-direction.y.atan2(direction.z));
                }
                if y {
                    rotation *= Quat::from_rotation_y(-(-direction.x).atan2(direction.z));
                }
            }
            self.rotation = rotation;
        }
        self.update_model_matrix();
    }

    /// Start playing animation `index` of `model` from its first frame
    pub fn set_animation(&mut self, model: &Model, index: usize) -> EngineResult<()> {
        let animation = model.animation(index).ok_or_else(|| EngineError::AnimationOutOfRange {
            model: model.id().to_string(),
            index,
            count: model.animations().len(),
        })?;
        self.animation = Some(AnimationData::new(animation)?);
        Ok(())
    }

    pub fn clear_animation(&mut self) {
        self.animation = None;
    }

    pub fn animation(&self) -> Option<&AnimationData> {
        self.animation.as_ref()
    }

    pub fn animation_mut(&mut self) -> Option<&mut AnimationData> {
        self.animation.as_mut()
    }

    /// Frame whose skinning matrices this entity submits, if animated
    pub fn current_frame(&self) -> Option<&AnimatedFrame> {
        self.animation.as_ref().map(AnimationData::current_frame)
    }

    pub fn set_sound(&mut self, sound: Option<SoundHandle>) {
        self.sound = sound;
    }

    pub fn sound(&self) -> Option<&SoundHandle> {
        self.sound.as_ref()
    }

    /// Forward the entity position to its sound source
    pub fn push_sound_position(&self) {
        if let Some(sound) = &self.sound {
            sound.lock().set_position(self.position);
        }
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("model_id", &self.model_id)
            .field("kind", &self.kind)
            .field("position", &self.position)
            .field("rotation", &self.rotation)
            .field("scale", &self.scale)
            .field("animated", &self.animation.is_some())
            .field("has_sound", &self.sound.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{AnimatedFrame, Animation, NodeTree, Skeleton};
    use crate::import::ImportedNode;
    use std::f32::consts::FRAC_PI_2;

    fn trs(entity: &Entity) -> Mat4 {
        Mat4::from_translation(entity.position())
            * Mat4::from_quat(entity.rotation())
            * Mat4::from_scale(Vec3::splat(entity.scale()))
    }

    #[test]
    fn recompute_true_updates_matrix() {
        let mut entity = Entity::new("crate", "box");
        entity.set_position(Vec3::new(1.0, 2.0, 3.0), true);
        entity.set_rotation_axis_angle(Vec3::Y, FRAC_PI_2, true);
        entity.set_scale(2.0, true);
        assert!(entity.model_matrix().abs_diff_eq(trs(&entity), 1e-6));
    }

    #[test]
    fn recompute_false_leaves_matrix_stale() {
        let mut entity = Entity::new("crate", "box");
        entity.set_position(Vec3::X, false);
        entity.set_scale(3.0, false);
        assert_eq!(entity.model_matrix(), Mat4::IDENTITY);

        entity.update_model_matrix();
        assert!(entity.model_matrix().abs_diff_eq(trs(&entity), 1e-6));
    }

    #[test]
    fn billboard_faces_camera() {
        let mut entity = Entity::billboard("sign", "quad", false, true);
        entity.set_position(Vec3::ZERO, true);
        entity.recompute_transform(Vec3::new(5.0, 0.0, 0.0));

        let facing = entity.rotation() * Vec3::Z;
        assert!((facing - Vec3::X).length() < 1e-5);
        assert!(entity.model_matrix().abs_diff_eq(trs(&entity), 1e-6));
    }

    #[test]
    fn x_billboard_tilts_toward_camera_above() {
        let mut entity = Entity::billboard("sign", "quad", true, false);
        entity.set_position(Vec3::ZERO, true);
        entity.recompute_transform(Vec3::new(0.0, 5.0, 5.0));

        let facing = entity.rotation() * Vec3::Z;
        assert!((facing - Vec3::new(0.0, 1.0, 1.0).normalize()).length() < 1e-5);

        entity.recompute_transform(Vec3::new(0.0, 5.0, 0.0));
        assert!((entity.rotation() * Vec3::Z - Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn two_axis_billboard_applies_x_before_y() {
        let mut entity = Entity::billboard("sign", "quad", true, true);
        entity.set_position(Vec3::new(1.0, 0.0, -2.0), true);
        let camera = Vec3::new(4.0, 4.0, 3.0);
        entity.recompute_transform(camera);

        let dir = (camera - entity.position()).normalize();
        let pitch = Quat::from_rotation_x(-dir.y.atan2(dir.z));
        let yaw = Quat::from_rotation_y(-(-dir.x).atan2(dir.z));
        assert!(entity.rotation().abs_diff_eq(pitch * yaw, 1e-5));
        assert!(!entity.rotation().abs_diff_eq(yaw * pitch, 1e-3));
        assert!(entity.model_matrix().abs_diff_eq(trs(&entity), 1e-5));
    }

    #[test]
    fn billboard_at_camera_keeps_identity() {
        let mut entity = Entity::billboard("sign", "quad", true, true);
        entity.set_position(Vec3::ONE, true);
        entity.recompute_transform(Vec3::ONE);
        assert_eq!(entity.rotation(), Quat::IDENTITY);
    }

    #[test]
    fn plain_entities_ignore_camera() {
        let mut entity = Entity::new("rock", "stone");
        entity.set_rotation_axis_angle(Vec3::X, 0.3, false);
        let rotation = entity.rotation();
        entity.recompute_transform(Vec3::new(10.0, 0.0, 0.0));
        assert_eq!(entity.rotation(), rotation);
        assert!(entity.model_matrix().abs_diff_eq(trs(&entity), 1e-6));
    }

    #[test]
    fn animation_index_is_checked() {
        let skeleton = Skeleton {
            nodes: NodeTree::from_imported(&ImportedNode::new("root", Mat4::IDENTITY)),
            bones: Vec::new(),
        };
        let clip = Animation {
            name: "idle".into(),
            duration: 1.0,
            frames: vec![AnimatedFrame::identity(); 2],
        };
        let model = Model::new("bob", Vec::new()).with_animations(skeleton, vec![clip]);

        let mut entity = Entity::new("bob-1", "bob");
        let err = entity.set_animation(&model, 1).unwrap_err();
        assert!(matches!(err, EngineError::AnimationOutOfRange { index: 1, count: 1, .. }));

        entity.set_animation(&model, 0).unwrap();
        assert_eq!(entity.animation().unwrap().frame_index(), 0);
    }

    struct Recorder(Vec<Vec3>);

    impl SoundEmitter for Recorder {
        fn set_position(&mut self, position: Vec3) {
            self.0.push(position);
        }
    }

    #[test]
    fn sound_follows_entity() {
        let recorder = Arc::new(Mutex::new(Recorder(Vec::new())));
        let mut entity = Entity::new("radio", "box");
        entity.set_sound(Some(recorder.clone()));
        entity.set_position(Vec3::new(4.0, 0.0, 1.0), true);
        entity.push_sound_position();

        assert_eq!(recorder.lock().0, vec![Vec3::new(4.0, 0.0, 1.0)]);
    }
}
