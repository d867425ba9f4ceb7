//! Skeletal animation: bones, baked frames and per-entity playback cursors
//!
//! Animations are baked once at load time into one skinning matrix per bone
//! per frame (see [`baker`]). At runtime an entity only advances an index.

pub mod baker;
mod node;

pub use baker::{bake_animation, bake_animations, frame_count};
pub use node::*;

use crate::error::{EngineError, EngineResult};
use glam::Mat4;
use std::sync::Arc;

/// Size of every skinning matrix array submitted to the GPU
pub const MAX_BONES: usize = 150;

/// Bone influences stored per vertex
pub const MAX_WEIGHTS: usize = 4;

/// Bone matrices submitted for entities without animation data.
///
/// All zero. The skinning shaders treat a vertex whose blended position has
/// no weight as unskinned and fall back to the bind pose.
pub static DEFAULT_BONE_MATRICES: [Mat4; MAX_BONES] = [Mat4::ZERO; MAX_BONES];

/// A bone referencing a skeleton node by name
#[derive(Debug, Clone, PartialEq)]
pub struct Bone {
    /// Dense id in `[0, MAX_BONES)`, the index into every frame
    pub id: usize,
    pub name: String,
    /// Mesh space to bone space
    pub offset: Mat4,
}

/// Node tree and bones of an animated model
#[derive(Debug, Clone)]
pub struct Skeleton {
    pub nodes: NodeTree,
    pub bones: Vec<Bone>,
}

/// Skinning matrices for one frame, indexed by bone id
#[derive(Debug, Clone, PartialEq)]
pub struct AnimatedFrame {
    bone_matrices: Box<[Mat4; MAX_BONES]>,
}

impl AnimatedFrame {
    /// A frame where every slot is the identity
    pub fn identity() -> Self {
        Self {
            bone_matrices: Box::new([Mat4::IDENTITY; MAX_BONES]),
        }
    }

    pub fn bone_matrices(&self) -> &[Mat4; MAX_BONES] {
        &self.bone_matrices
    }

    pub(crate) fn set(&mut self, bone_id: usize, matrix: Mat4) {
        self.bone_matrices[bone_id] = matrix;
    }
}

impl Default for AnimatedFrame {
    fn default() -> Self {
        Self::identity()
    }
}

/// A baked animation clip
#[derive(Debug, Clone)]
pub struct Animation {
    pub name: String,
    pub duration: f64,
    pub frames: Vec<AnimatedFrame>,
}

impl Animation {
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

/// Playback cursor over one of a model's animations
#[derive(Debug, Clone)]
pub struct AnimationData {
    animation: Arc<Animation>,
    frame_index: usize,
}

impl AnimationData {
    pub fn new(animation: Arc<Animation>) -> EngineResult<Self> {
        if animation.frames.is_empty() {
            return Err(EngineError::EmptyAnimation(animation.name.clone()));
        }
        Ok(Self {
            animation,
            frame_index: 0,
        })
    }

    /// Switch clips and restart from the first frame
    pub fn set_animation(&mut self, animation: Arc<Animation>) -> EngineResult<()> {
        *self = Self::new(animation)?;
        Ok(())
    }

    pub fn animation(&self) -> &Animation {
        &self.animation
    }

    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn frame_count(&self) -> usize {
        self.animation.frames.len()
    }

    pub fn current_frame(&self) -> &AnimatedFrame {
        &self.animation.frames[self.frame_index]
    }

    /// Advance one frame, wrapping to 0 after the last one
    pub fn next_frame(&mut self) {
        let next = self.frame_index + 1;
        self.frame_index = if next >= self.frame_count() { 0 } else { next };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(name: &str, frames: usize) -> Arc<Animation> {
        Arc::new(Animation {
            name: name.to_string(),
            duration: frames as f64,
            frames: vec![AnimatedFrame::identity(); frames],
        })
    }

    #[test]
    fn next_frame_wraps_to_zero() {
        let mut data = AnimationData::new(clip("walk", 3)).unwrap();
        data.next_frame();
        data.next_frame();
        assert_eq!(data.frame_index(), 2);
        data.next_frame();
        assert_eq!(data.frame_index(), 0);
    }

    #[test]
    fn frame_index_stays_in_range() {
        let mut data = AnimationData::new(clip("idle", 5)).unwrap();
        for _ in 0..23 {
            data.next_frame();
            assert!(data.frame_index() < data.frame_count());
        }
    }

    #[test]
    fn single_frame_clip_stays_on_zero() {
        let mut data = AnimationData::new(clip("pose", 1)).unwrap();
        data.next_frame();
        assert_eq!(data.frame_index(), 0);
    }

    #[test]
    fn switching_clips_resets_cursor() {
        let mut data = AnimationData::new(clip("walk", 4)).unwrap();
        data.next_frame();
        data.set_animation(clip("run", 2)).unwrap();
        assert_eq!(data.frame_index(), 0);
        assert_eq!(data.animation().name, "run");
    }

    #[test]
    fn empty_clip_is_rejected() {
        let err = AnimationData::new(clip("broken", 0)).unwrap_err();
        assert!(matches!(err, EngineError::EmptyAnimation(name) if name == "broken"));
    }

    #[test]
    fn default_matrices_are_zero() {
        assert_eq!(DEFAULT_BONE_MATRICES.len(), MAX_BONES);
        assert!(DEFAULT_BONE_MATRICES.iter().all(|m| *m == Mat4::ZERO));
    }
}
