//! Engine error type
//!
//! Everything here is a load or configuration failure. None of it is
//! recovered from; callers propagate it out of `Engine::run`.

use crate::backend::BackendError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Model '{0}' is not registered")]
    MissingModel(String),
    #[error("Entity '{0}' does not exist")]
    MissingEntity(String),
    #[error("Entity id '{0}' is already in use")]
    DuplicateEntity(String),
    #[error("Animation index {index} out of range for model '{model}' ({count} animations)")]
    AnimationOutOfRange {
        model: String,
        index: usize,
        count: usize,
    },
    #[error("Animation '{0}' has no frames")]
    EmptyAnimation(String),
    #[error("Mesh '{0}' has no vertices or no indices")]
    EmptyGeometry(String),
    #[error("Mesh '{mesh}' is malformed: {reason}")]
    MalformedGeometry { mesh: String, reason: String },
    #[error("Model '{model}' uses {count} bones, the limit is {max}")]
    TooManyBones { model: String, count: usize, max: usize },
    #[error("Cannot add more than {0} lights of this kind")]
    LightCapacity(usize),
    #[error("Failed to load texture '{path}': {reason}")]
    Texture { path: String, reason: String },
    #[error("Window error: {0}")]
    Window(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type EngineResult<T> = Result<T, EngineError>;
