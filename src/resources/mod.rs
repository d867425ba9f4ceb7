//! Resource management
//!
//! Meshes, materials, models and the texture cache, plus their GPU uploads.

mod material;
mod mesh;
mod model;
mod texture;

pub use material::*;
pub use mesh::*;
pub use model::*;
pub use texture::*;
