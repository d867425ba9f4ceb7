//! Backend abstraction layer
//!
//! The renderer records all GPU work through [`GraphicsBackend`]. `WgpuBackend`
//! presents to a window, `RecordingBackend` runs headless.

pub mod recording;
pub mod traits;
pub mod types;
pub mod wgpu_backend;

pub use recording::{RecordedCommand, RecordingBackend};
pub use traits::*;
pub use types::*;
