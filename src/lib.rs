//! Cascade Engine - a small real-time 3D engine on wgpu
//!
//! # Features
//! - Deferred rendering: G-buffer, fullscreen lighting, skybox
//! - Cascaded shadow maps for the directional light
//! - Skeletal animation baked into per-frame bone matrices at load time
//! - Billboard entities, distance fog, point and spot lights
//! - Headless recording backend for testing the pipeline without a GPU

pub mod animation;
pub mod backend;
pub mod engine;
pub mod error;
pub mod import;
pub mod pipeline;
pub mod resources;
pub mod scene;
pub mod shadow;
pub mod window;

pub use engine::{AppLogic, Engine, FrameClock, FrameTick, GuiOverlay, Runtime};
pub use error::{EngineError, EngineResult};
pub use pipeline::Renderer;
pub use scene::Scene;
pub use window::{InputState, Window};

// Re-export wgpu backend for direct access
pub use backend::wgpu_backend::WgpuBackend;

/// Configuration for initializing the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Window title
    pub title: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    /// Enable vsync
    pub vsync: bool,
    /// Frame cap; 0 renders every loop iteration
    pub target_fps: u32,
    /// Fixed update rate
    pub target_ups: u32,
    /// Edge length of each cascade's depth map
    pub shadow_map_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "Cascade Engine".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
            target_fps: 0,
            target_ups: 30,
            shadow_map_size: 4096,
        }
    }
}
