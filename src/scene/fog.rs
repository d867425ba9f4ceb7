use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

/// Exponential-squared distance fog applied in the lighting pass
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Fog {
    pub active: bool,
    pub color: Vec3,
    pub density: f32,
}

impl Fog {
    pub fn new(color: Vec3, density: f32) -> Self {
        Self {
            active: true,
            color,
            density,
        }
    }

    pub fn uniform_data(&self) -> FogUniformData {
        FogUniformData {
            color: self.color.extend(if self.active { 1.0 } else { 0.0 }),
            params: Vec4::new(self.density, 0.0, 0.0, 0.0),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct FogUniformData {
    /// w = active flag
    pub color: Vec4,
    /// x = density
    pub params: Vec4,
}
