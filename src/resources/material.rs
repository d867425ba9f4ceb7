//! Phong-style materials grouping the meshes they shade

use super::Mesh;
use crate::backend::{BindGroupHandle, BufferHandle};
use bytemuck::{Pod, Zeroable};
use glam::Vec4;

/// Color every material channel starts from
pub const DEFAULT_COLOR: Vec4 = Vec4::new(0.0, 0.0, 0.0, 1.0);

/// Material properties and the meshes drawn with them
#[derive(Debug, Clone)]
pub struct Material {
    pub ambient: Vec4,
    pub diffuse: Vec4,
    pub specular: Vec4,
    pub reflectance: f32,
    /// Texture cache keys
    pub texture: Option<String>,
    pub normal_map: Option<String>,
    meshes: Vec<Mesh>,
    pub(crate) gpu: Option<GpuMaterial>,
}

/// Uniform buffer and bind group of an uploaded material
#[derive(Debug, Clone, Copy)]
pub struct GpuMaterial {
    pub uniform_buffer: BufferHandle,
    pub bind_group: BindGroupHandle,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            ambient: DEFAULT_COLOR,
            diffuse: DEFAULT_COLOR,
            specular: DEFAULT_COLOR,
            reflectance: 0.0,
            texture: None,
            normal_map: None,
            meshes: Vec::new(),
            gpu: None,
        }
    }
}

impl Material {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ambient(mut self, color: Vec4) -> Self {
        self.ambient = color;
        self
    }

    pub fn with_diffuse(mut self, color: Vec4) -> Self {
        self.diffuse = color;
        self
    }

    pub fn with_specular(mut self, color: Vec4) -> Self {
        self.specular = color;
        self
    }

    pub fn with_reflectance(mut self, reflectance: f32) -> Self {
        self.reflectance = reflectance;
        self
    }

    pub fn with_texture(mut self, key: impl Into<String>) -> Self {
        self.texture = Some(key.into());
        self
    }

    pub fn with_normal_map(mut self, key: impl Into<String>) -> Self {
        self.normal_map = Some(key.into());
        self
    }

    pub fn with_mesh(mut self, mesh: Mesh) -> Self {
        self.meshes.push(mesh);
        self
    }

    pub fn add_mesh(&mut self, mesh: Mesh) {
        self.meshes.push(mesh);
    }

    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    pub fn meshes_mut(&mut self) -> &mut [Mesh] {
        &mut self.meshes
    }

    pub fn gpu(&self) -> Option<&GpuMaterial> {
        self.gpu.as_ref()
    }

    pub fn uniform_data(&self) -> MaterialUniformData {
        let flag = |set: bool| if set { 1.0 } else { 0.0 };
        MaterialUniformData {
            ambient: self.ambient,
            diffuse: self.diffuse,
            specular: self.specular,
            params: [
                self.reflectance,
                flag(self.texture.is_some()),
                flag(self.normal_map.is_some()),
                0.0,
            ],
        }
    }
}

/// Material uniform data for GPU
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MaterialUniformData {
    pub ambient: Vec4,
    pub diffuse: Vec4,
    pub specular: Vec4,
    pub params: [f32; 4], // x=reflectance, y=has texture, z=has normal map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_opaque_black() {
        let material = Material::default();
        assert_eq!(material.ambient, DEFAULT_COLOR);
        assert_eq!(material.diffuse, DEFAULT_COLOR);
        assert_eq!(material.specular, DEFAULT_COLOR);
        assert!(material.meshes().is_empty());
    }

    #[test]
    fn uniform_flags_follow_textures() {
        let plain = Material::new().with_reflectance(0.5).uniform_data();
        assert_eq!(plain.params, [0.5, 0.0, 0.0, 0.0]);

        let textured = Material::new()
            .with_texture("wall.png")
            .with_normal_map("wall_n.png")
            .uniform_data();
        assert_eq!(textured.params, [0.0, 1.0, 1.0, 0.0]);
        assert_eq!(std::mem::size_of::<MaterialUniformData>(), 64);
    }
}
