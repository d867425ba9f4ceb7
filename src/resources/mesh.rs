//! Mesh data and GPU buffers

use crate::backend::*;
use crate::error::{EngineError, EngineResult};
use glam::{Vec2, Vec3};

/// CPU-side geometry of a mesh
#[derive(Debug, Clone)]
pub struct MeshData {
    pub name: String,
    pub vertices: Vec<SkinnedVertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(name: &str, vertices: Vec<SkinnedVertex>, indices: Vec<u32>) -> Self {
        Self {
            name: name.to_string(),
            vertices,
            indices,
        }
    }

    /// Reject geometry the GPU cannot draw
    pub fn validate(&self) -> EngineResult<()> {
        if self.vertices.is_empty() || self.indices.is_empty() {
            return Err(EngineError::EmptyGeometry(self.name.clone()));
        }
        if let Some(bad) = self.indices.iter().find(|&&i| i as usize >= self.vertices.len()) {
            return Err(EngineError::MalformedGeometry {
                mesh: self.name.clone(),
                reason: format!("index {bad} exceeds {} vertices", self.vertices.len()),
            });
        }
        Ok(())
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Unit cube centered at the origin, faces wound counter-clockwise from outside
    pub fn cube(name: &str) -> Self {
        let faces = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (-Vec3::Z, -Vec3::X, Vec3::Y),
            (Vec3::X, -Vec3::Z, Vec3::Y),
            (-Vec3::X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, -Vec3::Z),
            (-Vec3::Y, Vec3::X, Vec3::Z),
        ];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, tangent, bitangent) in faces {
            let base = vertices.len() as u32;
            for (u, v) in [(0.0, 1.0), (1.0, 1.0), (1.0, 0.0), (0.0, 0.0)] {
                let position = (normal + tangent * (u * 2.0 - 1.0) + bitangent * (1.0 - v * 2.0)) * 0.5;
                vertices.push(SkinnedVertex {
                    position,
                    normal,
                    tangent,
                    bitangent,
                    uv: Vec2::new(u, v),
                    bone_indices: [0; 4],
                    bone_weights: [0.0; 4],
                });
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        Self::new(name, vertices, indices)
    }

    /// Square in the XZ plane facing +Y
    pub fn plane(name: &str, size: f32) -> Self {
        let half = size * 0.5;
        let vertices = [(-half, half, 0.0, 1.0), (half, half, 1.0, 1.0), (half, -half, 1.0, 0.0), (-half, -half, 0.0, 0.0)]
            .into_iter()
            .map(|(x, z, u, v)| SkinnedVertex {
                position: Vec3::new(x, 0.0, z),
                normal: Vec3::Y,
                tangent: Vec3::X,
                bitangent: -Vec3::Z,
                uv: Vec2::new(u, v),
                bone_indices: [0; 4],
                bone_weights: [0.0; 4],
            })
            .collect();

        Self::new(name, vertices, vec![0, 1, 2, 0, 2, 3])
    }
}

/// Immutable GPU buffers of an uploaded mesh
#[derive(Debug, Clone, Copy)]
pub struct GpuMesh {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
}

/// A mesh owned by exactly one material
#[derive(Debug, Clone)]
pub struct Mesh {
    data: MeshData,
    gpu: Option<GpuMesh>,
}

impl Mesh {
    pub fn new(data: MeshData) -> EngineResult<Self> {
        data.validate()?;
        Ok(Self { data, gpu: None })
    }

    pub fn data(&self) -> &MeshData {
        &self.data
    }

    pub fn name(&self) -> &str {
        &self.data.name
    }

    pub fn vertex_count(&self) -> usize {
        self.data.vertices.len()
    }

    pub fn gpu(&self) -> Option<&GpuMesh> {
        self.gpu.as_ref()
    }

    /// Create the vertex and index buffers once
    pub fn upload<B: GraphicsBackend>(&mut self, backend: &mut B) -> EngineResult<()> {
        if self.gpu.is_some() {
            return Ok(());
        }

        let vertex_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} vertices", self.data.name)),
                size: self.data.vertex_bytes().len() as u64,
                usage: BufferUsage::VERTEX,
            },
            self.data.vertex_bytes(),
        )?;
        let index_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} indices", self.data.name)),
                size: self.data.index_bytes().len() as u64,
                usage: BufferUsage::INDEX,
            },
            self.data.index_bytes(),
        )?;

        self.gpu = Some(GpuMesh {
            vertex_buffer,
            index_buffer,
            index_count: self.data.indices.len() as u32,
        });
        Ok(())
    }

    pub fn destroy<B: GraphicsBackend>(&mut self, backend: &mut B) {
        if let Some(gpu) = self.gpu.take() {
            backend.destroy_buffer(gpu.index_buffer);
            backend.destroy_buffer(gpu.vertex_buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_has_outward_normals() {
        let cube = MeshData::cube("cube");
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        for v in &cube.vertices {
            assert!(v.position.dot(v.normal) > 0.0);
            assert!((v.position.abs().max_element() - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn empty_geometry_is_rejected() {
        let err = Mesh::new(MeshData::new("empty", Vec::new(), Vec::new())).unwrap_err();
        assert!(matches!(err, EngineError::EmptyGeometry(name) if name == "empty"));
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut data = MeshData::plane("floor", 1.0);
        data.indices.push(9);
        assert!(matches!(
            Mesh::new(data).unwrap_err(),
            EngineError::MalformedGeometry { .. }
        ));
    }

    #[test]
    fn upload_happens_once() {
        let mut backend = RecordingBackend::new(4, 4);
        let mut mesh = Mesh::new(MeshData::plane("floor", 2.0)).unwrap();
        mesh.upload(&mut backend).unwrap();
        mesh.upload(&mut backend).unwrap();

        assert_eq!(backend.buffer_count(), 2);
        assert_eq!(mesh.gpu().unwrap().index_count, 6);

        mesh.destroy(&mut backend);
        assert_eq!(backend.buffer_count(), 0);
        assert!(mesh.gpu().is_none());
    }
}
