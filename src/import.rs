//! Asset import boundary
//!
//! Plain data produced by an external 3D-scene importer. Nothing in this
//! crate parses model files; a decoder fills these structs and hands them to
//! [`ModelLoader`](crate::resources::ModelLoader).

use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

/// An imported scene: node hierarchy plus the meshes, materials and
/// animations that reference it
#[derive(Debug, Clone)]
pub struct ImportedScene {
    pub root: ImportedNode,
    pub meshes: Vec<ImportedMesh>,
    pub materials: Vec<ImportedMaterial>,
    pub animations: Vec<ImportedAnimation>,
}

/// A named node with its bind-pose local transform
#[derive(Debug, Clone)]
pub struct ImportedNode {
    pub name: String,
    pub transform: Mat4,
    pub children: Vec<ImportedNode>,
}

impl ImportedNode {
    pub fn new(name: &str, transform: Mat4) -> Self {
        Self {
            name: name.to_string(),
            transform,
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: ImportedNode) -> Self {
        self.children.push(child);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ImportedMaterial {
    pub ambient: Vec4,
    pub diffuse: Vec4,
    pub specular: Vec4,
    pub reflectance: f32,
    /// Path relative to the model's texture directory
    pub diffuse_texture: Option<String>,
    pub normal_map: Option<String>,
}

impl Default for ImportedMaterial {
    fn default() -> Self {
        Self {
            ambient: Vec4::ZERO,
            diffuse: Vec4::ONE,
            specular: Vec4::ZERO,
            reflectance: 0.0,
            diffuse_texture: None,
            normal_map: None,
        }
    }
}

/// Vertex streams of one mesh. Optional streams may be empty.
#[derive(Debug, Clone, Default)]
pub struct ImportedMesh {
    pub name: String,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub tangents: Vec<Vec3>,
    pub bitangents: Vec<Vec3>,
    pub texcoords: Vec<Vec2>,
    pub indices: Vec<u32>,
    pub material_index: Option<usize>,
    pub bones: Vec<ImportedBone>,
}

/// A bone as seen by one mesh
#[derive(Debug, Clone)]
pub struct ImportedBone {
    pub name: String,
    /// Mesh space to bone space
    pub offset: Mat4,
    pub weights: Vec<VertexWeight>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexWeight {
    pub vertex_id: u32,
    pub weight: f32,
}

#[derive(Debug, Clone)]
pub struct ImportedAnimation {
    pub name: String,
    pub duration: f64,
    pub channels: Vec<NodeChannel>,
}

/// Keyframes driving one node
#[derive(Debug, Clone, Default)]
pub struct NodeChannel {
    pub node_name: String,
    pub position_keys: Vec<VectorKey>,
    pub rotation_keys: Vec<QuatKey>,
    pub scaling_keys: Vec<VectorKey>,
}

impl NodeChannel {
    /// Largest key count across the three key arrays
    pub fn max_key_count(&self) -> usize {
        self.position_keys
            .len()
            .max(self.rotation_keys.len())
            .max(self.scaling_keys.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorKey {
    pub time: f64,
    pub value: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuatKey {
    pub time: f64,
    pub value: Quat,
}
