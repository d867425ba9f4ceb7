//! Skeleton node hierarchy stored as an index arena

use crate::import::ImportedNode;
use glam::Mat4;

/// Index of a node inside a [`NodeTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

/// A node in the skeleton hierarchy
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    /// Back-reference only; the tree owns every node
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Bind-pose local transform
    pub transform: Mat4,
}

/// Node arena in pre-order: a parent always has a lower index than its
/// children, and index 0 is the root.
#[derive(Debug, Clone)]
pub struct NodeTree {
    nodes: Vec<Node>,
}

impl NodeTree {
    /// Flatten an imported hierarchy, preserving parent/child structure
    pub fn from_imported(root: &ImportedNode) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.insert(root, None);
        tree
    }

    fn insert(&mut self, imported: &ImportedNode, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name: imported.name.clone(),
            parent,
            children: Vec::with_capacity(imported.children.len()),
            transform: imported.transform,
        });

        for child in &imported.children {
            let child_id = self.insert(child, Some(id));
            self.nodes[id.0].children.push(child_id);
        }

        id
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Nodes in pre-order
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name).map(NodeId)
    }

    /// World transforms given one local transform per node
    ///
    /// Relies on the pre-order layout, so each parent's global transform is
    /// final before any child reads it.
    pub fn global_transforms(&self, mut local: impl FnMut(NodeId, &Node) -> Mat4) -> Vec<Mat4> {
        let mut globals: Vec<Mat4> = Vec::with_capacity(self.nodes.len());
        for (id, node) in self.iter() {
            let parent = node.parent.map_or(Mat4::IDENTITY, |p| globals[p.0]);
            globals.push(parent * local(id, node));
        }
        globals
    }

    /// Inverse of the root's bind-pose world transform
    pub fn global_inverse_transform(&self) -> Mat4 {
        self.nodes
            .first()
            .map_or(Mat4::IDENTITY, |root| root.transform.inverse())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn sample_tree() -> NodeTree {
        let root = ImportedNode::new("root", Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0)))
            .with_child(
                ImportedNode::new("spine", Mat4::from_translation(Vec3::X))
                    .with_child(ImportedNode::new("head", Mat4::from_translation(Vec3::Y))),
            )
            .with_child(ImportedNode::new("tail", Mat4::IDENTITY));
        NodeTree::from_imported(&root)
    }

    #[test]
    fn preserves_hierarchy() {
        let tree = sample_tree();
        assert_eq!(tree.len(), 4);

        let head = tree.find("head").unwrap();
        let spine = tree.find("spine").unwrap();
        assert_eq!(tree.get(head).unwrap().parent, Some(spine));
        assert_eq!(tree.get(spine).unwrap().parent, Some(tree.root()));
        assert_eq!(tree.get(tree.root()).unwrap().children.len(), 2);
    }

    #[test]
    fn parents_precede_children() {
        let tree = sample_tree();
        for (id, node) in tree.iter() {
            if let Some(parent) = node.parent {
                assert!(parent.0 < id.0);
            }
        }
    }

    #[test]
    fn bind_pose_globals_accumulate() {
        let tree = sample_tree();
        let globals = tree.global_transforms(|_, node| node.transform);
        let head = tree.find("head").unwrap();
        let origin = globals[head.0].transform_point3(Vec3::ZERO);
        assert!((origin - Vec3::new(1.0, 2.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn global_inverse_undoes_root() {
        let tree = sample_tree();
        let root = tree.get(tree.root()).unwrap().transform;
        let product = tree.global_inverse_transform() * root;
        assert!(product.abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }
}
