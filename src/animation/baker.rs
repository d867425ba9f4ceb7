//! Bakes imported keyframe channels into per-frame skinning matrices
//!
//! Keys are sampled nearest-key with clamping: frame `f` reads key
//! `min(f, key_count - 1)` of each array and never interpolates. Playback
//! therefore steps between keys exactly as authored.

use super::{AnimatedFrame, Animation, Bone, NodeTree, Skeleton, MAX_BONES};
use crate::error::{EngineError, EngineResult};
use crate::import::{ImportedAnimation, ImportedMesh, NodeChannel};
use glam::{Mat4, Quat, Vec3};
use std::collections::HashMap;

/// Assign dense ids to every bone of every mesh, in encounter order
pub fn collect_bones(model_id: &str, meshes: &[ImportedMesh]) -> EngineResult<Vec<Bone>> {
    let bones: Vec<Bone> = meshes
        .iter()
        .flat_map(|mesh| mesh.bones.iter())
        .enumerate()
        .map(|(id, bone)| Bone {
            id,
            name: bone.name.clone(),
            offset: bone.offset,
        })
        .collect();

    if bones.len() > MAX_BONES {
        return Err(EngineError::TooManyBones {
            model: model_id.to_string(),
            count: bones.len(),
            max: MAX_BONES,
        });
    }

    Ok(bones)
}

/// Number of frames an animation bakes to: the largest key array of any channel
pub fn frame_count(animation: &ImportedAnimation) -> usize {
    animation
        .channels
        .iter()
        .map(NodeChannel::max_key_count)
        .max()
        .unwrap_or(0)
}

fn clamped<T: Copy>(keys: &[T], frame: usize) -> Option<T> {
    keys.get(frame.min(keys.len().checked_sub(1)?)).copied()
}

/// Local transform of a channel at `frame`, composed as `T * R * S`
fn sample_channel(channel: &NodeChannel, frame: usize) -> Mat4 {
    let translation = clamped(&channel.position_keys, frame).map_or(Vec3::ZERO, |k| k.value);
    let rotation = clamped(&channel.rotation_keys, frame).map_or(Quat::IDENTITY, |k| k.value);
    let scale = clamped(&channel.scaling_keys, frame).map_or(Vec3::ONE, |k| k.value);

    Mat4::from_translation(translation) * Mat4::from_quat(rotation) * Mat4::from_scale(scale)
}

/// Bake one animation against a node tree and bone list
pub fn bake_animation(nodes: &NodeTree, bones: &[Bone], animation: &ImportedAnimation) -> Animation {
    let global_inverse = nodes.global_inverse_transform();

    let channels: HashMap<&str, &NodeChannel> = animation
        .channels
        .iter()
        .map(|c| (c.node_name.as_str(), c))
        .collect();

    let mut bones_by_node: HashMap<&str, Vec<&Bone>> = HashMap::new();
    for bone in bones {
        bones_by_node.entry(bone.name.as_str()).or_default().push(bone);
    }

    let frames = (0..frame_count(animation))
        .map(|f| {
            let globals = nodes.global_transforms(|_, node| {
                channels
                    .get(node.name.as_str())
                    .map_or(node.transform, |channel| sample_channel(channel, f))
            });

            let mut frame = AnimatedFrame::identity();
            for (id, node) in nodes.iter() {
                for bone in bones_by_node.get(node.name.as_str()).into_iter().flatten() {
                    frame.set(bone.id, global_inverse * globals[id.0] * bone.offset);
                }
            }
            frame
        })
        .collect::<Vec<_>>();

    log::debug!(
        "Baked animation '{}': {} frames, {} channels",
        animation.name,
        frames.len(),
        animation.channels.len()
    );

    Animation {
        name: animation.name.clone(),
        duration: animation.duration,
        frames,
    }
}

/// Bake every animation of a skeleton
pub fn bake_animations(skeleton: &Skeleton, animations: &[ImportedAnimation]) -> Vec<Animation> {
    animations
        .iter()
        .map(|a| bake_animation(&skeleton.nodes, &skeleton.bones, a))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::{ImportedBone, ImportedNode, QuatKey, VectorKey};

    fn vkey(value: Vec3) -> VectorKey {
        VectorKey { time: 0.0, value }
    }

    fn channel(name: &str, positions: &[Vec3]) -> NodeChannel {
        NodeChannel {
            node_name: name.to_string(),
            position_keys: positions.iter().copied().map(vkey).collect(),
            rotation_keys: vec![QuatKey {
                time: 0.0,
                value: Quat::IDENTITY,
            }],
            scaling_keys: vec![vkey(Vec3::ONE)],
        }
    }

    fn arm() -> NodeTree {
        let root = ImportedNode::new("root", Mat4::from_translation(Vec3::new(0.0, 0.0, 2.0)))
            .with_child(
                ImportedNode::new("upper", Mat4::from_translation(Vec3::Y))
                    .with_child(ImportedNode::new("lower", Mat4::from_translation(Vec3::Y))),
            );
        NodeTree::from_imported(&root)
    }

    fn bone(id: usize, name: &str, offset: Mat4) -> Bone {
        Bone {
            id,
            name: name.to_string(),
            offset,
        }
    }

    #[test]
    fn frame_count_is_largest_key_array() {
        let keys = |n: usize| vec![Vec3::ZERO; n];
        let animation = ImportedAnimation {
            name: "mixed".into(),
            duration: 1.0,
            channels: vec![
                channel("a", &keys(5)),
                channel("b", &keys(3)),
                channel("c", &keys(7)),
            ],
        };
        assert_eq!(frame_count(&animation), 7);

        let baked = bake_animation(&arm(), &[], &animation);
        assert_eq!(baked.frame_count(), 7);
    }

    #[test]
    fn rotation_and_scale_keys_count_too() {
        let mut c = channel("a", &[Vec3::ZERO]);
        c.scaling_keys = vec![vkey(Vec3::ONE); 4];
        let animation = ImportedAnimation {
            name: "scale".into(),
            duration: 1.0,
            channels: vec![c],
        };
        assert_eq!(frame_count(&animation), 4);
    }

    #[test]
    fn untouched_slots_stay_identity() {
        let nodes = arm();
        let bones = vec![bone(0, "lower", Mat4::IDENTITY)];
        let animation = ImportedAnimation {
            name: "wave".into(),
            duration: 1.0,
            channels: vec![channel("upper", &[Vec3::X, Vec3::Y])],
        };

        let baked = bake_animation(&nodes, &bones, &animation);
        for frame in &baked.frames {
            assert_eq!(frame.bone_matrices().len(), MAX_BONES);
            assert!(frame.bone_matrices()[1..].iter().all(|m| *m == Mat4::IDENTITY));
        }
    }

    #[test]
    fn skinning_matrix_composes_inverse_global_and_offset() {
        let nodes = arm();
        let offset = Mat4::from_translation(Vec3::new(0.0, -2.0, 0.0));
        let bones = vec![bone(3, "lower", offset)];
        let animation = ImportedAnimation {
            name: "lift".into(),
            duration: 1.0,
            channels: vec![channel("upper", &[Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.0, 3.0, 0.0)])],
        };

        let baked = bake_animation(&nodes, &bones, &animation);
        let root = Mat4::from_translation(Vec3::new(0.0, 0.0, 2.0));
        let lower = Mat4::from_translation(Vec3::Y);

        for (f, upper_y) in [(0, 1.0), (1, 3.0)] {
            let upper = Mat4::from_translation(Vec3::new(0.0, upper_y, 0.0));
            let expected = root.inverse() * (root * upper * lower) * offset;
            assert!(baked.frames[f].bone_matrices()[3].abs_diff_eq(expected, 1e-5));
        }
    }

    #[test]
    fn sampling_clamps_to_last_key_without_interpolating() {
        let nodes = arm();
        let bones = vec![bone(0, "upper", Mat4::IDENTITY)];
        let short = channel("upper", &[Vec3::ZERO, Vec3::X]);
        let long = channel("lower", &[Vec3::ZERO; 4]);
        let animation = ImportedAnimation {
            name: "clamp".into(),
            duration: 1.0,
            channels: vec![short, long],
        };

        let baked = bake_animation(&nodes, &bones, &animation);
        assert_eq!(baked.frame_count(), 4);

        let expected = Mat4::from_translation(Vec3::X);
        for f in 1..4 {
            assert!(baked.frames[f].bone_matrices()[0].abs_diff_eq(expected, 1e-6));
        }
    }

    #[test]
    fn nodes_without_channels_keep_bind_pose() {
        let nodes = arm();
        let bones = vec![bone(0, "lower", Mat4::IDENTITY)];
        let animation = ImportedAnimation {
            name: "other".into(),
            duration: 1.0,
            channels: vec![channel("missing", &[Vec3::X])],
        };

        let baked = bake_animation(&nodes, &bones, &animation);
        let root = Mat4::from_translation(Vec3::new(0.0, 0.0, 2.0));
        let bind = root * Mat4::from_translation(Vec3::Y) * Mat4::from_translation(Vec3::Y);
        let expected = root.inverse() * bind;
        assert!(baked.frames[0].bone_matrices()[0].abs_diff_eq(expected, 1e-6));
    }

    #[test]
    fn bones_get_dense_ids_across_meshes() {
        let mesh = |names: &[&str]| ImportedMesh {
            bones: names
                .iter()
                .map(|n| ImportedBone {
                    name: n.to_string(),
                    offset: Mat4::IDENTITY,
                    weights: Vec::new(),
                })
                .collect(),
            ..Default::default()
        };

        let bones = collect_bones("rig", &[mesh(&["a", "b"]), mesh(&["c"])]).unwrap();
        let ids: Vec<_> = bones.iter().map(|b| (b.id, b.name.as_str())).collect();
        assert_eq!(ids, vec![(0, "a"), (1, "b"), (2, "c")]);
    }

    #[test]
    fn too_many_bones_is_fatal() {
        let names: Vec<String> = (0..=MAX_BONES).map(|i| format!("b{i}")).collect();
        let mesh = ImportedMesh {
            bones: names
                .iter()
                .map(|n| ImportedBone {
                    name: n.clone(),
                    offset: Mat4::IDENTITY,
                    weights: Vec::new(),
                })
                .collect(),
            ..Default::default()
        };
        let err = collect_bones("huge", &[mesh]).unwrap_err();
        assert!(matches!(err, EngineError::TooManyBones { count, .. } if count == MAX_BONES + 1));
    }
}
