//! Cascaded shadow maps for the directional light
//!
//! Every frame the camera frustum is cut into [`CASCADE_COUNT`] depth slices.
//! Each slice gets a light-space orthographic projection sized to the
//! bounding sphere of its eight corners. The sphere radius is snapped to
//! 1/16 of a unit so the projection does not shimmer as the camera moves.

use glam::{Mat4, Vec3};

pub const CASCADE_COUNT: usize = 3;

/// Blend between logarithmic (1.0) and uniform (0.0) split placement
pub const CASCADE_SPLIT_LAMBDA: f32 = 0.95;

const RADIUS_STEP: f32 = 1.0 / 16.0;

/// Light-space transform and far boundary of one cascade
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeShadow {
    pub projection_view: Mat4,
    /// Negative view-space depth where this cascade ends
    pub split_distance: f32,
}

impl Default for CascadeShadow {
    fn default() -> Self {
        Self {
            projection_view: Mat4::IDENTITY,
            split_distance: 0.0,
        }
    }
}

/// Split positions of every cascade
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeSplits {
    /// Fraction of the `[near, far]` range, in `(0, 1]`
    pub fractions: [f32; CASCADE_COUNT],
    /// Positive view-space depth
    pub depths: [f32; CASCADE_COUNT],
}

/// Blend of logarithmic and uniform split depths
pub fn split_depths(near: f32, far: f32) -> CascadeSplits {
    let clip = far - near;
    let ratio = far / near;

    let mut fractions = [0.0; CASCADE_COUNT];
    let mut depths = [0.0; CASCADE_COUNT];
    for i in 0..CASCADE_COUNT {
        let p = (i + 1) as f32 / CASCADE_COUNT as f32;
        let log = near * ratio.powf(p);
        let uniform = near + clip * p;
        let d = CASCADE_SPLIT_LAMBDA * (log - uniform) + uniform;
        depths[i] = d;
        fractions[i] = (d - near) / clip;
    }

    CascadeSplits { fractions, depths }
}

/// World-space corners of the whole view frustum: near face first, then far
pub fn frustum_corners(view: &Mat4, projection: &Mat4) -> [Vec3; 8] {
    let inverse = (*projection * *view).inverse();
    let ndc = [
        Vec3::new(-1.0, 1.0, 0.0),
        Vec3::new(1.0, 1.0, 0.0),
        Vec3::new(1.0, -1.0, 0.0),
        Vec3::new(-1.0, -1.0, 0.0),
        Vec3::new(-1.0, 1.0, 1.0),
        Vec3::new(1.0, 1.0, 1.0),
        Vec3::new(1.0, -1.0, 1.0),
        Vec3::new(-1.0, -1.0, 1.0),
    ];
    ndc.map(|corner| inverse.project_point3(corner))
}

/// Corners of the frustum slice between two split fractions
pub fn slice_corners(corners: &[Vec3; 8], from: f32, to: f32) -> [Vec3; 8] {
    let mut slice = *corners;
    for j in 0..4 {
        let edge = corners[j + 4] - corners[j];
        slice[j] = corners[j] + edge * from;
        slice[j + 4] = corners[j] + edge * to;
    }
    slice
}

/// Centroid of the corners and the snapped radius enclosing all of them
pub fn bounding_sphere(corners: &[Vec3; 8]) -> (Vec3, f32) {
    let center = corners.iter().copied().sum::<Vec3>() / corners.len() as f32;
    let radius = corners
        .iter()
        .map(|c| c.distance(center))
        .fold(0.0_f32, f32::max);
    let snapped = (radius / RADIUS_STEP).ceil() * RADIUS_STEP;
    (center, snapped.max(RADIUS_STEP))
}

/// Recompute all cascades for this frame
///
/// `light_direction` points toward the light, as stored on
/// [`DirectionalLight`](crate::scene::DirectionalLight).
pub fn update_cascades(
    view: &Mat4,
    projection: &Mat4,
    near: f32,
    far: f32,
    light_direction: Vec3,
) -> [CascadeShadow; CASCADE_COUNT] {
    let splits = split_depths(near, far);
    let corners = frustum_corners(view, projection);
    let light_dir = (-light_direction).try_normalize().unwrap_or(Vec3::NEG_Y);
    let up = if light_dir.dot(Vec3::Y).abs() > 0.999 { Vec3::Z } else { Vec3::Y };

    let mut cascades = [CascadeShadow::default(); CASCADE_COUNT];
    let mut last_split = 0.0;
    for (i, cascade) in cascades.iter_mut().enumerate() {
        let split = splits.fractions[i];
        let (center, radius) = bounding_sphere(&slice_corners(&corners, last_split, split));

        let eye = center - light_dir * radius;
        let light_view = Mat4::look_at_rh(eye, center, up);
        let light_ortho = Mat4::orthographic_rh(-radius, radius, -radius, radius, 0.0, 2.0 * radius);

        *cascade = CascadeShadow {
            projection_view: light_ortho * light_view,
            split_distance: -(near + split * (far - near)),
        };
        last_split = split;
    }

    cascades
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Camera, Projection};

    #[test]
    fn splits_increase_within_range() {
        let splits = split_depths(0.01, 256.0);
        assert!(splits.depths[0] < splits.depths[1] && splits.depths[1] < splits.depths[2]);
        for d in splits.depths {
            assert!((0.01..=256.0).contains(&d));
        }
        assert!((splits.fractions[2] - 1.0).abs() < 1e-5);
        assert!(splits.depths[0] - 0.01 < 256.0 - splits.depths[0]);
    }

    #[test]
    fn split_distances_are_negative_and_decreasing() {
        let camera = Camera::default();
        let projection = Projection::default();
        let cascades = update_cascades(
            &camera.view_matrix(),
            &projection.matrix(),
            projection.near,
            projection.far,
            Vec3::new(0.3, 1.0, 0.2),
        );
        assert!(cascades.windows(2).all(|w| w[1].split_distance < w[0].split_distance));
        assert!(cascades.iter().all(|c| c.split_distance < 0.0));
        assert!((cascades[2].split_distance + projection.far).abs() < 1e-2);
    }

    #[test]
    fn sphere_contains_slice_corners() {
        let mut camera = Camera::new(Vec3::new(3.0, 2.0, 8.0));
        camera.set_rotation(0.3, -0.7);
        let projection = Projection {
            far: 256.0,
            ..Projection::default()
        };
        let corners = frustum_corners(&camera.view_matrix(), &projection.matrix());
        let splits = split_depths(projection.near, projection.far);

        let mut last = 0.0;
        for split in splits.fractions {
            let slice = slice_corners(&corners, last, split);
            let (center, radius) = bounding_sphere(&slice);
            for corner in slice {
                assert!(corner.distance(center) <= radius + 1e-3);
            }
            assert_eq!((radius * 16.0).fract(), 0.0);
            last = split;
        }
    }

    #[test]
    fn degenerate_slice_keeps_minimum_radius() {
        let corners = [Vec3::splat(2.0); 8];
        let (center, radius) = bounding_sphere(&corners);
        assert_eq!(center, Vec3::splat(2.0));
        assert_eq!(radius, RADIUS_STEP);
    }

    #[test]
    fn cascade_center_maps_inside_light_volume() {
        let camera = Camera::new(Vec3::new(0.0, 1.0, 0.0));
        let projection = Projection::default();
        let corners = frustum_corners(&camera.view_matrix(), &projection.matrix());
        let splits = split_depths(projection.near, projection.far);
        let (center, _) = bounding_sphere(&slice_corners(&corners, 0.0, splits.fractions[0]));

        for direction in [Vec3::Y, Vec3::new(1.0, 1.0, 0.0)] {
            let cascades = update_cascades(
                &camera.view_matrix(),
                &projection.matrix(),
                projection.near,
                projection.far,
                direction,
            );
            let clip = cascades[0].projection_view.project_point3(center);
            assert!(clip.x.abs() < 1e-3 && clip.y.abs() < 1e-3);
            assert!((clip.z - 0.5).abs() < 1e-3);
        }
    }
}
