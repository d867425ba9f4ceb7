//! Camera system

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};

/// Perspective projection parameters
#[derive(Debug, Clone, Copy)]
pub struct Projection {
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            fov_y: 70f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.01,
            far: 1000.0,
        }
    }
}

impl Projection {
    pub fn new(width: u32, height: u32) -> Self {
        let mut projection = Self::default();
        projection.update(width, height);
        projection
    }

    /// Track the surface aspect ratio; zero sizes are ignored
    pub fn update(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }
}

/// First-person camera: a position plus pitch (x) and yaw (y) in radians
#[derive(Debug, Clone)]
pub struct Camera {
    position: Vec3,
    rotation: Vec2,
    view: Mat4,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::ZERO)
    }
}

impl Camera {
    pub fn new(position: Vec3) -> Self {
        let mut camera = Self {
            position,
            rotation: Vec2::ZERO,
            view: Mat4::IDENTITY,
        };
        camera.recalculate();
        camera
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn rotation(&self) -> Vec2 {
        self.rotation
    }

    pub fn view_matrix(&self) -> Mat4 {
        self.view
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.recalculate();
    }

    pub fn set_rotation(&mut self, pitch: f32, yaw: f32) {
        self.rotation = Vec2::new(pitch, yaw);
        self.recalculate();
    }

    pub fn add_rotation(&mut self, pitch: f32, yaw: f32) {
        self.rotation += Vec2::new(pitch, yaw);
        self.recalculate();
    }

    /// Camera axes expressed in world space
    fn axis(&self, local: Vec3) -> Vec3 {
        self.view.inverse().transform_vector3(local)
    }

    pub fn move_forward(&mut self, amount: f32) {
        self.translate(self.axis(-Vec3::Z) * amount);
    }

    pub fn move_backward(&mut self, amount: f32) {
        self.translate(self.axis(Vec3::Z) * amount);
    }

    pub fn move_left(&mut self, amount: f32) {
        self.translate(self.axis(-Vec3::X) * amount);
    }

    pub fn move_right(&mut self, amount: f32) {
        self.translate(self.axis(Vec3::X) * amount);
    }

    pub fn move_up(&mut self, amount: f32) {
        self.translate(self.axis(Vec3::Y) * amount);
    }

    pub fn move_down(&mut self, amount: f32) {
        self.translate(self.axis(-Vec3::Y) * amount);
    }

    fn translate(&mut self, offset: Vec3) {
        self.position += offset;
        self.recalculate();
    }

    fn recalculate(&mut self) {
        self.view = Mat4::from_rotation_x(self.rotation.x)
            * Mat4::from_rotation_y(self.rotation.y)
            * Mat4::from_translation(-self.position);
    }

    /// Build camera uniform data for shaders
    pub fn uniform_data(&self, projection: &Projection) -> CameraUniformData {
        let proj = projection.matrix();
        CameraUniformData {
            view: self.view,
            proj,
            inv_proj: proj.inverse(),
            position: self.position.extend(1.0),
            near_far: Vec4::new(projection.near, projection.far, 0.0, 0.0),
        }
    }
}

/// Camera uniform data for GPU
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraUniformData {
    pub view: Mat4,
    pub proj: Mat4,
    pub inv_proj: Mat4,
    pub position: Vec4,
    pub near_far: Vec4,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn view_moves_world_opposite_to_camera() {
        let camera = Camera::new(Vec3::new(0.0, 0.0, 5.0));
        let origin = camera.view_matrix().transform_point3(Vec3::ZERO);
        assert!((origin - Vec3::new(0.0, 0.0, -5.0)).length() < 1e-6);
    }

    #[test]
    fn forward_follows_yaw() {
        let mut camera = Camera::default();
        camera.move_forward(1.0);
        assert!((camera.position() - Vec3::new(0.0, 0.0, -1.0)).length() < 1e-6);

        camera.set_position(Vec3::ZERO);
        camera.set_rotation(0.0, FRAC_PI_2);
        camera.move_forward(1.0);
        assert!((camera.position() - Vec3::X).length() < 1e-5);
    }

    #[test]
    fn projection_tracks_aspect() {
        let mut projection = Projection::new(800, 600);
        assert!((projection.aspect - 4.0 / 3.0).abs() < 1e-6);
        projection.update(0, 600);
        assert!((projection.aspect - 4.0 / 3.0).abs() < 1e-6);
        assert_eq!(projection.near, 0.01);
        assert_eq!(projection.far, 1000.0);
    }
}
