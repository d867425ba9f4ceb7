//! Keyboard and mouse driven camera movement

use super::Camera;
use glam::Vec2;

/// Input sampled once per render tick
#[derive(Debug, Clone, Default)]
pub struct CameraInput {
    /// Movement keys (W/S, A/D, Space/Ctrl)
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,

    /// Mouse movement since the previous sample, in pixels
    pub mouse_delta: Vec2,

    /// Right mouse button held
    pub mouse_look_active: bool,
}

/// Free-look controller
///
/// - W/S: forward/back, A/D: strafe, Space/Ctrl: up/down
/// - Right mouse drag: look around
#[derive(Debug, Clone, Copy)]
pub struct FreeLookController {
    /// Degrees of rotation per pixel of mouse movement
    pub mouse_sensitivity: f32,
    /// World units per elapsed millisecond
    pub move_speed: f32,
}

impl Default for FreeLookController {
    fn default() -> Self {
        Self {
            mouse_sensitivity: 0.1,
            move_speed: 0.1,
        }
    }
}

impl FreeLookController {
    pub fn new(mouse_sensitivity: f32, move_speed: f32) -> Self {
        Self {
            mouse_sensitivity,
            move_speed,
        }
    }

    /// Apply one input sample covering `elapsed_ms`
    pub fn update(&self, camera: &mut Camera, input: &CameraInput, elapsed_ms: f32) {
        let amount = elapsed_ms * self.move_speed;

        if input.forward {
            camera.move_forward(amount);
        } else if input.backward {
            camera.move_backward(amount);
        }
        if input.left {
            camera.move_left(amount);
        } else if input.right {
            camera.move_right(amount);
        }
        if input.up {
            camera.move_up(amount);
        } else if input.down {
            camera.move_down(amount);
        }

        if input.mouse_look_active && input.mouse_delta != Vec2::ZERO {
            camera.add_rotation(
                (input.mouse_delta.y * self.mouse_sensitivity).to_radians(),
                (input.mouse_delta.x * self.mouse_sensitivity).to_radians(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn movement_scales_with_elapsed_time() {
        let controller = FreeLookController::default();
        let mut camera = Camera::default();
        let input = CameraInput {
            forward: true,
            ..Default::default()
        };
        controller.update(&mut camera, &input, 20.0);
        assert!((camera.position() - Vec3::new(0.0, 0.0, -2.0)).length() < 1e-5);
    }

    #[test]
    fn mouse_rotates_only_while_looking() {
        let controller = FreeLookController::default();
        let mut camera = Camera::default();
        let mut input = CameraInput {
            mouse_delta: Vec2::new(100.0, 50.0),
            ..Default::default()
        };

        controller.update(&mut camera, &input, 16.0);
        assert_eq!(camera.rotation(), Vec2::ZERO);

        input.mouse_look_active = true;
        controller.update(&mut camera, &input, 16.0);
        assert!((camera.rotation().x - 5f32.to_radians()).abs() < 1e-6);
        assert!((camera.rotation().y - 10f32.to_radians()).abs() < 1e-6);
    }
}
