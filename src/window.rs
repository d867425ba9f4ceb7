//! Window management and input state using winit

use crate::error::{EngineError, EngineResult};
use crate::scene::CameraInput;
use glam::Vec2;
use std::collections::HashSet;
use std::sync::Arc;
use winit::{
    dpi::PhysicalSize,
    event::{ElementState, MouseButton, WindowEvent},
    event_loop::EventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::{Window as WinitWindow, WindowBuilder},
};

/// Cursor tracking; the displacement is sampled once per render tick
#[derive(Debug, Clone, Default)]
pub struct MouseInput {
    previous: Option<Vec2>,
    current: Vec2,
    delta: Vec2,
    in_window: bool,
    left_pressed: bool,
    right_pressed: bool,
}

impl MouseInput {
    pub fn cursor_moved(&mut self, position: Vec2) {
        self.current = position;
    }

    pub fn set_in_window(&mut self, in_window: bool) {
        self.in_window = in_window;
        if !in_window {
            self.previous = None;
        }
    }

    pub fn set_button(&mut self, button: MouseButton, pressed: bool) {
        match button {
            MouseButton::Left => self.left_pressed = pressed,
            MouseButton::Right => self.right_pressed = pressed,
            _ => {}
        }
    }

    /// Take the displacement since the previous sample
    pub fn sample(&mut self) {
        self.delta = match self.previous {
            Some(previous) if self.in_window => self.current - previous,
            _ => Vec2::ZERO,
        };
        self.previous = self.in_window.then_some(self.current);
    }

    /// Pixels moved between the last two samples
    pub fn delta(&self) -> Vec2 {
        self.delta
    }

    pub fn position(&self) -> Vec2 {
        self.current
    }

    pub fn in_window(&self) -> bool {
        self.in_window
    }

    pub fn is_left_pressed(&self) -> bool {
        self.left_pressed
    }

    pub fn is_right_pressed(&self) -> bool {
        self.right_pressed
    }
}

/// Keyboard and mouse state fed from window events
#[derive(Debug, Clone, Default)]
pub struct InputState {
    keys: HashSet<KeyCode>,
    mouse: MouseInput,
}

impl InputState {
    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(code) = event.physical_key {
                    self.set_key(code, event.state == ElementState::Pressed);
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.mouse
                    .cursor_moved(Vec2::new(position.x as f32, position.y as f32));
            }
            WindowEvent::CursorEntered { .. } => self.mouse.set_in_window(true),
            WindowEvent::CursorLeft { .. } => self.mouse.set_in_window(false),
            WindowEvent::MouseInput { state, button, .. } => {
                self.mouse.set_button(*button, *state == ElementState::Pressed);
            }
            WindowEvent::Focused(false) => self.keys.clear(),
            _ => {}
        }
    }

    pub fn set_key(&mut self, code: KeyCode, pressed: bool) {
        if pressed {
            self.keys.insert(code);
        } else {
            self.keys.remove(&code);
        }
    }

    pub fn is_key_pressed(&self, code: KeyCode) -> bool {
        self.keys.contains(&code)
    }

    pub fn mouse(&self) -> &MouseInput {
        &self.mouse
    }

    pub fn mouse_mut(&mut self) -> &mut MouseInput {
        &mut self.mouse
    }

    /// Free-look bindings: WASD, Space/Ctrl, right mouse drag
    pub fn camera_input(&self) -> CameraInput {
        let held = |code| self.is_key_pressed(code);
        CameraInput {
            forward: held(KeyCode::KeyW),
            backward: held(KeyCode::KeyS),
            left: held(KeyCode::KeyA),
            right: held(KeyCode::KeyD),
            up: held(KeyCode::Space),
            down: held(KeyCode::ControlLeft),
            mouse_delta: self.mouse.delta(),
            mouse_look_active: self.mouse.is_right_pressed(),
        }
    }
}

/// Wrapper around winit window with additional state
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
    resized: bool,
    close_requested: bool,
    input: InputState,
}

impl Window {
    /// Create a new window with the given title and dimensions
    pub fn new(event_loop: &EventLoop<()>, title: &str, width: u32, height: u32) -> EngineResult<Self> {
        let window = WindowBuilder::new()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .build(event_loop)
            .map_err(|e| EngineError::Window(e.to_string()))?;

        let size = window.inner_size();
        log::info!("Window '{}' created at {}x{}", title, size.width, size.height);

        Ok(Self {
            window: Arc::new(window),
            width: size.width,
            height: size.height,
            resized: false,
            close_requested: false,
            input: InputState::default(),
        })
    }

    /// Get the raw window
    pub fn window(&self) -> &WinitWindow {
        &self.window
    }

    /// Get arc reference to window for backend initialization
    pub fn window_arc(&self) -> Arc<WinitWindow> {
        Arc::clone(&self.window)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Check if window was resized since the flag was last cleared
    pub fn was_resized(&self) -> bool {
        self.resized
    }

    pub fn clear_resize_flag(&mut self) {
        self.resized = false;
    }

    pub fn should_close(&self) -> bool {
        self.close_requested
    }

    pub fn request_close(&mut self) {
        self.close_requested = true;
    }

    pub fn input(&self) -> &InputState {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut InputState {
        &mut self.input
    }

    pub fn is_key_pressed(&self, code: KeyCode) -> bool {
        self.input.is_key_pressed(code)
    }

    /// Handle window events
    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::Resized(size) => {
                self.width = size.width;
                self.height = size.height;
                self.resized = true;
            }
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            _ => self.input.handle_event(event),
        }
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mouse_delta_needs_two_samples_inside_window() {
        let mut mouse = MouseInput::default();
        mouse.set_in_window(true);
        mouse.cursor_moved(Vec2::new(10.0, 10.0));
        mouse.sample();
        assert_eq!(mouse.delta(), Vec2::ZERO);

        mouse.cursor_moved(Vec2::new(14.0, 7.0));
        mouse.sample();
        assert_eq!(mouse.delta(), Vec2::new(4.0, -3.0));

        mouse.sample();
        assert_eq!(mouse.delta(), Vec2::ZERO);
    }

    #[test]
    fn leaving_the_window_resets_tracking() {
        let mut mouse = MouseInput::default();
        mouse.set_in_window(true);
        mouse.cursor_moved(Vec2::new(0.0, 0.0));
        mouse.sample();

        mouse.set_in_window(false);
        mouse.cursor_moved(Vec2::new(100.0, 100.0));
        mouse.sample();
        assert_eq!(mouse.delta(), Vec2::ZERO);

        mouse.set_in_window(true);
        mouse.cursor_moved(Vec2::new(101.0, 100.0));
        mouse.sample();
        assert_eq!(mouse.delta(), Vec2::ZERO);
    }

    #[test]
    fn keys_map_to_camera_input() {
        let mut input = InputState::default();
        input.set_key(KeyCode::KeyW, true);
        input.set_key(KeyCode::Space, true);
        input.set_key(KeyCode::Space, false);
        input.mouse_mut().set_button(MouseButton::Right, true);

        let camera = input.camera_input();
        assert!(camera.forward && !camera.backward && !camera.up);
        assert!(camera.mouse_look_active);
    }
}
