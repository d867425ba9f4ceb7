//! Main engine orchestrator
//!
//! [`Engine::run`] owns the window and a [`Runtime`] over the wgpu backend,
//! and drives them from the winit event loop. The runtime holds the renderer,
//! the scene and the application logic and works with any backend.

use crate::backend::wgpu_backend::WgpuBackend;
use crate::backend::GraphicsBackend;
use crate::error::{EngineError, EngineResult};
use crate::pipeline::Renderer;
use crate::scene::Scene;
use crate::window::{InputState, Window};
use crate::EngineConfig;
use std::time::Instant;
use winit::{
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
};

/// Game or demo code plugged into the loop
pub trait AppLogic {
    /// Populate models, entities, lights, fog and skybox before the first frame
    fn init(&mut self, scene: &mut Scene) -> EngineResult<()>;

    /// Called on render ticks. `gui_consumed` is set when the overlay took the input.
    fn input(&mut self, input: &InputState, scene: &mut Scene, elapsed_ms: f32, gui_consumed: bool);

    /// Fixed-rate update, before the scene advances its animations
    fn update(&mut self, input: &InputState, scene: &mut Scene, elapsed_ms: f32);

    fn cleanup(&mut self) {}
}

/// Immediate-mode GUI hooks
pub trait GuiOverlay {
    /// Offer this frame's input; `true` means it was consumed
    fn handle_input(&mut self, input: &InputState) -> bool;

    /// Build the overlay for the frame about to be rendered
    fn draw(&mut self, scene: &Scene);
}

/// What is due on this iteration of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameTick {
    pub update: bool,
    pub render: bool,
}

/// Fractional accumulators for the fixed update rate and the frame cap
#[derive(Debug, Clone)]
pub struct FrameClock {
    update_period_ms: f32,
    /// `None` renders every iteration
    render_period_ms: Option<f32>,
    delta_update: f32,
    delta_render: f32,
}

impl FrameClock {
    pub fn new(target_ups: u32, target_fps: u32) -> Self {
        Self {
            update_period_ms: 1000.0 / target_ups.max(1) as f32,
            render_period_ms: (target_fps > 0).then(|| 1000.0 / target_fps as f32),
            delta_update: 0.0,
            delta_render: 0.0,
        }
    }

    /// Advance by `elapsed_ms`; consumes one period of each tick that is due
    pub fn advance(&mut self, elapsed_ms: f32) -> FrameTick {
        self.delta_update += elapsed_ms / self.update_period_ms;

        let render = match self.render_period_ms {
            None => true,
            Some(period) => {
                self.delta_render += elapsed_ms / period;
                if self.delta_render >= 1.0 {
                    self.delta_render -= 1.0;
                    true
                } else {
                    false
                }
            }
        };

        let update = self.delta_update >= 1.0;
        if update {
            self.delta_update -= 1.0;
        }

        FrameTick { update, render }
    }
}

/// Scene, renderer and application state stepped once per loop iteration
pub struct Runtime<B: GraphicsBackend> {
    backend: B,
    renderer: Renderer,
    scene: Scene,
    clock: FrameClock,
    app: Box<dyn AppLogic>,
    gui: Option<Box<dyn GuiOverlay>>,
}

impl<B: GraphicsBackend> Runtime<B> {
    /// Build the renderer, let the app populate the level and upload it
    pub fn new(
        mut backend: B,
        config: &EngineConfig,
        mut app: Box<dyn AppLogic>,
        gui: Option<Box<dyn GuiOverlay>>,
    ) -> EngineResult<Self> {
        let (width, height) = backend.surface_size();
        let mut scene = Scene::new(width, height);
        let mut renderer = Renderer::new(&mut backend, config.shadow_map_size)?;

        app.init(&mut scene)?;
        renderer.prepare(&mut backend, &mut scene)?;
        log::info!(
            "Level ready: {} models, {} entities",
            scene.models().count(),
            scene.entity_count()
        );

        Ok(Self {
            backend,
            renderer,
            scene,
            clock: FrameClock::new(config.target_ups, config.target_fps),
            app,
            gui,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Follow a window resize; the scene takes the size the surface accepted
    pub fn resize(&mut self, width: u32, height: u32) -> EngineResult<()> {
        self.renderer.resize(&mut self.backend, width, height)?;
        let (width, height) = self.backend.surface_size();
        self.scene.resize(width, height);
        Ok(())
    }

    /// One loop iteration: input, fixed update, render
    pub fn step(&mut self, input: &mut InputState, elapsed_ms: f32) -> EngineResult<FrameTick> {
        let tick = self.clock.advance(elapsed_ms);

        if tick.render {
            input.mouse_mut().sample();
            let consumed = self.gui.as_mut().is_some_and(|gui| gui.handle_input(input));
            self.app.input(input, &mut self.scene, elapsed_ms, consumed);
        }

        if tick.update {
            self.app.update(input, &mut self.scene, elapsed_ms);
            self.scene.update();
        }

        if tick.render {
            if let Some(gui) = &mut self.gui {
                gui.draw(&self.scene);
            }
            self.renderer.render(&mut self.backend, &mut self.scene)?;
        }

        Ok(tick)
    }

    /// Release everything in reverse order of creation
    pub fn cleanup(&mut self) {
        log::info!("Shutting down");
        self.app.cleanup();
        self.renderer.cleanup(&mut self.backend);
        self.scene.cleanup(&mut self.backend);
    }
}

/// The running engine; created and driven by [`Engine::run`]
pub struct Engine {
    window: Window,
    runtime: Runtime<WgpuBackend>,
    last_instant: Instant,
}

impl Engine {
    /// Open the window, initialise the level and run until the window closes
    pub fn run(
        config: EngineConfig,
        app: Box<dyn AppLogic>,
        gui: Option<Box<dyn GuiOverlay>>,
    ) -> EngineResult<()> {
        let event_loop = EventLoop::new().map_err(|e| EngineError::Window(e.to_string()))?;
        let mut engine = match Self::new(&event_loop, config, app, gui) {
            Ok(engine) => engine,
            Err(e) => {
                log::error!("Engine initialization failed: {}", e);
                return Err(e);
            }
        };

        let mut failure = None;
        let loop_result = event_loop.run(|event, elwt| {
            elwt.set_control_flow(ControlFlow::Poll);

            match event {
                Event::WindowEvent { event, .. } => {
                    engine.window.handle_event(&event);
                    if let WindowEvent::CloseRequested = event {
                        log::info!("Close requested");
                    }
                }
                Event::AboutToWait => {
                    if engine.window.should_close() {
                        elwt.exit();
                        return;
                    }
                    if let Err(e) = engine.step() {
                        log::error!("Frame failed: {}", e);
                        failure = Some(e);
                        elwt.exit();
                    }
                }
                _ => {}
            }
        });

        engine.runtime.cleanup();
        loop_result.map_err(|e| EngineError::Window(e.to_string()))?;
        failure.map_or(Ok(()), Err)
    }

    fn new(
        event_loop: &EventLoop<()>,
        config: EngineConfig,
        app: Box<dyn AppLogic>,
        gui: Option<Box<dyn GuiOverlay>>,
    ) -> EngineResult<Self> {
        let window = Window::new(event_loop, &config.title, config.width, config.height)?;
        let backend = WgpuBackend::new(window.window_arc(), config.vsync)?;
        let runtime = Runtime::new(backend, &config, app, gui)?;

        Ok(Self {
            window,
            runtime,
            last_instant: Instant::now(),
        })
    }

    fn step(&mut self) -> EngineResult<()> {
        let now = Instant::now();
        let elapsed_ms = now.duration_since(self.last_instant).as_secs_f32() * 1000.0;
        self.last_instant = now;

        if self.window.was_resized() {
            let (width, height) = self.window.dimensions();
            self.runtime.resize(width, height)?;
            self.window.clear_resize_flag();
        }

        self.runtime.step(self.window.input_mut(), elapsed_ms)?;
        Ok(())
    }
}
