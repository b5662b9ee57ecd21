//! Desktop host: a window standing in for the page, cards scrolling over it.
//!
//! Controls:
//! - Left mouse: stir the fluid
//! - Wheel / Up / Down / PageUp / PageDown: scroll the cards
//! - Space: pause, R: reset, Escape: quit

use std::sync::Arc;
use std::time::Instant;

use flowfield::glam::Vec2;
use flowfield::{FieldStats, FrameInput, FrameOutcome, PointerInput, Solver};
use winit::{
    application::ApplicationHandler,
    event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use crate::config::BackdropConfig;
use crate::gpu::{self, readback, GpuBackend, GpuContext, GpuField};
use crate::layout::{CardLayout, Scroll};

pub struct App {
    config: BackdropConfig,
    layout: CardLayout,
    scroll: Scroll,

    window: Option<Arc<Window>>,
    gpu: Option<GpuContext>,
    backend: Option<GpuBackend>,
    solver: Solver<GpuField>,

    pointer: PointerInput,
    paused: bool,
    last_frame: Instant,
}

impl App {
    pub fn new(config: BackdropConfig, layout: CardLayout) -> Self {
        let solver = Solver::new(config.solver.clone());
        Self {
            config,
            layout,
            scroll: Scroll::default(),
            window: None,
            gpu: None,
            backend: None,
            solver,
            pointer: PointerInput::default(),
            paused: false,
            last_frame: Instant::now(),
        }
    }

    fn scale_factor(&self) -> f32 {
        self.window.as_ref().map_or(1.0, |w| w.scale_factor() as f32)
    }

    /// Viewport height in logical pixels.
    fn viewport_height(&self) -> f32 {
        self.gpu
            .as_ref()
            .map_or(0.0, |g| g.config.height as f32 / self.scale_factor())
    }

    fn scroll_by(&mut self, delta: f32) {
        let max = self.layout.max_scroll(self.viewport_height());
        self.scroll.scroll_by(delta, max);
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) {
        let attributes = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(winit::dpi::LogicalSize::new(
                self.config.window_width,
                self.config.window_height,
            ));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("could not create window: {e}");
                event_loop.exit();
                return;
            }
        };

        let ctx = match pollster::block_on(GpuContext::new(window.clone())) {
            Ok(ctx) => ctx,
            Err(e) => {
                log::error!("GPU initialization failed: {e}");
                event_loop.exit();
                return;
            }
        };

        let backend = GpuBackend::new(ctx.device.clone(), ctx.queue.clone(), Some(ctx.surface_format()));
        self.solver.resize(ctx.config.width, ctx.config.height);
        log::info!(
            "{} cards, surface {}x{} {:?}",
            self.layout.cards.len(),
            ctx.config.width,
            ctx.config.height,
            ctx.surface_format()
        );

        window.request_redraw();
        self.window = Some(window);
        self.gpu = Some(ctx);
        self.backend = Some(backend);
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame).as_secs_f32().min(0.1);
        self.last_frame = now;

        if gpu::is_device_lost() {
            log::error!("GPU device lost, exiting");
            event_loop.exit();
            return;
        }

        let scale_factor = self.scale_factor();
        let obstacles = self.layout.obstacles(scale_factor, self.scroll.offset());
        let (Some(ctx), Some(backend)) = (self.gpu.as_mut(), self.backend.as_mut()) else {
            return;
        };

        let frame = match ctx.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::warn!("surface lost or outdated, reconfiguring");
                ctx.reconfigure();
                return;
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                log::error!("surface out of memory, exiting");
                event_loop.exit();
                return;
            }
            Err(e) => {
                log::warn!("skipping frame: {e}");
                return;
            }
        };
        let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());
        backend.set_display_target(view, ctx.config.width, ctx.config.height);

        let input = FrameInput {
            dt,
            obstacles: &obstacles,
            pointer: self.pointer,
        };
        match self.solver.frame(backend, &input) {
            Ok(FrameOutcome::Stepped { .. }) => {}
            Ok(FrameOutcome::Skipped) => log::debug!("zero-area canvas, frame skipped"),
            Err(e) => log::error!("frame {}: {e}", self.solver.frame_count()),
        }
        if backend.clear_display_target() {
            // Nothing was drawn; dropping the frame discards it unpresented.
            drop(frame);
        } else {
            frame.present();
        }

        let interval = self.config.stats_interval;
        if interval > 0 && self.solver.frame_count() % interval == 0 {
            self.log_stats();
        }
    }

    fn log_stats(&self) {
        let (Some(ctx), Some(velocity)) = (self.gpu.as_ref(), self.solver.velocity()) else {
            return;
        };
        match readback::read_vector_field(&ctx.device, &ctx.queue, velocity) {
            Ok(data) => {
                let stats = FieldStats::from_velocity(self.solver.grid_size(), &data);
                stats.log(&format!("frame {}", self.solver.frame_count()));
                log::debug!("{:?}", self.solver.pool_stats());
            }
            Err(e) => log::warn!("velocity readback failed: {e}"),
        }
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.solver.shutdown() {
            log::error!("{e}");
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            self.init(event_loop);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(ctx) = self.gpu.as_mut() {
                    ctx.resize(size.width, size.height);
                }
                self.solver.resize(size.width, size.height);
                let max = self.layout.max_scroll(self.viewport_height());
                self.scroll.clamp(max);
            }
            WindowEvent::CursorMoved { position, .. } => {
                if let Some(ctx) = self.gpu.as_ref() {
                    self.pointer.position = Vec2::new(
                        position.x as f32 / ctx.config.width as f32,
                        position.y as f32 / ctx.config.height as f32,
                    );
                }
            }
            WindowEvent::CursorLeft { .. } => {
                self.pointer.down = false;
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => {
                self.pointer.down = state == ElementState::Pressed;
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let step = match delta {
                    MouseScrollDelta::LineDelta(_, y) => -y * self.config.scroll_step,
                    MouseScrollDelta::PixelDelta(p) => -(p.y as f32) / self.scale_factor(),
                };
                self.scroll_by(step);
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state != ElementState::Pressed {
                    return;
                }
                let PhysicalKey::Code(key) = event.physical_key else {
                    return;
                };
                let page = self.viewport_height() * 0.9;
                match key {
                    KeyCode::Space => {
                        self.paused = !self.paused;
                        log::info!("simulation {}", if self.paused { "paused" } else { "running" });
                        if !self.paused {
                            self.last_frame = Instant::now();
                            if let Some(window) = self.window.as_ref() {
                                window.request_redraw();
                            }
                        }
                    }
                    KeyCode::KeyR => {
                        log::info!("reset");
                        self.solver.reset();
                    }
                    KeyCode::ArrowDown => self.scroll_by(self.config.scroll_step),
                    KeyCode::ArrowUp => self.scroll_by(-self.config.scroll_step),
                    KeyCode::PageDown => self.scroll_by(page),
                    KeyCode::PageUp => self.scroll_by(-page),
                    KeyCode::Escape => {
                        self.shutdown();
                        event_loop.exit();
                    }
                    _ => {}
                }
            }
            WindowEvent::RedrawRequested => {
                if self.paused {
                    return;
                }
                self.redraw(event_loop);
                if let Some(window) = self.window.as_ref() {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

/// Open the window and run until it closes.
pub fn run(config: BackdropConfig, layout: CardLayout) -> Result<(), Box<dyn std::error::Error>> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Wait);
    let mut app = App::new(config, layout);
    event_loop.run_app(&mut app)?;
    Ok(())
}
