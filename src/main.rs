// =============================================================================
// PARTICLE FRAMES - windowed driver
// =============================================================================
//
// FRAME FLOW (one tick per redraw):
// 1. Wait for this slot's compute fence, write the time step
// 2. Record + submit compute (previous slot's state -> this slot's state)
// 3. Acquire swapchain image, wait for this slot's graphics fence
// 4. Record + submit graphics (draws this slot's state as points)
// 5. Present, rebuild the swapchain if it went stale, advance the slot
//
// =============================================================================

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

use particle_frames::backend::VulkanGpu;
use particle_frames::config::Config;
use particle_frames::particle::seed_particles;
use particle_frames::{ParticleRenderer, TickOutcome};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();
    init_logging(&config)?;
    config.validate().context("Invalid configuration")?;

    log::info!("Starting particle renderer");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!(
        "Simulating {} particles, present mode: {}",
        config.simulation.particle_count,
        config.graphics.present_mode
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    // Errors inside the event loop can't be returned from the handler
    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Info by default, `RUST_LOG` overrides; optionally written to a file instead of stderr
fn init_logging(config: &Config) -> Result<()> {
    use env_logger::{Builder, Env, Target};

    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    if config.debug.log_to_file {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
            .with_context(|| format!("Failed to open log file {:?}", config.debug.log_file))?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: the renderer owns the Vulkan surface and must
/// be destroyed before the window it was created from.
struct App {
    config: Config,
    renderer: Option<ParticleRenderer<VulkanGpu>>,
    window: Option<Arc<Window>>,
    is_fullscreen: bool,
    /// First unrecoverable error; ends the event loop.
    fatal: Option<anyhow::Error>,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        Self {
            config,
            renderer: None,
            window: None,
            is_fullscreen,
            fatal: None,
            frame_count: 0,
            last_fps_update: Instant::now(),
        }
    }

    fn init_renderer(&self, window: &Window) -> Result<ParticleRenderer<VulkanGpu>> {
        let gpu = VulkanGpu::new(window, &self.config)?;

        let sim = &self.config.simulation;
        let particles = seed_particles(sim.particle_count as usize, sim.seed);
        log::info!("Seeded {} particles (seed {})", particles.len(), sim.seed);

        let renderer = ParticleRenderer::new(gpu, &particles, self.config.renderer_settings(), window)
            .context("Failed to create frame resources")?;
        Ok(renderer)
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        if self.fatal.is_none() {
            self.fatal = Some(error);
        }
        event_loop.exit();
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(renderer), Some(window)) = (self.renderer.as_mut(), self.window.as_ref()) else {
            return;
        };

        match renderer.tick(&**window) {
            Ok(TickOutcome::Presented { .. }) => self.update_fps(),
            Ok(TickOutcome::Skipped | TickOutcome::Minimized) => {}
            Err(e) => self.fail(event_loop, anyhow::Error::new(e)),
        }
    }

    // =========================================================================
    // FULLSCREEN TOGGLE
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;
            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }
            if let Some(renderer) = self.renderer.as_mut() {
                renderer.request_resize();
            }
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        self.frame_count += 1;
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();

        // Update title every second
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;
            if let (Some(window), Some(renderer)) = (&self.window, &self.renderer) {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) - {} particles",
                    self.config.window.title,
                    fps,
                    1000.0 / fps,
                    renderer.particle_count()
                ));
            }
            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));
        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        match self.init_renderer(&window) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                self.fail(event_loop, e.context("Failed to initialize Vulkan"));
                return;
            }
        }
        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            // Zero sizes are picked up by the renderer from the drawable extent
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.request_resize();
                }
            }

            WindowEvent::RedrawRequested => self.redraw(event_loop),

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                event_loop.exit();
                            }
                            KeyCode::F11 => self.toggle_fullscreen(),
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws; the simulation advances once per frame.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(renderer) = self.renderer.take() {
            log::info!("Presented {} frames", renderer.ticks_presented());
            // Renderer drop drains the device and releases every GPU object
            drop(renderer);
        }
        log::info!("Cleanup complete");
    }
}
