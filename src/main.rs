// =============================================================================
// VIEWPORT TRIANGLE - Fixed-pipeline Vulkan presenter
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (window, input, redraw requests)              │
// │    └── VulkanDevice (instance, surface, GPU, queue)             │
// │          └── Presenter (swapchain, pipeline, frame slots)       │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. RedrawRequested arrives
// 2. Presenter waits on the slot fence, acquires, records, submits, presents
// 3. Another redraw is requested immediately
//
// Any failure ends the event loop and is returned from main.
// =============================================================================

use anyhow::{Context, Result};
use std::sync::Arc;
use viewport_triangle::backend::device::DIAGNOSTIC_TARGET;
use viewport_triangle::backend::{VulkanDevice, WindowHandles};
use viewport_triangle::{Config, Presenter, PresenterSettings};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let (config, source) = Config::load();

    init_logging(&config);
    log::info!("Starting viewport triangle");
    source.report();
    log::debug!("Config: {:?}", config);
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        config.window.title
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Driver diagnostics go through their own target, always at trace, so the
/// configured level never hides them. Everything lands on stdout.
fn init_logging(config: &Config) {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder
        .filter_level(config.log_level())
        .filter_module(DIAGNOSTIC_TARGET, LevelFilter::Trace)
        .parse_default_env()
        .target(Target::Stdout);
    builder.init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// IMPORTANT: Field order matters for Drop! The presenter holds an Arc of
/// the device, but is declared first so its resources go before the
/// window does.
struct App {
    config: Config,
    presenter: Option<Presenter>,
    device: Option<Arc<VulkanDevice>>,
    window: Option<Arc<Window>>,
    /// First fatal error; returned from main once the loop exits
    error: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            presenter: None,
            device: None,
            window: None,
            error: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window_config = &self.config.window;
        let window_attributes = WindowAttributes::default()
            .with_title(&window_config.title)
            .with_inner_size(PhysicalSize::new(window_config.width, window_config.height))
            .with_resizable(window_config.resizable);

        let window = Arc::new(
            event_loop
                .create_window(window_attributes)
                .context("Failed to create window")?,
        );

        let enable_validation = self.config.debug.validation_layers;
        let device = VulkanDevice::new(
            &window_config.title,
            enable_validation,
            WindowHandles::of(window.as_ref()),
        )?;

        let settings = PresenterSettings::from_config(&self.config);
        let presenter = Presenter::new(device.clone(), &settings)?;

        window.request_redraw();

        self.presenter = Some(presenter);
        self.device = Some(device);
        self.window = Some(window);
        Ok(())
    }

    /// Swapchain recreation does not exist; a new size is the end.
    fn check_size(&self, size: PhysicalSize<u32>) -> Result<()> {
        if let Some(presenter) = &self.presenter {
            let extent = presenter.extent();
            if size.width != extent.width || size.height != extent.height {
                anyhow::bail!(
                    "Window resized to {}x{} but the swapchain is {}x{}",
                    size.width,
                    size.height,
                    extent.width,
                    extent.height
                );
            }
        }
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        if self.error.is_none() {
            self.error = Some(error);
        }
        event_loop.exit();
    }
}

// =============================================================================
// WINIT EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.error.is_some() {
            return;
        }

        if let Err(e) = self.init(event_loop) {
            self.fail(event_loop, e.context("Failed to initialize Vulkan"));
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down");
                event_loop.exit();
            }

            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                log::info!("Escape pressed, shutting down");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                if let Err(e) = self.check_size(size) {
                    self.fail(event_loop, e);
                }
            }

            WindowEvent::RedrawRequested => {
                let result = match self.presenter.as_mut() {
                    Some(presenter) => presenter.draw(),
                    None => return,
                };

                match result {
                    Ok(()) => {
                        if let Some(window) = &self.window {
                            window.request_redraw();
                        }
                    }
                    Err(e) => self.fail(event_loop, e.context("Frame failed")),
                }
            }

            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(presenter) = &self.presenter {
            log::info!(
                "Drew {} frames across {} slots",
                presenter.frames_drawn(),
                presenter.completed_per_slot().len()
            );
        }
        // Presenter before device, device before window
        self.presenter = None;
        self.device = None;
    }
}
