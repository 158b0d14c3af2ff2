// Window collaborator
//
// `WinitWindow` drives winit through `pump_app_events`, which gives the frame
// loop poll/wait semantics instead of handing control to `run_app`.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::ffi::c_char;
use std::time::Duration;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Window, WindowAttributes, WindowId};

use super::RuntimeGuard;
use crate::config::WindowConfig;

/// What the frame core needs from a window
pub trait RenderWindow {
    /// Process pending events without blocking
    fn poll_events(&mut self);
    /// Block until at least one event arrives
    fn wait_events(&mut self);
    fn should_close(&self) -> bool;
    fn framebuffer_extent(&self) -> vk::Extent2D;
    /// Set by resize events until `reset_resized_flag`
    fn was_resized(&self) -> bool;
    fn reset_resized_flag(&mut self);
    fn required_surface_extensions(&self) -> Result<Vec<*const c_char>>;
    fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<vk::SurfaceKHR>;
    fn set_title(&mut self, title: &str);

    /// Wait out minimization. `None` if the window was closed meanwhile.
    fn wait_for_nonzero_extent(&mut self) -> Option<vk::Extent2D> {
        let mut extent = self.framebuffer_extent();
        while extent.width == 0 || extent.height == 0 {
            if self.should_close() {
                return None;
            }
            self.wait_events();
            extent = self.framebuffer_extent();
        }
        Some(extent)
    }
}

/// Event handler state shared with winit during a pump
struct WindowEvents {
    attributes: WindowAttributes,
    pending: Option<Window>,
    created: bool,
    creation_error: Option<String>,
    resized: bool,
    close_requested: bool,
}

impl ApplicationHandler for WindowEvents {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.created {
            return;
        }
        self.created = true;

        match event_loop.create_window(self.attributes.clone()) {
            Ok(window) => self.pending = Some(window),
            Err(e) => self.creation_error = Some(e.to_string()),
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested");
                self.close_requested = true;
            }
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.resized = true;
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    self.close_requested = true;
                }
            }
            _ => {}
        }
    }
}

pub struct WinitWindow {
    // Field order: window before its event loop, runtime last
    window: Window,
    event_loop: EventLoop<()>,
    events: WindowEvents,
    _runtime: RuntimeGuard,
}

impl WinitWindow {
    pub fn new(config: &WindowConfig) -> Result<Self> {
        let runtime = RuntimeGuard::acquire();
        let mut event_loop = EventLoop::new().context("Failed to create event loop")?;

        let attributes = WindowAttributes::default()
            .with_title(&config.title)
            .with_inner_size(PhysicalSize::new(config.width, config.height));

        let mut events = WindowEvents {
            attributes,
            pending: None,
            created: false,
            creation_error: None,
            resized: false,
            close_requested: false,
        };

        // The window only exists once winit delivers `resumed`
        let window = loop {
            if let PumpStatus::Exit(code) = event_loop.pump_app_events(Some(Duration::ZERO), &mut events) {
                anyhow::bail!("Event loop exited with code {} before the window was created", code);
            }
            if let Some(error) = events.creation_error.take() {
                anyhow::bail!("Failed to create window: {}", error);
            }
            if let Some(window) = events.pending.take() {
                break window;
            }
        };

        log::info!("Window created: {}x{} '{}'", config.width, config.height, config.title);

        Ok(Self {
            window,
            event_loop,
            events,
            _runtime: runtime,
        })
    }

    fn pump(&mut self, timeout: Option<Duration>) {
        if let PumpStatus::Exit(code) = self.event_loop.pump_app_events(timeout, &mut self.events) {
            log::debug!("Event loop exited with code {}", code);
            self.events.close_requested = true;
        }
    }
}

impl RenderWindow for WinitWindow {
    fn poll_events(&mut self) {
        self.pump(Some(Duration::ZERO));
    }

    fn wait_events(&mut self) {
        self.pump(None);
    }

    fn should_close(&self) -> bool {
        self.events.close_requested
    }

    fn framebuffer_extent(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    fn was_resized(&self) -> bool {
        self.events.resized
    }

    fn reset_resized_flag(&mut self) {
        self.events.resized = false;
    }

    fn required_surface_extensions(&self) -> Result<Vec<*const c_char>> {
        let extensions = ash_window::enumerate_required_extensions(self.window.raw_display_handle())
            .context("Failed to query required surface extensions")?;
        Ok(extensions.to_vec())
    }

    fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<vk::SurfaceKHR> {
        let surface = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                self.window.raw_display_handle(),
                self.window.raw_window_handle(),
                None,
            )
        }?;
        Ok(surface)
    }

    fn set_title(&mut self, title: &str) {
        self.window.set_title(title);
    }
}
