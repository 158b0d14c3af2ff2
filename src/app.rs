// =============================================================================
// APPLICATION - window, orchestrator and renderer wired into a frame loop
// =============================================================================
//
// FRAME FLOW:
// 1. Poll window events
// 2. Begin frame (recreate + retry when the swapchain is out of date)
// 3. GUI callback, then the renderer records into the open render pass
// 4. End frame (submit + present)
// 5. Recreate if presentation reported out-of-date or the window resized

use anyhow::Result;
use std::time::Instant;

use crate::config::Config;
use crate::context::{BeginFrame, FrameOrchestrator};
use crate::pacer::FrameStatus;
use crate::platform::{RenderWindow, WinitWindow};
use crate::renderer::{self, FrameDescriptor, RecordTarget, Renderer};

pub type GuiCallback = Box<dyn FnMut(&FrameDescriptor) -> Result<()>>;

/// Seconds between consecutive frames
#[derive(Debug)]
pub struct FrameClock {
    last: Instant,
}

impl FrameClock {
    pub fn new(now: Instant) -> Self {
        Self { last: now }
    }

    pub fn tick(&mut self, now: Instant) -> f32 {
        let delta = now.saturating_duration_since(self.last).as_secs_f32();
        self.last = now;
        delta
    }
}

/// Frames counted over a window of at least one second
#[derive(Debug)]
pub struct FpsCounter {
    frame_count: u32,
    last_update: Instant,
}

impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            frame_count: 0,
            last_update: now,
        }
    }

    /// Count a frame; returns the average FPS once a second has passed
    pub fn frame(&mut self, now: Instant) -> Option<f32> {
        self.frame_count += 1;

        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f32();
        if elapsed < 1.0 {
            return None;
        }

        let fps = self.frame_count as f32 / elapsed;
        self.frame_count = 0;
        self.last_update = now;
        Some(fps)
    }
}

pub fn format_title(base: &str, fps: f32, frame: &FrameDescriptor, renderer: &dyn Renderer) -> String {
    format!(
        "{} - {:.0} FPS ({:.2}ms) [{}] {}",
        base,
        fps,
        frame.delta_seconds * 1000.0,
        renderer.name(),
        renderer.overlay(frame)
    )
}

/// IMPORTANT: Field order matters for Drop! The renderer's GPU buffers go
/// before the orchestrator, and the orchestrator before the window its
/// surface was created from.
pub struct Application {
    gui_callback: Option<GuiCallback>,
    renderer: Box<dyn Renderer>,
    context: FrameOrchestrator,
    window: WinitWindow,

    title: String,
    show_fps: bool,
    frame_index: u64,
    clock: FrameClock,
    fps: FpsCounter,
}

impl Application {
    pub fn new(config: &Config) -> Result<Self> {
        let window = WinitWindow::new(&config.window)?;
        let context = FrameOrchestrator::new(config, &window)?;

        log::info!(
            "Swapchain: {:?} {}x{}, {:?}, {} images (requested {})",
            context.format(),
            context.extent().width,
            context.extent().height,
            context.present_mode(),
            context.image_count(),
            context.min_image_count()
        );
        log::info!(
            "Queues: graphics family {} ({:?}), present family {} ({:?})",
            context.graphics_queue_family(),
            context.graphics_queue(),
            context.present_queue_family(),
            context.present_queue()
        );
        // Everything an overlay backend needs to attach to this context
        log::debug!(
            "Overlay handles: instance {:?}, physical device {:?}, render pass {:?}",
            context.instance().instance.handle(),
            context.physical_device(),
            context.render_pass()
        );

        let renderer = renderer::create_renderer(&config.renderer, &context)?;

        let now = Instant::now();
        Ok(Self {
            gui_callback: None,
            renderer,
            context,
            window,
            title: config.window.title.clone(),
            show_fps: config.debug.show_fps,
            frame_index: 0,
            clock: FrameClock::new(now),
            fps: FpsCounter::new(now),
        })
    }

    /// Invoked once per frame before the renderer records
    pub fn set_gui_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&FrameDescriptor) -> Result<()> + 'static,
    {
        self.gui_callback = Some(Box::new(callback));
    }

    pub fn run(&mut self) -> Result<()> {
        log::info!(
            "Entering frame loop ({} frame slots, renderer: {})",
            self.context.frame_slot_count(),
            self.renderer.kind()
        );

        while !self.window.should_close() {
            self.window.poll_events();

            let frame = match self.context.begin_frame(&self.window)? {
                BeginFrame::Ready(frame) => frame,
                BeginFrame::SwapchainOutOfDate => {
                    self.recreate_swapchain()?;
                    continue;
                }
            };

            let descriptor = FrameDescriptor {
                delta_seconds: self.clock.tick(Instant::now()),
                frame_index: self.frame_index,
            };
            self.frame_index += 1;
            log::trace!(
                "Frame {} -> image {} (slot {})",
                descriptor.frame_index,
                frame.image_index(),
                frame.slot()
            );

            if let Some(callback) = self.gui_callback.as_mut() {
                callback(&descriptor)?;
            }

            let target = RecordTarget {
                device: &self.context.device().device,
                command_buffer: frame.command_buffer,
                extent: frame.extent,
            };
            self.renderer.record(&descriptor, &target)?;

            let status = self.context.end_frame(frame)?;
            if status == FrameStatus::SwapchainOutOfDate || self.window.was_resized() {
                self.recreate_swapchain()?;
            }

            self.update_fps(&descriptor);
        }

        log::info!("Frame loop finished after {} frames", self.frame_index);
        self.context.wait_idle()
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        if !self.context.recreate_swapchain(&mut self.window)? {
            return Ok(());
        }

        let extent = self.context.extent();
        self.renderer.on_swapchain_updated(&self.context, extent)?;
        self.window.reset_resized_flag();
        Ok(())
    }

    fn update_fps(&mut self, frame: &FrameDescriptor) {
        if !self.show_fps {
            return;
        }

        if let Some(fps) = self.fps.frame(Instant::now()) {
            let title = format_title(&self.title, fps, frame, self.renderer.as_ref());
            self.window.set_title(&title);
        }
    }
}
