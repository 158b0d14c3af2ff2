// =============================================================================
// FRAME ORCHESTRATOR - the one object the rest of the engine talks to
// =============================================================================
//
// Owns every Vulkan object needed to get an image on screen and wraps the
// frame pacer with command recording:
//
//   begin_frame ──> caller records into FrameContext ──> end_frame
//        │                                                   │
//        └── SwapchainOutOfDate ──> recreate_swapchain <─────┘
//
// IMPORTANT: Field order matters for Drop! Resources are destroyed in
// reverse order of creation (sync objects first, instance last).

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use crate::backend::{
    idle_before_teardown, CommandPool, FrameSyncPool, GraphicsInstance, PresentTarget,
    PresentationChain, RenderTargets, VulkanDevice, WindowSurface,
};
use crate::config::Config;
use crate::pacer::{Acquire, AcquiredImage, FramePacer, FrameStatus};
use crate::platform::RenderWindow;

/// Recording target for one frame. Consumed by `end_frame`.
#[derive(Debug)]
pub struct FrameContext {
    pub command_buffer: vk::CommandBuffer,
    pub extent: vk::Extent2D,
    image: AcquiredImage,
}

impl FrameContext {
    pub fn image_index(&self) -> u32 {
        self.image.image_index
    }

    pub fn slot(&self) -> usize {
        self.image.slot
    }
}

#[derive(Debug)]
pub enum BeginFrame {
    Ready(FrameContext),
    SwapchainOutOfDate,
}

pub struct FrameOrchestrator {
    pacer: FramePacer,
    sync: FrameSyncPool<VulkanDevice>,
    targets: RenderTargets,
    command_pool: CommandPool,
    chain: PresentationChain,
    surface: WindowSurface,
    device: Arc<VulkanDevice>,
    instance: Arc<GraphicsInstance>,
    clear_color: [f32; 4],
}

impl FrameOrchestrator {
    pub fn new(config: &Config, window: &dyn RenderWindow) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        let surface_extensions = window.required_surface_extensions()?;
        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
        let instance =
            GraphicsInstance::new(&config.window.title, &surface_extensions, enable_validation)?;

        let surface = WindowSurface::new(instance.clone(), window)?;
        let device = VulkanDevice::new(instance.clone(), &surface)?;

        let chain = PresentationChain::new(device.clone(), &surface, window, config.present_mode())?;
        let command_pool = CommandPool::new(device.clone())?;
        let targets = RenderTargets::new(device.clone(), &chain, &command_pool)?;

        let slot_count = config.frames_in_flight();
        let mut sync = FrameSyncPool::new(device.clone(), slot_count)?;
        let mut pacer = FramePacer::new(&sync);
        pacer.reset(&mut sync, chain.image_count());

        log::info!(
            "Vulkan initialized: {} frames in flight, {} swapchain images",
            slot_count,
            chain.image_count()
        );

        Ok(Self {
            pacer,
            sync,
            targets,
            command_pool,
            chain,
            surface,
            device,
            instance,
            clear_color: config.graphics.clear_color,
        })
    }

    /// Acquire an image and open its render pass.
    ///
    /// `SwapchainOutOfDate` means nothing was recorded; recreate and retry.
    pub fn begin_frame(&mut self, window: &dyn RenderWindow) -> Result<BeginFrame> {
        let image = match self
            .pacer
            .acquire(window.was_resized(), &mut self.sync, &self.chain)?
        {
            Acquire::Ready(image) => image,
            Acquire::SwapchainOutOfDate => return Ok(BeginFrame::SwapchainOutOfDate),
        };

        let index = image.image_index as usize;
        let command_buffer = *self
            .targets
            .command_buffers
            .get(index)
            .with_context(|| format!("No command buffer for swapchain image {}", index))?;
        let framebuffer = *self
            .targets
            .framebuffers
            .get(index)
            .with_context(|| format!("No framebuffer for swapchain image {}", index))?;
        let extent = self.chain.extent;

        let device = &self.device.device;
        unsafe {
            device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .context("Failed to reset command buffer")?;

            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .context("Failed to begin command buffer")?;

            let clear_values = [vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            }];
            let render_pass_info = vk::RenderPassBeginInfo::builder()
                .render_pass(self.targets.render_pass)
                .framebuffer(framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                })
                .clear_values(&clear_values);

            device.cmd_begin_render_pass(
                command_buffer,
                &render_pass_info,
                vk::SubpassContents::INLINE,
            );
        }

        log::trace!("Frame slot {} recording into image {}", image.slot, image.image_index);

        Ok(BeginFrame::Ready(FrameContext {
            command_buffer,
            extent,
            image,
        }))
    }

    /// Close the render pass, submit and present.
    ///
    /// Returns `SwapchainOutOfDate` when the chain must be recreated before the
    /// next frame.
    pub fn end_frame(&mut self, frame: FrameContext) -> Result<FrameStatus> {
        let device = &self.device.device;
        unsafe {
            device.cmd_end_render_pass(frame.command_buffer);
            device
                .end_command_buffer(frame.command_buffer)
                .context("Failed to record command buffer")?;
        }

        self.pacer
            .present(frame.image, frame.command_buffer, &self.sync, &self.chain)
    }

    /// Rebuild the chain and everything sized to it.
    ///
    /// Blocks while the window is minimized. Returns false, without touching
    /// anything, if the window closes meanwhile.
    pub fn recreate_swapchain(&mut self, window: &mut dyn RenderWindow) -> Result<bool> {
        let Some(extent) = window.wait_for_nonzero_extent() else {
            log::info!("Window closed while minimized, skipping swapchain recreation");
            return Ok(false);
        };
        log::info!("Recreating swapchain for {}x{}", extent.width, extent.height);

        self.device.wait_idle()?;

        self.targets.release();
        self.chain.recreate(&self.surface, window)?;
        self.targets = RenderTargets::new(self.device.clone(), &self.chain, &self.command_pool)?;

        self.pacer.reset(&mut self.sync, self.chain.image_count());
        Ok(true)
    }

    /// Record and run a one-off command buffer, blocking until the graphics
    /// queue is idle. Independent of the frame slots.
    pub fn submit_immediate<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer) -> Result<()>,
    {
        let command_buffers = self.command_pool.allocate(1)?;
        let command_buffer = command_buffers
            .first()
            .copied()
            .context("No immediate command buffer allocated")?;
        let result = self.run_immediate(command_buffer, record);
        self.command_pool.free(&command_buffers);
        result
    }

    fn run_immediate<F>(&self, command_buffer: vk::CommandBuffer, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer) -> Result<()>,
    {
        let device = &self.device.device;

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(command_buffer, &begin_info) }
            .context("Failed to begin immediate command buffer")?;

        record(device, command_buffer)?;

        unsafe { device.end_command_buffer(command_buffer) }
            .context("Failed to end immediate command buffer")?;

        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
        unsafe {
            device
                .queue_submit(self.device.graphics_queue, &[submit_info.build()], vk::Fence::null())
                .context("Failed to submit immediate commands")?;
            device
                .queue_wait_idle(self.device.graphics_queue)
                .context("Failed to wait for immediate commands")?;
        }
        Ok(())
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // ACCESSORS
    // ─────────────────────────────────────────────────────────────────────────

    pub fn instance(&self) -> &Arc<GraphicsInstance> {
        &self.instance
    }

    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.device.physical_device
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.device.graphics_queue
    }

    pub fn graphics_queue_family(&self) -> u32 {
        self.device.graphics_queue_family
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.device.present_queue
    }

    pub fn present_queue_family(&self) -> u32 {
        self.device.present_queue_family
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.targets.render_pass
    }

    pub fn image_count(&self) -> usize {
        self.chain.image_count()
    }

    pub fn min_image_count(&self) -> u32 {
        self.chain.min_image_count
    }

    pub fn format(&self) -> vk::Format {
        self.chain.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.chain.extent
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.chain.present_mode
    }

    pub fn frame_slot_count(&self) -> usize {
        self.pacer.slot_count()
    }
}

impl Drop for FrameOrchestrator {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        idle_before_teardown(self.device.wait_idle(), "teardown");
    }
}
