// Command recording resources
//
// The command pool lives as long as the device. Render pass, framebuffers and
// the per-image command buffers depend on the swapchain and are rebuilt with it.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::{PresentationChain, VulkanDevice};

pub struct CommandPool {
    pub raw: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl CommandPool {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.graphics_queue_family)
            // RESET: buffers are re-recorded every frame
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let raw = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        Ok(Self { raw, device })
    }

    pub fn allocate(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.raw)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { self.device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")
    }

    pub fn free(&self, command_buffers: &[vk::CommandBuffer]) {
        if command_buffers.is_empty() {
            return;
        }
        unsafe {
            self.device.device.free_command_buffers(self.raw, command_buffers);
        }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_command_pool(self.raw, None);
        }
    }
}

/// Swapchain-dependent state: one framebuffer and one command buffer per image
pub struct RenderTargets {
    pub render_pass: vk::RenderPass,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pool: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl RenderTargets {
    pub fn new(
        device: Arc<VulkanDevice>,
        chain: &PresentationChain,
        pool: &CommandPool,
    ) -> Result<Self> {
        let mut targets = Self {
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::with_capacity(chain.image_views.len()),
            command_buffers: Vec::new(),
            pool: pool.raw,
            device,
        };

        targets.render_pass = targets.create_render_pass(chain.format)?;

        for &view in &chain.image_views {
            let framebuffer = targets.create_framebuffer(view, chain.extent)?;
            targets.framebuffers.push(framebuffer);
        }

        targets.command_buffers = pool.allocate(chain.image_views.len() as u32)?;

        log::info!(
            "Created render pass, {} framebuffers and command buffers",
            targets.framebuffers.len()
        );
        Ok(targets)
    }

    fn create_render_pass(&self, format: vk::Format) -> Result<vk::RenderPass> {
        let color_attachment = vk::AttachmentDescription::builder()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build();

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];

        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .build();

        // Color writes must not start before the acquire semaphore's wait stage
        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .build();

        let attachments = [color_attachment];
        let subpasses = [subpass];
        let dependencies = [dependency];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        unsafe { self.device.device.create_render_pass(&create_info, None) }
            .context("Failed to create render pass")
    }

    fn create_framebuffer(&self, view: vk::ImageView, extent: vk::Extent2D) -> Result<vk::Framebuffer> {
        let attachments = [view];
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(self.render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        unsafe { self.device.device.create_framebuffer(&create_info, None) }
            .context("Failed to create framebuffer")
    }

    /// Free command buffers, destroy framebuffers and the render pass.
    /// Idempotent.
    pub fn release(&mut self) {
        unsafe {
            if !self.command_buffers.is_empty() {
                self.device
                    .device
                    .free_command_buffers(self.pool, &self.command_buffers);
                self.command_buffers.clear();
            }

            for framebuffer in self.framebuffers.drain(..) {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }

            if self.render_pass != vk::RenderPass::null() {
                self.device.device.destroy_render_pass(self.render_pass, None);
                self.render_pass = vk::RenderPass::null();
            }
        }
    }
}

impl Drop for RenderTargets {
    fn drop(&mut self) {
        self.release();
    }
}
