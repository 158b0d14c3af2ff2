// Path tracer stub
//
// Owns an accumulation buffer sized to the swapchain (RGBA32F per pixel),
// zeroed through an immediate submit whenever the swapchain changes. Frames
// are filled with the sky color; no rays are traced yet.

use anyhow::Result;
use ash::vk;
use glam::Vec3;
use gpu_allocator::MemoryLocation;

use super::{FrameDescriptor, RecordTarget, Renderer, RendererKind};
use crate::backend::GpuBuffer;
use crate::config::RendererConfig;
use crate::context::FrameOrchestrator;

const MAX_SAMPLES_PER_PIXEL: u32 = 8192;
const MAX_BOUNCES: u32 = 256;
const ACCUMULATION_TEXEL_SIZE: vk::DeviceSize = 4 * std::mem::size_of::<f32>() as vk::DeviceSize;

/// Bytes needed to accumulate one RGBA32F value per pixel
pub fn accumulation_size(extent: vk::Extent2D) -> vk::DeviceSize {
    extent.width as vk::DeviceSize * extent.height as vk::DeviceSize * ACCUMULATION_TEXEL_SIZE
}

pub struct PathTracerRenderer {
    sky_color: Vec3,
    samples_per_pixel: u32,
    max_bounces: u32,
    accumulated_samples: u64,
    accumulation: Option<GpuBuffer>,
}

impl PathTracerRenderer {
    pub fn new(config: &RendererConfig) -> Self {
        Self {
            sky_color: Vec3::from_array(config.sky_color),
            samples_per_pixel: config.samples_per_pixel.clamp(1, MAX_SAMPLES_PER_PIXEL),
            max_bounces: config.max_bounces.clamp(1, MAX_BOUNCES),
            accumulated_samples: 0,
            accumulation: None,
        }
    }

    fn restart_accumulation(&mut self) {
        self.accumulated_samples = 0;
    }

    fn accumulate(&mut self) {
        self.accumulated_samples += self.samples_per_pixel as u64;
    }
}

impl Renderer for PathTracerRenderer {
    fn name(&self) -> &'static str {
        "Path Tracer (HW RT)"
    }

    fn kind(&self) -> RendererKind {
        RendererKind::PathTracer
    }

    fn record(&mut self, _frame: &FrameDescriptor, target: &RecordTarget<'_>) -> Result<()> {
        let attachments = [vk::ClearAttachment {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            color_attachment: 0,
            clear_value: vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.sky_color.extend(1.0).to_array(),
                },
            },
        }];
        let rects = [vk::ClearRect {
            rect: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: target.extent,
            },
            base_array_layer: 0,
            layer_count: 1,
        }];

        unsafe {
            target
                .device
                .cmd_clear_attachments(target.command_buffer, &attachments, &rects);
        }

        if self.accumulation.is_some() {
            self.accumulate();
        }
        Ok(())
    }

    fn on_swapchain_updated(
        &mut self,
        context: &FrameOrchestrator,
        extent: vk::Extent2D,
    ) -> Result<()> {
        // The device is idle after recreation; the old buffer can go first
        self.accumulation = None;
        self.restart_accumulation();

        let size = accumulation_size(extent);
        if size == 0 {
            return Ok(());
        }

        let buffer = GpuBuffer::new(
            context.device().clone(),
            "path tracer accumulation",
            size,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
        )?;

        let raw = buffer.raw;
        context.submit_immediate(|device, command_buffer| {
            unsafe { device.cmd_fill_buffer(command_buffer, raw, 0, vk::WHOLE_SIZE, 0) };
            Ok(())
        })?;

        log::info!(
            "Accumulation buffer: {}x{} ({:.2} MB)",
            extent.width,
            extent.height,
            buffer.size as f64 / (1024.0 * 1024.0)
        );
        self.accumulation = Some(buffer);
        Ok(())
    }

    fn overlay(&self, _frame: &FrameDescriptor) -> String {
        format!(
            "Samples: {} | Bounces: {} | Accumulated: {}",
            self.samples_per_pixel, self.max_bounces, self.accumulated_samples
        )
    }
}
