// Deferred renderer stub
//
// Tracks the swapchain extent and when the G-buffer would need rebuilding.
// The frame itself is just the render pass clear.

use anyhow::Result;
use ash::vk;

use super::{FrameDescriptor, RecordTarget, Renderer, RendererKind};
use crate::config::RendererConfig;
use crate::context::FrameOrchestrator;

const MAX_MSAA_SAMPLES: u32 = 8;

pub struct DeferredRenderer {
    last_extent: vk::Extent2D,
    recreate_gbuffer: bool,
    samples: u32,
}

impl DeferredRenderer {
    pub fn new(config: &RendererConfig) -> Self {
        Self {
            last_extent: vk::Extent2D::default(),
            recreate_gbuffer: false,
            samples: config.msaa_samples.clamp(1, MAX_MSAA_SAMPLES),
        }
    }

    fn track_extent(&mut self, extent: vk::Extent2D) {
        self.last_extent = extent;
        self.recreate_gbuffer = true;
    }

    /// Consume a pending G-buffer rebuild
    fn take_gbuffer_request(&mut self) -> bool {
        std::mem::take(&mut self.recreate_gbuffer)
    }
}

impl Renderer for DeferredRenderer {
    fn name(&self) -> &'static str {
        "Deferred Renderer"
    }

    fn kind(&self) -> RendererKind {
        RendererKind::Deferred
    }

    fn record(&mut self, frame: &FrameDescriptor, _target: &RecordTarget<'_>) -> Result<()> {
        if self.take_gbuffer_request() {
            log::debug!(
                "Frame {}: G-buffer targets resized to {}x{} (MSAA x{})",
                frame.frame_index,
                self.last_extent.width,
                self.last_extent.height,
                self.samples
            );
        }
        Ok(())
    }

    fn on_swapchain_updated(
        &mut self,
        _context: &FrameOrchestrator,
        extent: vk::Extent2D,
    ) -> Result<()> {
        self.track_extent(extent);
        Ok(())
    }

    fn overlay(&self, _frame: &FrameDescriptor) -> String {
        format!(
            "MSAA: x{} | Swapchain: {}x{}",
            self.samples, self.last_extent.width, self.last_extent.height
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(msaa_samples: u32) -> RendererConfig {
        RendererConfig {
            msaa_samples,
            ..Default::default()
        }
    }

    #[test]
    fn msaa_samples_clamped() {
        assert_eq!(DeferredRenderer::new(&config(0)).samples, 1);
        assert_eq!(DeferredRenderer::new(&config(4)).samples, 4);
        assert_eq!(DeferredRenderer::new(&config(64)).samples, 8);
    }

    #[test]
    fn swapchain_update_requests_one_gbuffer_rebuild() {
        let mut renderer = DeferredRenderer::new(&config(1));
        assert!(!renderer.take_gbuffer_request());

        renderer.track_extent(vk::Extent2D {
            width: 1920,
            height: 1080,
        });

        assert!(renderer.take_gbuffer_request());
        assert!(!renderer.take_gbuffer_request());
        assert_eq!(renderer.last_extent.width, 1920);
    }

    #[test]
    fn overlay_reports_extent() {
        let mut renderer = DeferredRenderer::new(&config(2));
        renderer.track_extent(vk::Extent2D {
            width: 800,
            height: 600,
        });

        let text = renderer.overlay(&FrameDescriptor::default());
        assert_eq!(text, "MSAA: x2 | Swapchain: 800x600");
        assert_eq!(renderer.name(), "Deferred Renderer");
        assert_eq!(renderer.kind(), RendererKind::Deferred);
    }
}
