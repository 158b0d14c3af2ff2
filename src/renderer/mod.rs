// Renderer collaborators
//
// A renderer records into the render pass the orchestrator already opened.
// Both kinds here are stubs: they track swapchain state and clear the frame,
// no real passes.

mod deferred;
mod path_tracer;

pub use deferred::DeferredRenderer;
pub use path_tracer::PathTracerRenderer;

use anyhow::Result;
use ash::vk;
use serde::Deserialize;
use std::fmt;

use crate::config::RendererConfig;
use crate::context::FrameOrchestrator;

/// Per-frame timing handed to the GUI callback and the renderer
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameDescriptor {
    pub delta_seconds: f32,
    pub frame_index: u64,
}

impl FrameDescriptor {
    pub fn fps(&self) -> f32 {
        1.0 / self.delta_seconds.max(0.0001)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RendererKind {
    Deferred,
    PathTracer,
}

impl fmt::Display for RendererKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RendererKind::Deferred => write!(f, "deferred"),
            RendererKind::PathTracer => write!(f, "path_tracer"),
        }
    }
}

/// Command buffer inside an active render pass
pub struct RecordTarget<'a> {
    pub device: &'a ash::Device,
    pub command_buffer: vk::CommandBuffer,
    pub extent: vk::Extent2D,
}

pub trait Renderer {
    /// Human-friendly name for logs and the title bar
    fn name(&self) -> &'static str;

    fn kind(&self) -> RendererKind;

    /// Record this frame's commands. Must not begin or end the render pass.
    fn record(&mut self, frame: &FrameDescriptor, target: &RecordTarget<'_>) -> Result<()>;

    /// Called after the swapchain was rebuilt with `extent`
    fn on_swapchain_updated(
        &mut self,
        _context: &FrameOrchestrator,
        _extent: vk::Extent2D,
    ) -> Result<()> {
        Ok(())
    }

    /// Short stats line shown next to the FPS counter
    fn overlay(&self, frame: &FrameDescriptor) -> String;
}

pub fn create_renderer(
    config: &RendererConfig,
    context: &FrameOrchestrator,
) -> Result<Box<dyn Renderer>> {
    let mut renderer: Box<dyn Renderer> = match config.kind {
        RendererKind::Deferred => Box::new(DeferredRenderer::new(config)),
        RendererKind::PathTracer => Box::new(PathTracerRenderer::new(config)),
    };

    // Size everything that depends on the swapchain up front
    renderer.on_swapchain_updated(context, context.extent())?;

    log::info!("Renderer: {}", renderer.name());
    Ok(renderer)
}
