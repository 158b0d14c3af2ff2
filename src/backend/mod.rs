// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash with RAII ownership per handle type.
// Creation order: instance -> surface -> device -> swapchain -> commands/sync.
// Buffers borrow the device's allocator and may be created at any point after it.

pub mod buffer;
pub mod commands;
pub mod device;
pub mod instance;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use buffer::GpuBuffer;
pub use commands::{CommandPool, RenderTargets};
pub use device::{idle_before_teardown, VulkanDevice};
pub use instance::GraphicsInstance;
pub use surface::WindowSurface;
pub use swapchain::{AcquireOutcome, PresentOutcome, PresentTarget, PresentationChain};
pub use sync::{FrameSubmission, FrameSyncPool, SubmitQueue, SyncDevice};
