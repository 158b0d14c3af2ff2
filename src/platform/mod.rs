// Platform layer - windowing behind a trait so the frame core never sees winit
//
// The renderer only needs a handful of things from a window: a surface, its
// framebuffer size, a resize flag and a way to pump events.

pub mod runtime;
pub mod window;

pub use runtime::RuntimeGuard;
pub use window::{RenderWindow, WinitWindow};
