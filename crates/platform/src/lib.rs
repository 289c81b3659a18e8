//! Platform layer for the renderer.
//!
//! - [`Window`]: a winit window whose event loop is pumped by the caller
//! - [`Surface`]: RAII Vulkan surface created through `ash-window`
//! - [`PresentationHost`]: the narrow interface the frame loop depends on

mod host;
mod window;

pub use host::{PresentationHost, ResizeFlag};
pub use window::{Surface, Window};
