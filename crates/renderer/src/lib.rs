//! Frame orchestration for the viewer.
//!
//! - [`FrameScheduler`] sequences wait, acquire, record, submit and present
//!   against any [`FrameBackend`].
//! - [`Renderer`] is the Vulkan backend: it owns the device, the swapchain
//!   targets, the pipeline and the per-slot frame resources.
//! - [`recorder`] writes the command buffer for a single frame.

mod error;
pub mod frame_manager;
pub mod recorder;
pub mod renderer;
pub mod scheduler;
pub mod swapchain_state;
pub mod ubo;

pub use error::{RendererError, RendererResult};
pub use frame_manager::{FrameData, FrameManager};
pub use recorder::{FrameInfo, OverlayHook};
pub use renderer::Renderer;
pub use scheduler::{FrameBackend, FrameOutcome, FrameScheduler, RebuildReason};
pub use ubo::UniformBufferObject;

/// Maximum number of frames that can be in flight simultaneously.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;
