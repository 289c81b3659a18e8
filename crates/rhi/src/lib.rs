//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! Thin RAII wrappers over `ash` for the pieces a forward renderer needs:
//! - Instance creation and physical device negotiation
//! - Logical device, queues and the memory allocator
//! - Swapchain creation and acquire/present classification
//! - Staged uploads, layout transitions and mipmap generation
//! - Render pass, pipeline, descriptor and synchronization objects

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod sampler;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod transfer;
pub mod vertex;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
