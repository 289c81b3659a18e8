//! RHI error types.

use ash::vk;
use gpu_allocator::AllocationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RhiError {
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// The Vulkan loader could not be found or opened.
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    #[error("Allocator error: {0}")]
    AllocatorError(AllocationError),

    /// No enumerated device satisfied the queue, extension, surface and
    /// feature requirements.
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// No memory type matched the resource's requirements.
    #[error("No suitable memory type for allocation")]
    NoSuitableMemoryType,

    /// None of the candidate formats supports the requested features.
    #[error("No supported format among candidates")]
    NoSuitableFormat,

    #[error("Required instance layer not available: {0}")]
    MissingLayer(String),

    #[error("Shader error: {0}")]
    ShaderError(String),

    #[error("Surface error: {0}")]
    SurfaceError(String),

    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// A zero-area extent was requested for a surface-sized resource.
    #[error("Degenerate extent {width}x{height}")]
    ZeroExtent { width: u32, height: u32 },

    /// The (old, new) layout pair has no entry in the transition table.
    #[error("Unsupported layout transition: {old:?} -> {new:?}")]
    UnsupportedTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    /// The format lacks a feature the operation needs (e.g. linear blits).
    #[error("Unsupported format for operation: {0:?}")]
    UnsupportedFormat(vk::Format),

    #[error("Pipeline error: {0}")]
    PipelineError(String),

    #[error("Buffer error: {0}")]
    BufferError(String),
}

impl From<AllocationError> for RhiError {
    fn from(err: AllocationError) -> Self {
        match err {
            AllocationError::NoCompatibleMemoryTypeFound => RhiError::NoSuitableMemoryType,
            other => RhiError::AllocatorError(other),
        }
    }
}

pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_type_mapping() {
        let err: RhiError = AllocationError::NoCompatibleMemoryTypeFound.into();
        assert!(matches!(err, RhiError::NoSuitableMemoryType));

        let err: RhiError = AllocationError::OutOfMemory.into();
        assert!(matches!(err, RhiError::AllocatorError(_)));
    }

    #[test]
    fn test_transition_message_names_layouts() {
        let err = RhiError::UnsupportedTransition {
            old: vk::ImageLayout::GENERAL,
            new: vk::ImageLayout::PRESENT_SRC_KHR,
        };
        let msg = err.to_string();
        assert!(msg.contains("GENERAL"));
        assert!(msg.contains("PRESENT_SRC_KHR"));
    }
}
