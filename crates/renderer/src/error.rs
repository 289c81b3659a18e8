//! Renderer error type.

use thiserror::Error;
use vkr_resources::ResourceError;
use vkr_rhi::RhiError;

#[derive(Error, Debug)]
pub enum RendererError {
    #[error(transparent)]
    Rhi(#[from] RhiError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Window or surface failure reported by the platform layer.
    #[error(transparent)]
    Platform(#[from] vkr_core::Error),
}

pub type RendererResult<T> = Result<T, RendererError>;
