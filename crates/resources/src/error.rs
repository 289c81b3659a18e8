//! Error types for asset loading.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("Failed to load OBJ file '{path}': {source}")]
    Obj {
        path: PathBuf,
        #[source]
        source: tobj::LoadError,
    },

    #[error("Failed to load image '{path}': {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Parsed data is structurally unusable (out-of-range index, empty image).
    #[error("Invalid asset data: {0}")]
    InvalidData(String),
}

pub type ResourceResult<T> = Result<T, ResourceError>;
