//! Workspace-level error type.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised outside the GPU layer: configuration, file access and the
/// window system.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The config file exists but could not be parsed.
    #[error("Config error in {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config value: {0}")]
    InvalidConfig(String),

    #[error("Window error: {0}")]
    Window(String),

    /// Surface creation or extension enumeration through the window system.
    #[error("Surface error: {0}")]
    Surface(String),
}

pub type Result<T> = std::result::Result<T, Error>;
