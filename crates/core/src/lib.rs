//! Shared foundations for the vkr workspace.
//!
//! - [`EngineConfig`] and its sections, loaded from TOML
//! - the workspace-level [`Error`] type
//! - tracing subscriber setup
//! - [`FrameClock`] for frame pacing statistics

mod clock;
mod config;
mod error;
mod logging;

pub use clock::{FrameClock, FrameStats};
pub use config::{
    AssetConfig, DEFAULT_CONFIG_PATH, DeviceSelection, EngineConfig, GraphicsConfig, VsyncMode,
    WindowConfig,
};
pub use error::{Error, Result};
pub use logging::init_logging;
