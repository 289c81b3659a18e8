//! Engine configuration.
//!
//! Every field has a default, so an empty or partial `vkr.toml` is valid.
//! A missing file yields [`EngineConfig::default`]; a malformed one is an
//! error rather than being silently ignored.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_PATH: &str = "vkr.toml";

/// How the physical device is chosen among the suitable ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSelection {
    /// First enumerated device that passes every requirement.
    #[default]
    FirstSuitable,
    /// Highest score: discrete GPUs first, then largest 2D image dimension.
    /// Devices without geometry shaders are rejected.
    Scored,
}

/// Presentation mode preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VsyncMode {
    /// Strict vsync, always available.
    Fifo,
    /// Low-latency triple buffering, falling back to FIFO when unsupported.
    #[default]
    Mailbox,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            title: "vkr".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Enable `VK_LAYER_KHRONOS_validation` and the debug messenger.
    pub validation: bool,
    pub device_selection: DeviceSelection,
    pub vsync_mode: VsyncMode,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            device_selection: DeviceSelection::default(),
            vsync_mode: VsyncMode::default(),
        }
    }
}

/// Paths of the assets loaded at startup, relative to the working directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    pub model: PathBuf,
    pub texture: PathBuf,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            model: PathBuf::from("assets/viking_room.obj"),
            texture: PathBuf::from("assets/viking_room.png"),
            vertex_shader: PathBuf::from("shaders/vert.spv"),
            fragment_shader: PathBuf::from("shaders/frag.spv"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub assets: AssetConfig,
}

impl EngineConfig {
    /// Parse a config from TOML text. `origin` only labels errors.
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|source| Error::Config {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, or defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => {
                info!("Loading config from {}", path.display());
                Self::from_toml_str(&text, path)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::InvalidConfig(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }
        Ok(())
    }
}
