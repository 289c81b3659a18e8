//! vkr - textured mesh viewer.
//!
//! Loads `vkr.toml` (or the file given with `--config`), applies command-line
//! overrides, opens a window and renders until it is closed.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;

use vkr_core::{DEFAULT_CONFIG_PATH, DeviceSelection, EngineConfig, FrameClock, VsyncMode};
use vkr_platform::Window;
use vkr_renderer::recorder::{FrameInfo, OverlayHook};
use vkr_renderer::Renderer;
use vkr_rhi::command::CommandBuffer;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VsyncArg {
    Fifo,
    Mailbox,
}

impl From<VsyncArg> for VsyncMode {
    fn from(arg: VsyncArg) -> Self {
        match arg {
            VsyncArg::Fifo => VsyncMode::Fifo,
            VsyncArg::Mailbox => VsyncMode::Mailbox,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DeviceSelectionArg {
    FirstSuitable,
    Scored,
}

impl From<DeviceSelectionArg> for DeviceSelection {
    fn from(arg: DeviceSelectionArg) -> Self {
        match arg {
            DeviceSelectionArg::FirstSuitable => DeviceSelection::FirstSuitable,
            DeviceSelectionArg::Scored => DeviceSelection::Scored,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "vkr", version, about = "Render a textured mesh with Vulkan")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Force the validation layer on
    #[arg(long, conflicts_with = "no_validation")]
    validation: bool,

    /// Force the validation layer off
    #[arg(long)]
    no_validation: bool,

    /// Presentation mode preference
    #[arg(long, value_enum)]
    vsync: Option<VsyncArg>,

    /// Physical device selection policy
    #[arg(long, value_enum)]
    device_selection: Option<DeviceSelectionArg>,
}

impl Args {
    fn apply(&self, config: &mut EngineConfig) {
        if self.validation {
            config.graphics.validation = true;
        }
        if self.no_validation {
            config.graphics.validation = false;
        }
        if let Some(vsync) = self.vsync {
            config.graphics.vsync_mode = vsync.into();
        }
        if let Some(selection) = self.device_selection {
            config.graphics.device_selection = selection.into();
        }
    }
}

/// Logs frame rate once per second. Draws nothing.
struct FpsOverlay {
    clock: FrameClock,
}

impl OverlayHook for FpsOverlay {
    fn draw(&mut self, _cmd: &CommandBuffer, frame: &FrameInfo) {
        if let Some(stats) = self.clock.tick() {
            info!(
                "{:.1} fps ({:.2} ms/frame) at {}x{}, frame {}",
                stats.fps,
                stats.avg_frame_ms,
                frame.extent.width,
                frame.extent.height,
                frame.frame_index
            );
        }
    }
}

fn main() -> Result<()> {
    vkr_core::init_logging();

    let args = Args::parse();
    let mut config = EngineConfig::load(&args.config)
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    args.apply(&mut config);
    info!("Starting vkr with {:?}", config.graphics);

    let mut window = Window::new(&config.window).context("failed to create window")?;
    let mut renderer = Renderer::new(&config, &mut window).context("failed to initialize renderer")?;
    info!(
        "Rendering on {} ({})",
        renderer.physical_device().device_name(),
        renderer.physical_device().device_type_name()
    );

    renderer.set_overlay(Box::new(FpsOverlay {
        clock: FrameClock::new(Duration::from_secs(1)),
    }));
    renderer.run(&mut window)?;

    info!("Shutting down");
    Ok(())
}
