//! Logging initialization.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info,vkr_rhi=debug,vkr_renderer=debug";

/// Install the global tracing subscriber.
///
/// Honors `RUST_LOG`; falls back to [`DEFAULT_FILTER`]. Calling this twice
/// is harmless, the second install is ignored.
///
/// ```
/// vkr_core::init_logging();
/// tracing::info!("logging ready");
/// ```
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}
