//! Tracing for the server binary.
//!
//! The subscriber is installed before the configuration is read, so it starts
//! at a fallback level and is re-filtered once `logging.level` is known.
//! `RUST_LOG`, when set, always takes precedence.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

static FILTER: OnceLock<FilterHandle> = OnceLock::new();

/// Level used until the configuration has been loaded.
pub const BOOT_LEVEL: &str = "info";

fn rust_log_overrides() -> bool {
    std::env::var_os(EnvFilter::DEFAULT_ENV).is_some()
}

/// Build the filter for `level`, rejecting directives `EnvFilter` cannot parse.
pub fn level_filter(level: &str) -> Result<EnvFilter, String> {
    EnvFilter::try_new(level).map_err(|e| format!("invalid log level {level:?}: {e}"))
}

/// Install the global subscriber at [`BOOT_LEVEL`].
///
/// Returns `false` if a subscriber was already installed.
pub fn init_tracing() -> bool {
    let filter = if rust_log_overrides() {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(BOOT_LEVEL))
    } else {
        EnvFilter::new(BOOT_LEVEL)
    };

    let (filter_layer, handle) = reload::Layer::new(filter);
    let installed = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok();
    if installed {
        let _ = FILTER.set(handle);
    }
    installed
}

/// Re-filter the running subscriber to the configured `level`.
///
/// A no-op when `RUST_LOG` is set or no subscriber was installed here.
pub fn apply_logging_level(level: &str) -> Result<(), String> {
    let filter = level_filter(level)?;
    if rust_log_overrides() {
        tracing::debug!(level, "RUST_LOG is set, keeping its filter");
        return Ok(());
    }
    let Some(handle) = FILTER.get() else {
        return Ok(());
    };
    handle
        .reload(filter)
        .map_err(|e| format!("failed to apply log level: {e}"))?;
    tracing::info!(level, "log level applied");
    Ok(())
}
