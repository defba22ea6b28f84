//! Tracing subscriber setup
//!
//! Filtering follows `RUST_LOG` when set, otherwise the configured default
//! directive.

use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Filter used when `RUST_LOG` is unset, e.g. `"altsync=debug"`
    pub default_directive: String,
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig {
            default_directive: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Install the global subscriber.
///
/// Returns false when one was already installed (tests often race on this).
pub fn init_tracing(config: &TelemetryConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_directive));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };
    result.is_ok()
}
