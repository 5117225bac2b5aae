//! Logging configuration shared by all services
//!
//! Builds a `tracing` subscriber from a small declarative config and
//! returns the non-blocking appender guard that must be kept alive for
//! file logging to flush.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level directive (trace, debug, info, warn, error)
    pub level: String,
    /// Enable console output
    pub console: bool,
    /// Optional log file path; enables the file layer when set
    pub file: Option<String>,
    /// Enable ANSI colors in console output
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: true,
            file: None,
            ansi: true,
        }
    }
}

/// Initialize the global tracing subscriber
///
/// Returns a guard that must be kept alive for file logging to work.
/// `RUST_LOG` overrides the configured level when set.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::Logging(format!("Invalid log level '{}': {e}", config.level)))?;

    let mut layers = Vec::new();
    let mut guard = None;

    if config.console {
        let layer = fmt::layer()
            .with_ansi(config.ansi)
            .with_target(true)
            .boxed();
        layers.push(layer);
    }

    if let Some(path) = &config.file {
        let path = Path::new(path);
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let file_name = path
            .file_name()
            .ok_or_else(|| Error::Logging(format!("Invalid log file path: {}", path.display())))?;

        let appender = tracing_appender::rolling::daily(dir, file_name);
        let (non_blocking, g) = tracing_appender::non_blocking(appender);
        guard = Some(g);

        let layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        layers.push(layer);
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .map_err(|e| Error::Logging(format!("Failed to initialize logging: {e}")))?;

    Ok(guard)
}
