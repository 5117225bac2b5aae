//! Shared service plumbing for the oxygen monitoring stack
//!
//! Provides the pieces every service needs regardless of its protocol
//! logic: logging initialization, configuration loading and graceful
//! shutdown handling.

pub mod config;
pub mod logging;
pub mod shutdown;

use thiserror::Error;

/// Errors produced by the shared plumbing
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation failure
    #[error("Configuration error: {0}")]
    Config(String),

    /// Logging subsystem initialization failure
    #[error("Logging error: {0}")]
    Logging(String),
}

/// Result type alias for the shared plumbing
pub type Result<T> = std::result::Result<T, Error>;
