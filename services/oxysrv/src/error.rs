//! Error handling for the Oxygen Monitoring Service
//!
//! One service-wide error enum; PLC-facing layers produce the
//! connection/timeout/protocol variants, the calibration and alarm
//! layers produce validation/not-found, and the register service
//! produces busy when a read overlaps another.

use thiserror::Error;

/// Oxygen Monitoring Service error type
#[derive(Error, Debug, Clone)]
pub enum OxySrvError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Input/Output operation errors
    #[error("IO error: {0}")]
    IoError(String),

    /// Malformed or unexpected protocol data
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Connection establishment and socket-level errors
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Operation exceeded its timeout bound
    #[error("Timeout error: {0}")]
    TimeoutError(String),

    /// A PLC read was attempted while another was in flight
    #[error("Device busy: {0}")]
    BusyError(String),

    /// Invalid caller-supplied data (e.g. out-of-order calibration points)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Lookup miss on a mutating operation
    #[error("Not found: {0}")]
    NotFound(String),

    /// Record store failures
    #[error("Storage error: {0}")]
    Storage(String),

    /// Event publishing failures
    #[error("Publish error: {0}")]
    PublishError(String),

    /// General internal errors
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias for the Oxygen Monitoring Service
pub type Result<T> = std::result::Result<T, OxySrvError>;

impl From<std::io::Error> for OxySrvError {
    fn from(err: std::io::Error) -> Self {
        OxySrvError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for OxySrvError {
    fn from(err: serde_json::Error) -> Self {
        OxySrvError::InternalError(format!("JSON error: {err}"))
    }
}

impl From<figment::Error> for OxySrvError {
    fn from(err: figment::Error) -> Self {
        OxySrvError::ConfigError(format!("Configuration error: {err}"))
    }
}

impl From<redis::RedisError> for OxySrvError {
    fn from(err: redis::RedisError) -> Self {
        OxySrvError::PublishError(format!("Redis error: {err}"))
    }
}

impl From<common::Error> for OxySrvError {
    fn from(err: common::Error) -> Self {
        match err {
            common::Error::Config(msg) => OxySrvError::ConfigError(msg),
            common::Error::Logging(msg) => OxySrvError::InternalError(msg),
        }
    }
}

// Helper methods for creating errors
impl OxySrvError {
    pub fn config(msg: impl Into<String>) -> Self {
        OxySrvError::ConfigError(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        OxySrvError::ProtocolError(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        OxySrvError::ConnectionError(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        OxySrvError::TimeoutError(msg.into())
    }

    pub fn busy(msg: impl Into<String>) -> Self {
        OxySrvError::BusyError(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        OxySrvError::ValidationError(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        OxySrvError::NotFound(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        OxySrvError::Storage(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        OxySrvError::InternalError(msg.into())
    }
}
