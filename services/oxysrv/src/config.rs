//! Service configuration
//!
//! Loaded from an optional YAML file merged with `OXYSRV_`-prefixed
//! environment variables (e.g. `OXYSRV_PLC__HOST`, `OXYSRV_DEMO_MODE`).

use common::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::polling::MIN_POLL_INTERVAL_MS;

/// Default PLC port
pub const DEFAULT_PLC_PORT: u16 = 500;

/// Top-level service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// PLC endpoint
    pub plc: PlcConfig,
    /// Route all reads/writes through the simulated path
    pub demo_mode: bool,
    /// Poll cycle settings
    pub polling: PollingConfig,
    /// Redis pub/sub endpoint for event fan-out
    pub redis: RedisConfig,
    /// Logging settings
    pub logging: LogConfig,
}

/// PLC endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlcConfig {
    /// PLC host address
    pub host: String,
    /// PLC TCP port
    pub port: u16,
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PLC_PORT,
        }
    }
}

/// Poll cycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Poll period in milliseconds; values below the floor are raised
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_ms: 500 }
    }
}

/// Redis endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Load from an optional YAML file plus environment overrides,
    /// normalizing values that have enforced bounds
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut config: ServiceConfig = common::config::load_config(file, "OXYSRV_")?;
        config.polling.interval_ms = config.polling.interval_ms.max(MIN_POLL_INTERVAL_MS);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_hardware_profile() {
        let config = ServiceConfig::default();
        assert_eq!(config.plc.port, 500);
        assert_eq!(config.polling.interval_ms, 500);
        assert!(!config.demo_mode);
    }

    #[test]
    fn load_enforces_interval_floor() {
        // No file: defaults only, then the floor is applied
        let mut config = ServiceConfig::default();
        config.polling.interval_ms = 10;
        assert!(config.polling.interval_ms < MIN_POLL_INTERVAL_MS);

        let loaded = ServiceConfig::load(None).unwrap();
        assert!(loaded.polling.interval_ms >= MIN_POLL_INTERVAL_MS);
    }
}
