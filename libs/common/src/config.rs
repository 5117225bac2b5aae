//! Configuration loading helpers
//!
//! Services load a YAML config file merged with environment variable
//! overrides. Environment wins over the file so deployments can tweak a
//! single knob without editing config on disk.

use crate::{Error, Result};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Load configuration from an optional YAML file plus prefixed
/// environment variables
///
/// Priority (highest to lowest): environment variables, YAML file,
/// `T::default()`. Nested keys are addressed with double underscores,
/// e.g. `OXYSRV_PLC__PORT=502` overrides `plc.port`.
pub fn load_config<T>(file: Option<&Path>, env_prefix: &str) -> Result<T>
where
    T: DeserializeOwned + Serialize + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    if let Some(path) = file {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        figment = figment.merge(Yaml::file(path));
    }

    figment
        .merge(Env::prefixed(env_prefix).split("__"))
        .extract()
        .map_err(|e| Error::Config(format!("Failed to load configuration: {e}")))
}
