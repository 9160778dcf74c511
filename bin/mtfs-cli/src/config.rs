//! Configuration file structure

use anyhow::{Context, Result};
use mtfs_common::Params;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend selection and attach parameters
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend")]
    pub name: String,
    /// Directory holding one subdirectory per bucket
    #[serde(default = "default_store_root")]
    pub store_root: PathBuf,
    #[serde(default)]
    pub params: Params,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            name: default_backend(),
            store_root: default_store_root(),
            params: Params::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_backend() -> String {
    mtfs_storage::BACKEND_NAME.to_string()
}

fn default_store_root() -> PathBuf {
    PathBuf::from("./mtfs-buckets")
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Config {
    /// Load the configuration file, or defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
