//! Engine configuration.
//!
//! YAML configs with `${VAR}` environment expansion, mirroring the seed
//! field catalog format the registry is bootstrapped from. A config can be
//! a single file or a directory of files (catalogs merge).

use std::fs;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod catalog;

pub use catalog::{
    CatalogAlias, CatalogField, FieldCatalog, load_catalog,
    load_catalog_from_path,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("i/o error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("environment expansion failed: {0}")]
    Env(String),

    #[error("invalid catalog: {0}")]
    Catalog(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// State backend for the registry, rules, and unknown fields
    pub store: StoreCfg,

    /// Path to a seed field catalog (file or directory)
    pub catalog: Option<String>,

    pub logging: LogCfg,
}

/// Which state backend to run on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreCfg {
    /// In-memory only; state is lost on restart
    #[default]
    Memory,

    /// SQLite file; registry, rules, and unknown-field counts survive
    /// restarts
    Sqlite { path: String },
}

/// Logging options, passed through to the o11y initialisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogCfg {
    /// Either a simple level like "info" or a full EnvFilter string
    /// e.g. "info,leadforge=debug".
    pub level: Option<String>,

    /// Emit logs as JSON lines when true; otherwise pretty text.
    pub json: bool,

    /// Include file/line/target info in logs.
    pub with_targets: bool,
}

impl Default for LogCfg {
    fn default() -> Self {
        Self {
            level: Some("info".to_owned()),
            json: true,
            with_targets: false,
        }
    }
}

/// Load an [`EngineConfig`] from a YAML file, expanding `${VAR}` references
/// from the environment first.
pub fn load_from_path(file_path: &str) -> ConfigResult<EngineConfig> {
    let raw = fs::read_to_string(file_path)?;
    let expanded = shellexpand::env(&raw)
        .map_err(|e| ConfigError::Env(e.to_string()))?;
    Ok(serde_yaml::from_str(&expanded)?)
}
