//! Configuration file and environment overrides
//!
//! Settings come from a TOML file (`--config`, or `porter/config.toml` under
//! the platform config directory) and are then overridden by `PORTER_*`
//! environment variables. Every section falls back to its defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transfer::{ImportOptions, SerializeOptions};

pub const STORE_ENV: &str = "PORTER_STORE";
pub const METADATA_ENV: &str = "PORTER_METADATA";
pub const LOG_ENV: &str = "PORTER_LOG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub metadata: MetadataConfig,
    pub store: StoreConfig,
    pub import: ImportConfig,
    pub export: ExportConfig,
    pub log: LogConfig,
}

/// Entity definition files, merged in order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Snapshot file of the store
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub validate: bool,
    pub optimistic_locking: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub pretty: bool,
    pub compact_repeated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default `env_logger` filter; `RUST_LOG` still wins
    pub level: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("porter-store.json"),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            validate: true,
            optimistic_locking: false,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            pretty: true,
            compact_repeated: true,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl Config {
    /// `porter/config.toml` under the platform config directory
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("porter").join("config.toml"))
    }

    /// Load configuration and apply environment overrides
    ///
    /// An explicit path must exist; the default path may be missing.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => {
                    log::debug!("No config file, using defaults");
                    Config::default()
                }
            },
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Override settings from the environment; empty values are ignored
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(path) = var(STORE_ENV) {
            self.store.path = PathBuf::from(path);
        }
        if let Some(paths) = var(METADATA_ENV) {
            self.metadata.paths = std::env::split_paths(&paths).collect();
        }
        if let Some(level) = var(LOG_ENV) {
            self.log.level = level;
        }
    }

    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            validate: self.import.validate,
            optimistic_locking: self.import.optimistic_locking,
        }
    }

    pub fn serialize_options(&self) -> SerializeOptions {
        SerializeOptions {
            compact_repeated: self.export.compact_repeated,
            pretty: self.export.pretty,
        }
    }
}
