//! Error types for taskwire configuration

use std::path::PathBuf;
use thiserror::Error;

/// Result alias for configuration operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors reported by `taskwire-core`
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a config file could not be located or loaded
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No config file in the directory or any of its parents
    #[error("no taskwire config file found in {0} or its parents")]
    NotFound(PathBuf),

    #[error("invalid YAML config: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("invalid TOML config: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),
}
