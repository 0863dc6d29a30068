//! Configuration error types.

use thiserror::Error;

/// Result type alias for configuration parsing and validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while reading or validating configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid memory quantity: {0}")]
    InvalidMemory(String),

    #[error("invalid walltime: {0}")]
    InvalidWalltime(String),

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("invalid resource configuration: {0}")]
    InvalidResources(String),
}
