//! Error types for config loading and validation.

use std::path::PathBuf;
use thiserror::Error;

/// Errors returned while loading or validating store config.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading or writing a config file failed.
    #[error("failed to access config: {0}")]
    Io(#[from] std::io::Error),
    /// The config file exists but cannot be used.
    #[error("corrupt store config at {}: {message}", path.display())]
    Corrupt { path: PathBuf, message: String },
    /// Caller-supplied values failed validation.
    #[error("invalid config: {0}")]
    Invalid(String),
}
