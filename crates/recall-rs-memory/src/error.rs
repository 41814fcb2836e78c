//! Error types for memory operations.

use crate::gateway::EmbeddingError;
use recall_rs_config::ConfigError;
use recall_rs_index::IndexError;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Errors returned by the memory engine and record store.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Caller input is malformed.
    #[error("{0}")]
    Validation(String),
    /// The referenced record does not exist.
    #[error("memory '{0}' not found")]
    NotFound(String),
    /// Embedding profile or store identity disagrees with the store config.
    #[error("{0}")]
    ConfigMismatch(String),
    /// The embedding provider could not produce a vector.
    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// The embedding provider does not serve the configured model.
    #[error("embedding model not found: {0}")]
    ModelNotFound(String),
    /// The store's backing files cannot be opened or parsed.
    #[error("store at {} is corrupt: {message}", path.display())]
    StoreCorrupt { path: PathBuf, message: String },
    /// The backing database rejected an operation.
    #[error("storage error: {0}")]
    Storage(String),
    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable classification of [`MemoryError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    ConfigMismatch,
    ProviderUnavailable,
    ModelNotFound,
    StoreCorrupt,
    Storage,
    Io,
}

impl ErrorKind {
    /// Machine-readable code reported on the command surface.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ConfigMismatch => "config_mismatch",
            ErrorKind::ProviderUnavailable => "provider_unavailable",
            ErrorKind::ModelNotFound => "model_not_found",
            ErrorKind::StoreCorrupt => "store_corrupt",
            ErrorKind::Storage => "storage_error",
            ErrorKind::Io => "io_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl MemoryError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MemoryError::Validation(_) => ErrorKind::Validation,
            MemoryError::NotFound(_) => ErrorKind::NotFound,
            MemoryError::ConfigMismatch(_) => ErrorKind::ConfigMismatch,
            MemoryError::ProviderUnavailable(_) => ErrorKind::ProviderUnavailable,
            MemoryError::ModelNotFound(_) => ErrorKind::ModelNotFound,
            MemoryError::StoreCorrupt { .. } => ErrorKind::StoreCorrupt,
            MemoryError::Storage(_) => ErrorKind::Storage,
            MemoryError::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        MemoryError::Validation(message.into())
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        MemoryError::StoreCorrupt {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

impl From<rusqlite::Error> for MemoryError {
    fn from(err: rusqlite::Error) -> Self {
        MemoryError::Storage(err.to_string())
    }
}

impl From<ConfigError> for MemoryError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Io(err) => MemoryError::Io(err),
            ConfigError::Corrupt { path, message } => MemoryError::StoreCorrupt { path, message },
            ConfigError::Invalid(message) => MemoryError::Validation(message),
        }
    }
}

impl From<IndexError> for MemoryError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::DimensionMismatch { expected, actual } => MemoryError::ConfigMismatch(
                format!("embedding has dimension {actual}, store expects {expected}"),
            ),
            IndexError::NonFiniteVector | IndexError::InvalidParams(_) => {
                MemoryError::Validation(err.to_string())
            }
            IndexError::Corrupt(message) => MemoryError::Storage(format!("index: {message}")),
        }
    }
}

impl From<EmbeddingError> for MemoryError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::ModelNotFound(model) => MemoryError::ModelNotFound(model),
            other => MemoryError::ProviderUnavailable(other.to_string()),
        }
    }
}
