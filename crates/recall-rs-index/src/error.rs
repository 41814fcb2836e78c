//! Error types for index operations.

use thiserror::Error;

/// Errors returned by the vector index.
#[derive(Debug, Error, PartialEq)]
pub enum IndexError {
    /// Vector length does not match the index dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    /// Vector contains NaN or infinite components.
    #[error("vector contains non-finite values")]
    NonFiniteVector,
    /// Build or query parameters are out of range.
    #[error("invalid index parameters: {0}")]
    InvalidParams(String),
    /// Restored graph violates a structural invariant.
    #[error("corrupt index: {0}")]
    Corrupt(String),
}
