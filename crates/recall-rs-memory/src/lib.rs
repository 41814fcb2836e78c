//! Persistent semantic memory store.
//!
//! Records live in a SQLite database next to the store's
//! `memory_config.json`; their embeddings live in a graph index persisted in
//! the same database. [`MemoryEngine`] ties the two together behind an
//! [`EmbeddingGateway`] and an advisory lock on the store directory.

pub mod engine;
pub mod error;
pub mod gateway;
mod lock;
pub mod model;
mod store;

/// Orchestrating engine and its tunables.
pub use engine::{EngineOptions, IntegrityReport, MemoryEngine};
/// Error type and stable error kinds.
pub use error::{ErrorKind, MemoryError};
/// Embedding gateway contract.
pub use gateway::{EmbeddingError, EmbeddingGateway, preprocess};
/// Record model and request types.
pub use model::{
    Category, ImportanceStats, ListOptions, MemoryRecord, NewMemory, QueryHit, QueryRequest,
    RecordFilter, RecordStats, SortBy, SortOrder, StoreStats, UpdateMemory,
};
