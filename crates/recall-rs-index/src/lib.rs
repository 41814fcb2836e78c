//! Approximate nearest-neighbour index for fixed-dimension embeddings.
//!
//! The index is a hierarchical navigable small-world graph scored by cosine
//! similarity. It lives entirely in memory; callers persist it by draining
//! [`IndexChanges`] and writing the touched [`IndexNode`]s, and rebuild it with
//! [`HnswIndex::restore`].

mod error;
mod hnsw;
mod node;
mod params;
pub mod similarity;

/// Error type for index operations.
pub use error::IndexError;
/// Graph index and search results.
pub use hnsw::{HnswIndex, IndexChanges, SearchHit};
/// Persistable graph node.
pub use node::IndexNode;
/// Build and query parameters.
pub use params::IndexParams;
