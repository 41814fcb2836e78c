//! Graph node representation shared with the persistence layer.

use serde::{Deserialize, Serialize};

/// One indexed vector and its neighbour lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexNode {
    /// External record identifier.
    pub id: String,
    /// Insertion sequence number; lower values were inserted earlier.
    pub seq: u64,
    /// Highest layer this node participates in.
    pub level: usize,
    /// Stored vector, exactly as inserted.
    pub vector: Vec<f32>,
    /// Neighbour sequence numbers per layer (`links.len() == level + 1`).
    pub links: Vec<Vec<u64>>,
}
