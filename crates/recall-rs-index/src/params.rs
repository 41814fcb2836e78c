//! Tunable parameters for graph construction and search.

use crate::IndexError;
use serde::{Deserialize, Serialize};

/// Graph degree and search widths.
///
/// `m` and `ef_construction` shape the graph and are fixed once nodes exist;
/// `ef_search` is only a default and can be overridden per query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexParams {
    /// Maximum neighbours per node on upper layers (layer 0 allows `2 * m`).
    #[serde(default = "default_m")]
    pub m: usize,
    /// Candidate list width used while linking a new node.
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,
    /// Default candidate list width at query time.
    #[serde(default = "default_ef_search")]
    pub ef_search: usize,
    /// Seed mixed into level assignment.
    #[serde(default)]
    pub seed: u64,
}

fn default_m() -> usize {
    16
}

fn default_ef_construction() -> usize {
    200
}

fn default_ef_search() -> usize {
    64
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            m: default_m(),
            ef_construction: default_ef_construction(),
            ef_search: default_ef_search(),
            seed: 0,
        }
    }
}

impl IndexParams {
    /// Reject parameters the graph cannot be built with.
    pub fn validate(&self) -> Result<(), IndexError> {
        if self.m < 2 {
            return Err(IndexError::InvalidParams(format!(
                "m must be at least 2 (got {})",
                self.m
            )));
        }
        if self.ef_construction == 0 {
            return Err(IndexError::InvalidParams(
                "ef_construction must be positive".to_string(),
            ));
        }
        if self.ef_search == 0 {
            return Err(IndexError::InvalidParams(
                "ef_search must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Neighbour cap for a layer.
    pub fn max_links(&self, layer: usize) -> usize {
        if layer == 0 { self.m * 2 } else { self.m }
    }
}
