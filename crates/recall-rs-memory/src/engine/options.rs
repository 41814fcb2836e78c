//! Engine tunables.

use recall_rs_index::IndexParams;
use std::time::Duration;

/// Knobs controlling retries, query oversampling and bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    /// Candidates fetched per requested result before metadata filtering.
    pub oversample: usize,
    /// Upper bound on candidates for the single widened retry.
    pub retry_candidate_cap: usize,
    /// Per-attempt embedding timeout.
    pub embed_timeout: Duration,
    /// Total embedding attempts; only transient provider failures retry.
    pub embed_attempts: u32,
    /// Backoff step; attempt `n` waits `n * retry_backoff`.
    pub retry_backoff: Duration,
    /// Bump `access_count`/`last_accessed_at` for query results.
    pub track_access: bool,
    /// Graph parameters for newly created stores.
    pub index: IndexParams,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            oversample: 4,
            retry_candidate_cap: 1000,
            embed_timeout: Duration::from_secs(60),
            embed_attempts: 3,
            retry_backoff: Duration::from_millis(250),
            track_access: true,
            index: IndexParams::default(),
        }
    }
}
