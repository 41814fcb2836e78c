//! Configuration schema for a memory store.

use chrono::{DateTime, SubsecRound, Utc};
use recall_rs_index::IndexParams;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Config descriptor filename inside a store location.
pub const CONFIG_FILE: &str = "memory_config.json";
/// SQLite database filename inside a store location.
pub const DB_FILE: &str = "memory.db";
/// Descriptor schema version written by this crate.
pub const CONFIG_VERSION: u32 = 1;

/// Persisted descriptor that gates every store operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Descriptor schema version.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Identity of this incarnation of the store; re-initialisation mints a
    /// new one.
    #[serde(default)]
    pub store_id: Uuid,
    /// Embedding provider identifier (`ollama`, `openai`, ...).
    pub provider: String,
    /// Embedding model identifier.
    pub model: String,
    /// Embedding dimension, fixed at creation.
    pub dimension: usize,
    /// Resolved path of the record/index database.
    pub db_path: String,
    /// Creation time in unix seconds.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    /// Optional provider endpoint override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Graph build parameters, fixed at creation.
    #[serde(default)]
    pub index: IndexParams,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

/// Provider, model and dimension produced by the active embedding gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingProfile {
    /// Provider identifier.
    pub provider: String,
    /// Model identifier.
    pub model: String,
    /// Vector length the provider produces.
    pub dimension: usize,
    /// Optional endpoint override.
    pub base_url: Option<String>,
}

impl EmbeddingProfile {
    /// Create a profile without an endpoint override.
    pub fn new(provider: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            dimension,
            base_url: None,
        }
    }

    /// Set the endpoint override.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

impl StoreConfig {
    /// Build a fresh descriptor for a store rooted at `location`.
    pub fn new(location: &Path, profile: &EmbeddingProfile, index: IndexParams) -> Self {
        Self {
            version: CONFIG_VERSION,
            store_id: Uuid::new_v4(),
            provider: profile.provider.clone(),
            model: profile.model.clone(),
            dimension: profile.dimension,
            db_path: location.join(DB_FILE).to_string_lossy().to_string(),
            created_at: Utc::now().trunc_subsecs(0),
            base_url: profile.base_url.clone(),
            index,
        }
    }

    /// Path of the descriptor file for a store location.
    pub fn path_in(location: &Path) -> PathBuf {
        location.join(CONFIG_FILE)
    }

    /// Database path as a filesystem path.
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.db_path)
    }

    /// Provider/model/dimension view of this descriptor.
    pub fn profile(&self) -> EmbeddingProfile {
        EmbeddingProfile {
            provider: self.provider.clone(),
            model: self.model.clone(),
            dimension: self.dimension,
            base_url: self.base_url.clone(),
        }
    }

    /// Whether a gateway profile may operate on this store.
    pub fn accepts(&self, profile: &EmbeddingProfile) -> bool {
        self.provider == profile.provider
            && self.model == profile.model
            && self.dimension == profile.dimension
    }

    /// Validate invariants serde cannot express; returns the first problem.
    pub fn problems(&self) -> Option<String> {
        if self.version != CONFIG_VERSION {
            return Some(format!("unsupported config version {}", self.version));
        }
        if self.dimension == 0 {
            return Some("dimension must be positive".to_string());
        }
        if self.provider.trim().is_empty() {
            return Some("provider must not be empty".to_string());
        }
        if self.model.trim().is_empty() {
            return Some("model must not be empty".to_string());
        }
        if self.db_path.trim().is_empty() {
            return Some("db_path must not be empty".to_string());
        }
        if let Err(err) = self.index.validate() {
            return Some(err.to_string());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::{EmbeddingProfile, StoreConfig};
    use pretty_assertions::assert_eq;
    use recall_rs_index::IndexParams;
    use std::path::Path;

    #[test]
    fn serializes_created_at_as_unix_seconds() {
        let profile = EmbeddingProfile::new("ollama", "nomic-embed-text", 768);
        let config = StoreConfig::new(Path::new("/tmp/store"), &profile, IndexParams::default());
        let value = serde_json::to_value(&config).expect("json");
        assert_eq!(value["created_at"], config.created_at.timestamp());
        assert_eq!(value["dimension"], 768);
        assert!(value.get("base_url").is_none());
        assert!(value["db_path"].as_str().expect("db_path").ends_with("memory.db"));
    }

    #[test]
    fn accepts_matching_profile_only() {
        let profile = EmbeddingProfile::new("ollama", "nomic-embed-text", 768);
        let config = StoreConfig::new(Path::new("/tmp/store"), &profile, IndexParams::default());
        assert!(config.accepts(&profile));
        assert!(!config.accepts(&EmbeddingProfile::new("ollama", "nomic-embed-text", 512)));
        assert!(!config.accepts(&EmbeddingProfile::new(
            "openai",
            "text-embedding-3-small",
            768
        )));
    }

    #[test]
    fn problems_flags_zero_dimension() {
        let profile = EmbeddingProfile::new("ollama", "nomic-embed-text", 0);
        let config = StoreConfig::new(Path::new("/tmp/store"), &profile, IndexParams::default());
        assert_eq!(
            config.problems(),
            Some("dimension must be positive".to_string())
        );
    }
}
