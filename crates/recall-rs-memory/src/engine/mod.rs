//! Memory engine: validation, embedding and locked store access.
//!
//! Embeddings are requested before any lock is taken; only the subsequent
//! record/index work runs under the store lock, on a blocking thread.

mod backend;
mod options;

pub use backend::IntegrityReport;
pub use options::EngineOptions;

use crate::error::MemoryError;
use crate::gateway::{EmbeddingError, EmbeddingGateway, preprocess};
use crate::model::{
    DEFAULT_IMPORTANCE, ID_PREFIX, ListOptions, MemoryRecord, NewMemory, QueryHit, QueryRequest,
    StoreStats, UpdateMemory, human_size, normalize_tags,
};
use crate::store::{delete_record, insert_record, load_record, record_exists, update_record};
use backend::{Backend, SearchPlan, directory_size, reinitialize};
use chrono::{DateTime, SubsecRound, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use recall_rs_config::StoreConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Text embedded by [`MemoryEngine::init`] to check provider connectivity.
const PROBE_TEXT: &str = "connectivity test";
/// Longest accepted caller-supplied id.
const MAX_ID_LEN: usize = 128;

/// Orchestrates config validation, embedding and store access for one
/// store location.
pub struct MemoryEngine {
    location: PathBuf,
    config: StoreConfig,
    created: bool,
    gateway: Arc<dyn EmbeddingGateway>,
    options: EngineOptions,
    backend: Arc<Mutex<Backend>>,
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("location", &self.location)
            .field("provider", &self.config.provider)
            .field("model", &self.config.model)
            .field("dimension", &self.config.dimension)
            .finish_non_exhaustive()
    }
}

impl MemoryEngine {
    /// Open the store at `location`, creating its config from the gateway's
    /// profile on first use.
    ///
    /// Fails with `ConfigMismatch` when the store was created for a
    /// different provider, model or dimension.
    pub fn open(
        location: impl Into<PathBuf>,
        gateway: Arc<dyn EmbeddingGateway>,
        options: EngineOptions,
    ) -> Result<Self, MemoryError> {
        let location = location.into();
        let profile = gateway.profile();
        let loaded = StoreConfig::load_or_init(&location, &profile, options.index)?;
        if !loaded.config.accepts(&profile) {
            return Err(MemoryError::ConfigMismatch(format!(
                "store at {} was created for {}/{} ({} dimensions) but the active provider is {}/{} ({} dimensions)",
                location.display(),
                loaded.config.provider,
                loaded.config.model,
                loaded.config.dimension,
                profile.provider,
                profile.model,
                profile.dimension
            )));
        }
        info!(
            "opened memory store (path={}, provider={}, model={}, dimension={}, created={})",
            location.display(),
            loaded.config.provider,
            loaded.config.model,
            loaded.config.dimension,
            loaded.created
        );
        Ok(Self::assemble(
            location,
            loaded.config,
            loaded.created,
            gateway,
            options,
        ))
    }

    /// Destroy every record at `location` and re-create the store for the
    /// gateway's profile. Irreversible.
    pub async fn force_reinit(
        location: impl Into<PathBuf>,
        gateway: Arc<dyn EmbeddingGateway>,
        options: EngineOptions,
    ) -> Result<Self, MemoryError> {
        let location = location.into();
        let profile = gateway.profile();
        let index = options.index;
        let target = location.clone();
        let config = tokio::task::spawn_blocking(move || reinitialize(&target, &profile, index))
            .await
            .map_err(task_failed)??;
        warn!(
            "store re-initialised; previous memories were discarded (path={})",
            location.display()
        );
        Ok(Self::assemble(location, config, true, gateway, options))
    }

    fn assemble(
        location: PathBuf,
        config: StoreConfig,
        created: bool,
        gateway: Arc<dyn EmbeddingGateway>,
        options: EngineOptions,
    ) -> Self {
        let backend = Backend::new(location.clone(), config.clone());
        Self {
            location,
            config,
            created,
            gateway,
            options,
            backend: Arc::new(Mutex::new(backend)),
        }
    }

    /// Store directory.
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Config this engine validated at open.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Whether opening this engine created the store config.
    pub fn created(&self) -> bool {
        self.created
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Check that the provider answers with vectors of the configured
    /// dimension and that the record database is usable.
    pub async fn init(&self) -> Result<StoreConfig, MemoryError> {
        let probe = self.embed(PROBE_TEXT).await?;
        debug!("embedding probe succeeded (dimension={})", probe.len());
        self.blocking(|backend| backend.exclusive(|_| Ok(()))).await?;
        Ok(self.config.clone())
    }

    /// Validate, embed and persist a new record.
    pub async fn store(&self, memory: NewMemory) -> Result<MemoryRecord, MemoryError> {
        let content = validate_content(&memory.content)?;
        let importance = validate_importance(memory.importance.unwrap_or(DEFAULT_IMPORTANCE))?;
        let id = match memory.id.as_deref() {
            Some(id) => validate_id(id)?,
            None => generate_id(),
        };
        let vector = self.embed(&content).await?;
        let now = now();
        let record = MemoryRecord {
            id,
            content,
            category: memory.category,
            tags: normalize_tags(&memory.tags),
            importance,
            source: clean_source(memory.source.as_deref()),
            created_at: now,
            updated_at: now,
            access_count: 0,
            last_accessed_at: None,
        };
        let stored = record.clone();
        self.blocking(move |backend| {
            backend.exclusive(|backend| {
                backend.mutate(|tx, index| {
                    if record_exists(tx, &record.id)? {
                        return Err(MemoryError::validation(format!(
                            "memory '{}' already exists",
                            record.id
                        )));
                    }
                    insert_record(tx, &record)?;
                    index.insert(record.id.clone(), vector)?;
                    Ok(())
                })
            })
        })
        .await?;
        info!(
            "stored memory (id={}, category={}, tags={}, importance={})",
            stored.id,
            stored.category,
            stored.tags.len(),
            stored.importance
        );
        Ok(stored)
    }

    /// Fetch a record by id.
    pub async fn get(&self, id: &str) -> Result<MemoryRecord, MemoryError> {
        let id = id.trim().to_string();
        self.blocking(move |backend| {
            backend.shared(|backend| {
                backend
                    .store()?
                    .get(&id)?
                    .ok_or_else(|| MemoryError::NotFound(id.clone()))
            })
        })
        .await
    }

    /// Stored embedding of a record.
    pub async fn embedding(&self, id: &str) -> Result<Vec<f32>, MemoryError> {
        let id = id.trim().to_string();
        self.blocking(move |backend| {
            backend.shared(|backend| {
                backend
                    .index()?
                    .vector(&id)
                    .map(<[f32]>::to_vec)
                    .ok_or_else(|| MemoryError::NotFound(id.clone()))
            })
        })
        .await
    }

    /// Semantic search with metadata filtering.
    ///
    /// Results are ordered by descending similarity and never violate the
    /// request's filter; fewer than `topk` come back when not enough
    /// candidates survive filtering.
    pub async fn query(&self, request: QueryRequest) -> Result<Vec<QueryHit>, MemoryError> {
        if request.text.trim().is_empty() {
            return Err(MemoryError::validation("query text must not be empty"));
        }
        if request.topk == 0 {
            return Err(MemoryError::validation("topk must be positive"));
        }
        if request.ef == Some(0) {
            return Err(MemoryError::validation("ef must be positive"));
        }
        if let Some(threshold) = request.filter.min_importance {
            validate_importance(threshold)?;
        }
        let mut filter = request.filter;
        filter.tags = normalize_tags(&filter.tags);
        let plan = SearchPlan {
            topk: request.topk,
            filter,
            ef: request.ef,
            oversample: self.options.oversample,
            candidate_cap: self.options.retry_candidate_cap,
        };

        let vector = self.embed(&request.text).await?;
        let hits = self
            .blocking(move |backend| backend.shared(|backend| backend.search(&vector, &plan)))
            .await?;
        debug!(
            "query finished (results={}, topk={})",
            hits.len(),
            request.topk
        );
        if self.options.track_access && !hits.is_empty() {
            self.record_access(&hits).await;
        }
        Ok(hits)
    }

    async fn record_access(&self, hits: &[QueryHit]) {
        let ids: Vec<String> = hits.iter().map(|hit| hit.record.id.clone()).collect();
        let count = ids.len();
        let at = now();
        let result = self
            .blocking(move |backend| {
                backend.exclusive(|backend| backend.store()?.record_access(&ids, at))
            })
            .await;
        if let Err(err) = result {
            warn!("failed to record memory access (count={count}): {err}");
        }
    }

    /// Filtered, sorted, paginated listing.
    pub async fn list(&self, mut options: ListOptions) -> Result<Vec<MemoryRecord>, MemoryError> {
        if let Some(threshold) = options.filter.min_importance {
            validate_importance(threshold)?;
        }
        options.filter.tags = normalize_tags(&options.filter.tags);
        self.blocking(move |backend| backend.shared(|backend| backend.store()?.list(&options)))
            .await
    }

    /// Record aggregates plus on-disk size and provider details.
    pub async fn stats(&self) -> Result<StoreStats, MemoryError> {
        let (records, size_bytes) = self
            .blocking(|backend| {
                backend.shared(|backend| {
                    let records = backend.store()?.stats()?;
                    let size_bytes = directory_size(backend.location())?;
                    Ok((records, size_bytes))
                })
            })
            .await?;
        Ok(StoreStats {
            records,
            size_bytes,
            size_human: human_size(size_bytes),
            provider: self.config.provider.clone(),
            model: self.config.model.clone(),
            dimension: self.config.dimension,
            path: self.location.display().to_string(),
        })
    }

    /// Partially update a record, re-embedding it when the content changes.
    pub async fn update(
        &self,
        id: &str,
        changes: UpdateMemory,
    ) -> Result<MemoryRecord, MemoryError> {
        if changes.is_empty() {
            return Err(MemoryError::validation("no fields to update"));
        }
        let id = id.trim().to_string();
        let content = changes.content.as_deref().map(validate_content).transpose()?;
        let importance = changes.importance.map(validate_importance).transpose()?;
        let tags = changes.tags.as_ref().map(|tags| normalize_tags(tags));
        let source = changes.source.as_deref().map(|source| clean_source(Some(source)));
        let category = changes.category;
        let vector = match content.as_deref() {
            Some(content) => Some(self.embed(content).await?),
            None => None,
        };

        let updated = self
            .blocking(move |backend| {
                backend.exclusive(|backend| {
                    backend.mutate(|tx, index| {
                        let mut record = load_record(tx, &id)?
                            .ok_or_else(|| MemoryError::NotFound(id.clone()))?;
                        if let Some(content) = content {
                            record.content = content;
                        }
                        if let Some(category) = category {
                            record.category = category;
                        }
                        if let Some(tags) = tags {
                            record.tags = tags;
                        }
                        if let Some(importance) = importance {
                            record.importance = importance;
                        }
                        if let Some(source) = source {
                            record.source = source;
                        }
                        record.updated_at = now().max(record.created_at);
                        update_record(tx, &record)?;
                        if let Some(vector) = vector {
                            index.insert(record.id.clone(), vector)?;
                        }
                        Ok(record)
                    })
                })
            })
            .await?;
        info!(
            "updated memory (id={}, reembedded={})",
            updated.id,
            changes.content.is_some()
        );
        Ok(updated)
    }

    /// Delete a record; returns false when it did not exist.
    pub async fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        let id = id.trim().to_string();
        if id.is_empty() {
            return Err(MemoryError::validation("id must not be empty"));
        }
        let log_id = id.clone();
        let deleted = self
            .blocking(move |backend| {
                backend.exclusive(|backend| {
                    backend.mutate(|tx, index| {
                        let existed = delete_record(tx, &id)?;
                        let indexed = index.remove(&id);
                        if existed != indexed {
                            warn!(
                                "record and index disagreed on delete (id={id}, record={existed}, indexed={indexed})"
                            );
                        }
                        Ok(existed)
                    })
                })
            })
            .await?;
        debug!("delete memory (id={log_id}, deleted={deleted})");
        Ok(deleted)
    }

    /// Cross-check records against the persisted graph.
    pub async fn verify(&self) -> Result<IntegrityReport, MemoryError> {
        self.blocking(|backend| backend.shared(Backend::verify))
            .await
    }

    /// Embed `text` with bounded retries for transient provider failures and
    /// check the result against the store dimension.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let input = preprocess(text);
        let attempts = self.options.embed_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result =
                match tokio::time::timeout(self.options.embed_timeout, self.gateway.embed(&input))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(EmbeddingError::Timeout(self.options.embed_timeout)),
                };
            match result {
                Ok(vector) => return self.check_vector(vector),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    warn!(
                        "embedding attempt failed; retrying (attempt={attempt}, max={attempts}): {err}"
                    );
                    tokio::time::sleep(self.options.retry_backoff * attempt).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn check_vector(&self, vector: Vec<f32>) -> Result<Vec<f32>, MemoryError> {
        if vector.len() != self.config.dimension {
            return Err(MemoryError::ConfigMismatch(format!(
                "provider returned a {}-dimensional embedding but the store expects {}",
                vector.len(),
                self.config.dimension
            )));
        }
        if vector.iter().any(|value| !value.is_finite()) {
            return Err(EmbeddingError::InvalidResponse(
                "embedding contains non-finite values".to_string(),
            )
            .into());
        }
        Ok(vector)
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, MemoryError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Backend) -> Result<T, MemoryError> + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        tokio::task::spawn_blocking(move || {
            let mut backend = backend.lock();
            op(&mut backend)
        })
        .await
        .map_err(task_failed)?
    }
}

fn task_failed(err: tokio::task::JoinError) -> MemoryError {
    MemoryError::Storage(format!("store task failed: {err}"))
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

fn generate_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{ID_PREFIX}{}", &hex[..12])
}

fn validate_content(content: &str) -> Result<String, MemoryError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(MemoryError::validation("content must not be empty"));
    }
    Ok(trimmed.to_string())
}

fn validate_importance(importance: f64) -> Result<f64, MemoryError> {
    if !(0.0..=1.0).contains(&importance) {
        return Err(MemoryError::validation(format!(
            "importance must be between 0.0 and 1.0, got {importance}"
        )));
    }
    Ok(importance)
}

fn validate_id(id: &str) -> Result<String, MemoryError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(MemoryError::validation("id must not be empty"));
    }
    if id.chars().count() > MAX_ID_LEN {
        return Err(MemoryError::validation(format!(
            "id must be at most {MAX_ID_LEN} characters"
        )));
    }
    if !id
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.' | ':'))
    {
        return Err(MemoryError::validation(format!(
            "id '{id}' may only contain letters, digits, '_', '-', '.' and ':'"
        )));
    }
    Ok(id.to_string())
}

fn clean_source(source: Option<&str>) -> Option<String> {
    source
        .map(str::trim)
        .filter(|source| !source.is_empty())
        .map(str::to_string)
}
