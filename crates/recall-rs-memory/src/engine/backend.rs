//! Locked access to a store's database and its cached graph.

use crate::error::MemoryError;
use crate::lock::StoreLock;
use crate::model::{QueryHit, RecordFilter};
use crate::store::{RecordStore, persist_index};
use log::{debug, info, warn};
use recall_rs_config::{EmbeddingProfile, StoreConfig};
use recall_rs_index::{HnswIndex, IndexParams};
use rusqlite::Transaction;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

/// Outcome of [`crate::MemoryEngine::verify`].
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct IntegrityReport {
    /// Rows in the record table.
    pub records: usize,
    /// Nodes in the persisted graph.
    pub indexed: usize,
    /// Human-readable descriptions of every violation found.
    pub problems: Vec<String>,
}

impl IntegrityReport {
    /// True when records and index agree and the graph is well formed.
    pub fn is_consistent(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Candidate search settings for one query.
#[derive(Debug, Clone)]
pub(super) struct SearchPlan {
    pub(super) topk: usize,
    pub(super) filter: RecordFilter,
    pub(super) ef: Option<usize>,
    pub(super) oversample: usize,
    pub(super) candidate_cap: usize,
}

#[derive(Debug)]
struct CachedIndex {
    generation: u64,
    index: HnswIndex,
}

/// Per-engine connection and graph cache. Every public method expects to
/// run on a blocking thread.
#[derive(Debug)]
pub(super) struct Backend {
    location: PathBuf,
    config: StoreConfig,
    store: Option<RecordStore>,
    index: Option<CachedIndex>,
}

impl Backend {
    pub(super) fn new(location: PathBuf, config: StoreConfig) -> Self {
        Self {
            location,
            config,
            store: None,
            index: None,
        }
    }

    pub(super) fn location(&self) -> &Path {
        &self.location
    }

    /// Run `op` while holding the store lock in shared mode.
    pub(super) fn shared<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<T, MemoryError>,
    ) -> Result<T, MemoryError> {
        let _lock = StoreLock::shared(&self.location)?;
        self.attach()?;
        op(self)
    }

    /// Run `op` while holding the store lock in exclusive mode.
    pub(super) fn exclusive<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<T, MemoryError>,
    ) -> Result<T, MemoryError> {
        let _lock = StoreLock::exclusive(&self.location)?;
        self.attach()?;
        op(self)
    }

    /// Open the database on first use and confirm it still belongs to the
    /// config this engine was built from.
    fn attach(&mut self) -> Result<(), MemoryError> {
        if self.store.is_none() {
            let store = RecordStore::open(&self.config)?;
            store.claim(self.config.store_id)?;
            self.store = Some(store);
        }
        let owner = self.store()?.store_id()?;
        if owner != self.config.store_id {
            self.index = None;
            let current = StoreConfig::load(&self.location)?;
            if current.is_none_or(|config| config.store_id != owner) {
                self.store = None;
                return Err(MemoryError::corrupt(
                    self.config.db_path(),
                    format!(
                        "database belongs to store_id {owner} but {} names another store; \
                         the config was lost or replaced, run `recall init --force` to rebuild",
                        StoreConfig::path_in(&self.location).display()
                    ),
                ));
            }
            return Err(MemoryError::ConfigMismatch(format!(
                "store at {} was re-initialised (store_id {owner}, expected {}); reopen it",
                self.location.display(),
                self.config.store_id
            )));
        }
        Ok(())
    }

    pub(super) fn store(&mut self) -> Result<&mut RecordStore, MemoryError> {
        self.store.as_mut().ok_or_else(detached)
    }

    /// The graph as of the latest committed generation.
    pub(super) fn index(&mut self) -> Result<&HnswIndex, MemoryError> {
        self.refresh_index()?;
        match &self.index {
            Some(cached) => Ok(&cached.index),
            None => Err(detached()),
        }
    }

    fn refresh_index(&mut self) -> Result<(), MemoryError> {
        let store = self.store.as_ref().ok_or_else(detached)?;
        let generation = store.generation()?;
        let stale = self
            .index
            .as_ref()
            .is_none_or(|cached| cached.generation != generation);
        if stale {
            let (generation, index) = store.load_index(self.config.index, self.config.dimension)?;
            self.index = Some(CachedIndex { generation, index });
        }
        Ok(())
    }

    /// Apply `op` to the record table and the graph in one transaction and
    /// persist the graph nodes it touched. On failure the cached graph is
    /// discarded so the next call reloads the committed state.
    pub(super) fn mutate<T>(
        &mut self,
        op: impl FnOnce(&Transaction<'_>, &mut HnswIndex) -> Result<T, MemoryError>,
    ) -> Result<T, MemoryError> {
        self.refresh_index()?;
        let (Some(store), Some(cached)) = (self.store.as_mut(), self.index.as_mut()) else {
            return Err(detached());
        };
        let outcome = store.write(|tx| {
            let value = op(tx, &mut cached.index)?;
            let changes = cached.index.take_changes();
            if changes.is_empty() {
                return Ok((value, None));
            }
            let generation = persist_index(tx, &cached.index, changes)?;
            Ok((value, Some(generation)))
        });
        match outcome {
            Ok((value, generation)) => {
                if let Some(generation) = generation {
                    cached.generation = generation;
                }
                Ok(value)
            }
            Err(err) => {
                self.index = None;
                Err(err)
            }
        }
    }

    /// Approximate search followed by metadata filtering.
    ///
    /// Filtered queries fetch `topk * oversample` candidates; when too few
    /// survive and the graph holds more, one widened search with up to
    /// `candidate_cap` candidates follows.
    pub(super) fn search(
        &mut self,
        query: &[f32],
        plan: &SearchPlan,
    ) -> Result<Vec<QueryHit>, MemoryError> {
        self.refresh_index()?;
        let (Some(store), Some(cached)) = (self.store.as_ref(), self.index.as_ref()) else {
            return Err(detached());
        };
        let index = &cached.index;
        let ef = plan.ef.unwrap_or(index.params().ef_search);
        let first = if plan.filter.is_empty() {
            plan.topk
        } else {
            plan.topk.saturating_mul(plan.oversample.max(1))
        };
        let mut hits = collect_hits(store, index, query, first, ef, &plan.filter)?;
        if hits.len() < plan.topk
            && !plan.filter.is_empty()
            && first < index.len()
            && first < plan.candidate_cap
        {
            let widened = plan.candidate_cap.min(index.len());
            debug!(
                "widening filtered query (survivors={}, candidates={first}, widened={widened})",
                hits.len()
            );
            hits = collect_hits(store, index, query, widened, ef, &plan.filter)?;
        }
        hits.truncate(plan.topk);
        Ok(hits)
    }

    /// Compare the persisted records and graph without using the cache.
    pub(super) fn verify(&mut self) -> Result<IntegrityReport, MemoryError> {
        let dimension = self.config.dimension;
        let params = self.config.index;
        let store = self.store()?;
        let records = store.record_ids()?;
        let (_, index) = store.load_index(params, dimension)?;
        let mut report = IntegrityReport {
            records: records.len(),
            indexed: index.len(),
            problems: Vec::new(),
        };
        for id in &records {
            match index.vector(id) {
                None => report.problems.push(format!("record {id} has no index entry")),
                Some(vector) if vector.len() != dimension => report.problems.push(format!(
                    "record {id} has a {}-dimensional vector, expected {dimension}",
                    vector.len()
                )),
                Some(_) => {}
            }
        }
        let mut indexed: Vec<&str> = index.ids().collect();
        indexed.sort_unstable();
        for id in indexed {
            if records.binary_search_by(|record| record.as_str().cmp(id)).is_err() {
                report
                    .problems
                    .push(format!("index entry {id} has no record"));
            }
        }
        if let Err(err) = index.check_integrity() {
            report.problems.push(err.to_string());
        }
        Ok(report)
    }
}

fn detached() -> MemoryError {
    MemoryError::Storage("record store is not open".to_string())
}

fn collect_hits(
    store: &RecordStore,
    index: &HnswIndex,
    query: &[f32],
    candidates: usize,
    ef: usize,
    filter: &RecordFilter,
) -> Result<Vec<QueryHit>, MemoryError> {
    let found = index.search_with_ef(query, candidates, ef.max(candidates))?;
    let mut records = store.get_many(found.iter().map(|hit| hit.id.as_str()))?;
    Ok(found
        .into_iter()
        .filter_map(|hit| {
            let Some(record) = records.remove(&hit.id) else {
                warn!("index entry without record (id={})", hit.id);
                return None;
            };
            filter.matches(&record).then_some(QueryHit {
                record,
                score: hit.score,
            })
        })
        .collect())
}

/// Discard every record under the exclusive lock and publish a fresh config.
///
/// The database is emptied in place so handles held by other processes see
/// the new store id; only a database that cannot be opened is deleted.
pub(super) fn reinitialize(
    location: &Path,
    profile: &EmbeddingProfile,
    index: IndexParams,
) -> Result<StoreConfig, MemoryError> {
    let _lock = StoreLock::exclusive(location)?;
    let config = StoreConfig::new(location, profile, index);
    if let Some(message) = config.problems() {
        return Err(MemoryError::Validation(message));
    }
    let reset = RecordStore::open(&config).and_then(|mut store| store.reset(config.store_id));
    match reset {
        Ok(()) => {}
        Err(MemoryError::StoreCorrupt { path, message }) => {
            warn!(
                "discarding unreadable record store (path={}): {message}",
                path.display()
            );
            discard_database(&config.db_path())?;
            RecordStore::open(&config)?.claim(config.store_id)?;
        }
        Err(err) => return Err(err),
    }
    StoreConfig::replace(location, &config)?;
    info!(
        "re-initialised store (path={}, provider={}, model={}, dimension={})",
        location.display(),
        config.provider,
        config.model,
        config.dimension
    );
    Ok(config)
}

fn discard_database(db_path: &Path) -> Result<(), MemoryError> {
    let mut paths = vec![db_path.to_path_buf()];
    for suffix in ["-wal", "-shm"] {
        let mut name = db_path.as_os_str().to_owned();
        name.push(suffix);
        paths.push(PathBuf::from(name));
    }
    for path in paths {
        match fs::remove_file(&path) {
            Ok(()) => debug!("removed database file (path={})", path.display()),
            Err(err) if err.kind() == IoErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Total size of regular files under `path`.
pub(super) fn directory_size(path: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err),
    };
    for entry in entries {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            total += directory_size(&entry.path())?;
        } else if file_type.is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}
