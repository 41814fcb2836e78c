//! SQLite-backed record store.
//!
//! One database per store location holds three tables: `meta` (store
//! identity, index generation, next index sequence), `memories` (records)
//! and `index_nodes` (graph nodes with their vectors). Record rows and the
//! index nodes they touch are always written in the same transaction.

mod schema;


use crate::error::MemoryError;
use crate::model::{Category, ImportanceStats, ListOptions, MemoryRecord, RecordStats};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use recall_rs_config::StoreConfig;
use recall_rs_index::{HnswIndex, IndexChanges, IndexParams};
use rusqlite::{
    Connection, ErrorCode, OptionalExtension, Transaction, TransactionBehavior, params,
};
use schema::{
    META_GENERATION, META_NEXT_SEQ, META_STORE_ID, RECORD_COLUMNS, encode_vector, row_to_node,
    row_to_record,
};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// How long SQLite waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open connection to a store's record database.
#[derive(Debug)]
pub(crate) struct RecordStore {
    conn: Connection,
    path: PathBuf,
}

impl RecordStore {
    /// Open (creating if needed) the database named by `config`.
    pub(crate) fn open(config: &StoreConfig) -> Result<Self, MemoryError> {
        let path = config.db_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path).map_err(|err| classify(&path, err))?;
        let store = Self { conn, path };
        store.prepare().map_err(|err| store.fail(err))?;
        debug!("opened record store (path={})", store.path.display());
        Ok(store)
    }

    fn prepare(&self) -> rusqlite::Result<()> {
        self.conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            self.conn
                .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            warn!(
                "record store is not in WAL mode (path={}, mode={mode})",
                self.path.display()
            );
        }
        self.conn.pragma_update(None, "synchronous", "FULL")?;
        schema::apply(&self.conn)
    }

    fn fail(&self, err: rusqlite::Error) -> MemoryError {
        classify(&self.path, err)
    }

    /// Record `store_id` as this database's owner unless one is already
    /// recorded; returns the recorded owner.
    pub(crate) fn claim(&self, store_id: Uuid) -> Result<Uuid, MemoryError> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO meta (key, value) VALUES (?1, ?2)",
                params![META_STORE_ID, store_id.to_string()],
            )
            .map_err(|err| self.fail(err))?;
        self.store_id()
    }

    /// Owner recorded in the database.
    pub(crate) fn store_id(&self) -> Result<Uuid, MemoryError> {
        let value = meta_get(&self.conn, META_STORE_ID)
            .map_err(|err| self.fail(err))?
            .ok_or_else(|| MemoryError::corrupt(&self.path, "store id missing"))?;
        Uuid::parse_str(&value).map_err(|err| MemoryError::corrupt(&self.path, err))
    }

    /// Counter bumped by every committed index mutation.
    pub(crate) fn generation(&self) -> Result<u64, MemoryError> {
        meta_u64(&self.conn, META_GENERATION)
            .map(Option::unwrap_or_default)
            .map_err(|err| self.fail(err))
    }

    /// Rebuild the graph from its persisted nodes.
    pub(crate) fn load_index(
        &self,
        params: IndexParams,
        dimension: usize,
    ) -> Result<(u64, HnswIndex), MemoryError> {
        let generation = self.generation()?;
        let next_seq = meta_u64(&self.conn, META_NEXT_SEQ)
            .map_err(|err| self.fail(err))?
            .unwrap_or_default();
        let mut stmt = self
            .conn
            .prepare("SELECT seq, id, level, vector, links FROM index_nodes ORDER BY seq")
            .map_err(|err| self.fail(err))?;
        let nodes = stmt
            .query_map([], row_to_node)
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(|err| self.fail(err))?;
        let index = HnswIndex::restore(params, dimension, nodes, next_seq)
            .map_err(|err| MemoryError::corrupt(&self.path, err))?;
        debug!(
            "loaded index (path={}, generation={generation}, nodes={})",
            self.path.display(),
            index.len()
        );
        Ok((generation, index))
    }

    pub(crate) fn get(&self, id: &str) -> Result<Option<MemoryRecord>, MemoryError> {
        load_record(&self.conn, id).map_err(|err| self.fail(err))
    }

    /// Fetch several records at once; missing ids are absent from the map.
    pub(crate) fn get_many<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a str>,
    ) -> Result<HashMap<String, MemoryRecord>, MemoryError> {
        let mut records = HashMap::new();
        for id in ids {
            if let Some(record) = self.get(id)? {
                records.insert(record.id.clone(), record);
            }
        }
        Ok(records)
    }

    /// Filtered, sorted, paginated listing.
    pub(crate) fn list(&self, options: &ListOptions) -> Result<Vec<MemoryRecord>, MemoryError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM memories \
             WHERE (?1 IS NULL OR category = ?1) \
               AND (?2 IS NULL OR importance >= ?2) \
               AND NOT EXISTS ( \
                   SELECT 1 FROM json_each(?3) AS wanted \
                   WHERE wanted.value NOT IN (SELECT value FROM json_each(memories.tags))) \
             ORDER BY {} {}, id ASC \
             LIMIT ?4 OFFSET ?5",
            options.sort_by.column(),
            options.effective_order().keyword()
        );
        let tags = serde_json::to_string(&crate::model::normalize_tags(&options.filter.tags))
            .map_err(|err| MemoryError::Storage(err.to_string()))?;
        let limit = options
            .limit
            .map_or(-1, |limit| i64::try_from(limit).unwrap_or(i64::MAX));
        let offset = i64::try_from(options.offset).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(&sql).map_err(|err| self.fail(err))?;
        stmt.query_map(
            params![
                options.filter.category.map(|category| category.as_str()),
                options.filter.min_importance,
                tags,
                limit,
                offset
            ],
            row_to_record,
        )
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(|err| self.fail(err))
    }

    /// Every record id, ascending.
    pub(crate) fn record_ids(&self) -> Result<Vec<String>, MemoryError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM memories ORDER BY id")
            .map_err(|err| self.fail(err))?;
        stmt.query_map([], |row| row.get(0))
            .and_then(|rows| rows.collect::<Result<Vec<String>, _>>())
            .map_err(|err| self.fail(err))
    }

    /// Aggregates over the record table.
    pub(crate) fn stats(&self) -> Result<RecordStats, MemoryError> {
        self.compute_stats().map_err(|err| self.fail(err))
    }

    fn compute_stats(&self) -> rusqlite::Result<RecordStats> {
        let (count, min, max, mean, earliest, latest) = self.conn.query_row(
            "SELECT COUNT(*), MIN(importance), MAX(importance), AVG(importance), \
             MIN(created_at), MAX(updated_at) FROM memories",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<f64>>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                ))
            },
        )?;

        let mut categories: BTreeMap<Category, u64> = BTreeMap::new();
        let mut stmt = self
            .conn
            .prepare("SELECT category, COUNT(*) FROM memories GROUP BY category")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (category, total) = row?;
            let category = category.parse::<Category>().map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    err.to_string().into(),
                )
            })?;
            categories.insert(category, u64::try_from(total).unwrap_or_default());
        }

        let tags: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT tag.value) FROM memories, json_each(memories.tags) AS tag",
            [],
            |row| row.get(0),
        )?;

        let importance = match (min, max, mean) {
            (Some(min), Some(max), Some(mean)) => Some(ImportanceStats { min, max, mean }),
            _ => None,
        };
        Ok(RecordStats {
            count: u64::try_from(count).unwrap_or_default(),
            categories,
            tags: u64::try_from(tags).unwrap_or_default(),
            importance,
            earliest: earliest.and_then(|seconds| DateTime::from_timestamp(seconds, 0)),
            latest: latest.and_then(|seconds| DateTime::from_timestamp(seconds, 0)),
        })
    }

    /// Run `op` inside an immediate transaction; commits only if it succeeds.
    pub(crate) fn write<T>(
        &mut self,
        op: impl FnOnce(&Transaction<'_>) -> Result<T, MemoryError>,
    ) -> Result<T, MemoryError> {
        let path = self.path.clone();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| classify(&path, err))?;
        let value = op(&tx)?;
        tx.commit().map_err(|err| classify(&path, err))?;
        Ok(value)
    }

    /// Bump access counters for records returned by a query.
    pub(crate) fn record_access(
        &mut self,
        ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<usize, MemoryError> {
        self.write(|tx| {
            let mut stmt = tx.prepare_cached(
                "UPDATE memories SET access_count = access_count + 1, last_accessed_at = ?2 \
                 WHERE id = ?1",
            )?;
            let mut touched = 0;
            for id in ids {
                touched += stmt.execute(params![id, at.timestamp()])?;
            }
            Ok(touched)
        })
    }

    /// Drop every record and index node and hand the database to a new owner.
    pub(crate) fn reset(&mut self, store_id: Uuid) -> Result<(), MemoryError> {
        let path = self.path.clone();
        self.write(|tx| {
            let records = tx.execute("DELETE FROM memories", [])?;
            tx.execute("DELETE FROM index_nodes", [])?;
            let generation = meta_u64(tx, META_GENERATION)?.unwrap_or_default() + 1;
            meta_set(tx, META_GENERATION, &generation.to_string())?;
            meta_set(tx, META_NEXT_SEQ, "0")?;
            meta_set(tx, META_STORE_ID, &store_id.to_string())?;
            info!(
                "reset record store (path={}, discarded={records}, store_id={store_id})",
                path.display()
            );
            Ok(())
        })
    }
}

/// Map SQLite failures that indicate a damaged file to `StoreCorrupt`.
fn classify(path: &Path, err: rusqlite::Error) -> MemoryError {
    let corrupt = matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase)
    ) || matches!(err, rusqlite::Error::FromSqlConversionFailure(..));
    if corrupt {
        MemoryError::corrupt(path, err)
    } else {
        err.into()
    }
}

fn meta_get(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| {
        row.get(0)
    })
    .optional()
}

fn meta_u64(conn: &Connection, key: &str) -> rusqlite::Result<Option<u64>> {
    meta_get(conn, key)?
        .map(|value| {
            value.parse::<u64>().map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(err),
                )
            })
        })
        .transpose()
}

fn meta_set(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO meta (key, value) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

pub(crate) fn load_record(conn: &Connection, id: &str) -> rusqlite::Result<Option<MemoryRecord>> {
    conn.query_row(
        &format!("SELECT {RECORD_COLUMNS} FROM memories WHERE id = ?1"),
        [id],
        row_to_record,
    )
    .optional()
}

pub(crate) fn record_exists(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM memories WHERE id = ?1", [id], |_| Ok(()))
        .optional()
        .map(|found| found.is_some())
}

pub(crate) fn insert_record(conn: &Connection, record: &MemoryRecord) -> Result<(), MemoryError> {
    let tags =
        serde_json::to_string(&record.tags).map_err(|err| MemoryError::Storage(err.to_string()))?;
    conn.execute(
        &format!(
            "INSERT INTO memories ({RECORD_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ),
        params![
            record.id,
            record.content,
            record.category.as_str(),
            tags,
            record.importance,
            record.source,
            record.created_at.timestamp(),
            record.updated_at.timestamp(),
            i64::try_from(record.access_count).unwrap_or(i64::MAX),
            record.last_accessed_at.map(|at| at.timestamp()),
        ],
    )?;
    Ok(())
}

/// Rewrite the mutable columns of an existing record.
pub(crate) fn update_record(conn: &Connection, record: &MemoryRecord) -> Result<(), MemoryError> {
    let tags =
        serde_json::to_string(&record.tags).map_err(|err| MemoryError::Storage(err.to_string()))?;
    let changed = conn.execute(
        "UPDATE memories SET content = ?2, category = ?3, tags = ?4, importance = ?5, \
         source = ?6, updated_at = ?7 WHERE id = ?1",
        params![
            record.id,
            record.content,
            record.category.as_str(),
            tags,
            record.importance,
            record.source,
            record.updated_at.timestamp(),
        ],
    )?;
    if changed == 0 {
        return Err(MemoryError::NotFound(record.id.clone()));
    }
    Ok(())
}

pub(crate) fn delete_record(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    conn.execute("DELETE FROM memories WHERE id = ?1", [id])
        .map(|deleted| deleted > 0)
}

/// Write the nodes touched since the last drain and bump the generation.
pub(crate) fn persist_index(
    conn: &Connection,
    index: &HnswIndex,
    changes: IndexChanges,
) -> Result<u64, MemoryError> {
    let mut delete = conn.prepare_cached("DELETE FROM index_nodes WHERE seq = ?1")?;
    for seq in &changes.removed {
        delete.execute([i64::try_from(*seq).unwrap_or(i64::MAX)])?;
    }
    let mut upsert = conn.prepare_cached(
        "INSERT OR REPLACE INTO index_nodes (seq, id, level, vector, links) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for seq in &changes.upserted {
        let Some(node) = index.node(*seq) else {
            continue;
        };
        let links = serde_json::to_string(&node.links)
            .map_err(|err| MemoryError::Storage(err.to_string()))?;
        upsert.execute(params![
            i64::try_from(node.seq).unwrap_or(i64::MAX),
            node.id,
            i64::try_from(node.level).unwrap_or(i64::MAX),
            encode_vector(&node.vector),
            links,
        ])?;
    }
    let generation = meta_u64(conn, META_GENERATION)?.unwrap_or_default() + 1;
    meta_set(conn, META_GENERATION, &generation.to_string())?;
    meta_set(conn, META_NEXT_SEQ, &index.next_seq().to_string())?;
    debug!(
        "persisted index changes (upserted={}, removed={}, generation={generation})",
        changes.upserted.len(),
        changes.removed.len()
    );
    Ok(generation)
}
