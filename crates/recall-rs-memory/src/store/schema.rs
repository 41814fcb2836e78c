//! Table layout and row codecs for the record database.

use crate::model::{Category, MemoryRecord};
use chrono::{DateTime, Utc};
use recall_rs_index::IndexNode;
use rusqlite::types::Type;
use rusqlite::{Connection, Row};

pub(super) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS memories (
    id               TEXT PRIMARY KEY,
    content          TEXT NOT NULL,
    category         TEXT NOT NULL,
    tags             TEXT NOT NULL DEFAULT '[]',
    importance       REAL NOT NULL,
    source           TEXT,
    created_at       INTEGER NOT NULL,
    updated_at       INTEGER NOT NULL,
    access_count     INTEGER NOT NULL DEFAULT 0,
    last_accessed_at INTEGER
);
CREATE INDEX IF NOT EXISTS memories_category ON memories(category);
CREATE TABLE IF NOT EXISTS index_nodes (
    seq    INTEGER PRIMARY KEY,
    id     TEXT NOT NULL UNIQUE,
    level  INTEGER NOT NULL,
    vector BLOB NOT NULL,
    links  TEXT NOT NULL
);
";

pub(super) const META_STORE_ID: &str = "store_id";
pub(super) const META_GENERATION: &str = "generation";
pub(super) const META_NEXT_SEQ: &str = "next_seq";

pub(super) const RECORD_COLUMNS: &str = "id, content, category, tags, importance, source, \
     created_at, updated_at, access_count, last_accessed_at";

pub(super) fn apply(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, message.into())
}

fn timestamp(column: usize, seconds: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| conversion_error(column, format!("timestamp out of range: {seconds}")))
}

/// Decode a row selected with [`RECORD_COLUMNS`].
pub(super) fn row_to_record(row: &Row<'_>) -> rusqlite::Result<MemoryRecord> {
    let category: String = row.get(2)?;
    let category = category
        .parse::<Category>()
        .map_err(|err| conversion_error(2, err.to_string()))?;
    let tags: String = row.get(3)?;
    let tags: Vec<String> =
        serde_json::from_str(&tags).map_err(|err| conversion_error(3, err.to_string()))?;
    let access_count: i64 = row.get(8)?;
    let last_accessed_at: Option<i64> = row.get(9)?;
    Ok(MemoryRecord {
        id: row.get(0)?,
        content: row.get(1)?,
        category,
        tags,
        importance: row.get(4)?,
        source: row.get(5)?,
        created_at: timestamp(6, row.get(6)?)?,
        updated_at: timestamp(7, row.get(7)?)?,
        access_count: u64::try_from(access_count).unwrap_or_default(),
        last_accessed_at: last_accessed_at
            .map(|seconds| timestamp(9, seconds))
            .transpose()?,
    })
}

/// Decode a row of `SELECT seq, id, level, vector, links FROM index_nodes`.
pub(super) fn row_to_node(row: &Row<'_>) -> rusqlite::Result<IndexNode> {
    let seq: i64 = row.get(0)?;
    let level: i64 = row.get(2)?;
    let vector: Vec<u8> = row.get(3)?;
    let links: String = row.get(4)?;
    Ok(IndexNode {
        seq: u64::try_from(seq).map_err(|err| conversion_error(0, err.to_string()))?,
        id: row.get(1)?,
        level: usize::try_from(level).map_err(|err| conversion_error(2, err.to_string()))?,
        vector: decode_vector(&vector).ok_or_else(|| {
            conversion_error(3, format!("vector blob has {} bytes", vector.len()))
        })?,
        links: serde_json::from_str(&links).map_err(|err| conversion_error(4, err.to_string()))?,
    })
}

/// Little-endian f32 encoding.
pub(super) fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|value| value.to_le_bytes()).collect()
}

pub(super) fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}
