//! Memory record model and request types.

use crate::error::MemoryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Importance assigned when the caller gives none.
pub const DEFAULT_IMPORTANCE: f64 = 0.5;
/// Result count for queries that do not specify one.
pub const DEFAULT_TOPK: usize = 5;
/// Page size for listings that do not specify one.
pub const DEFAULT_LIST_LIMIT: usize = 20;
/// Prefix of generated record ids.
pub const ID_PREFIX: &str = "mem_";

/// Kind of knowledge a record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Fact,
    Preference,
    Decision,
    Error,
    Pattern,
    Instruction,
    Context,
    Conversation,
}

impl Category {
    /// Every category, in declaration order.
    pub const ALL: [Category; 8] = [
        Category::Fact,
        Category::Preference,
        Category::Decision,
        Category::Error,
        Category::Pattern,
        Category::Instruction,
        Category::Context,
        Category::Conversation,
    ];

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Fact => "fact",
            Category::Preference => "preference",
            Category::Decision => "decision",
            Category::Error => "error",
            Category::Pattern => "pattern",
            Category::Instruction => "instruction",
            Category::Context => "context",
            Category::Conversation => "conversation",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = MemoryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        Category::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| {
                let allowed: Vec<&str> = Category::ALL.iter().map(|c| c.as_str()).collect();
                MemoryError::Validation(format!(
                    "unknown category '{value}' (expected one of: {})",
                    allowed.join(", ")
                ))
            })
    }
}

/// A persisted memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Immutable identifier.
    pub id: String,
    /// Text body.
    pub content: String,
    /// Category.
    pub category: Category,
    /// Tags, sorted and unique.
    pub tags: Vec<String>,
    /// Caller-assigned relevance in `[0, 1]`.
    pub importance: f64,
    /// Free-form provenance.
    #[serde(default)]
    pub source: Option<String>,
    /// Creation time.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub updated_at: DateTime<Utc>,
    /// Number of query results this record appeared in.
    #[serde(default)]
    pub access_count: u64,
    /// Time of the last query that returned this record.
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub last_accessed_at: Option<DateTime<Utc>>,
}

/// Input for creating a record.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMemory {
    pub content: String,
    pub category: Category,
    pub tags: Vec<String>,
    /// Defaults to [`DEFAULT_IMPORTANCE`].
    pub importance: Option<f64>,
    pub source: Option<String>,
    /// Caller-chosen id; generated when absent.
    pub id: Option<String>,
}

impl NewMemory {
    pub fn new(content: impl Into<String>, category: Category) -> Self {
        Self {
            content: content.into(),
            category,
            tags: Vec::new(),
            importance: None,
            source: None,
            id: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Partial update of a record. `None` leaves a field unchanged; an empty
/// `source` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateMemory {
    pub content: Option<String>,
    pub category: Option<Category>,
    pub tags: Option<Vec<String>>,
    pub importance: Option<f64>,
    pub source: Option<String>,
}

impl UpdateMemory {
    /// True when no field would change.
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.category.is_none()
            && self.tags.is_none()
            && self.importance.is_none()
            && self.source.is_none()
    }
}

/// Metadata constraints shared by queries and listings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    /// Only this category.
    pub category: Option<Category>,
    /// Only records at or above this importance.
    pub min_importance: Option<f64>,
    /// Only records carrying every one of these tags.
    pub tags: Vec<String>,
}

impl RecordFilter {
    /// True when the filter accepts every record.
    pub fn is_empty(&self) -> bool {
        self.category.is_none() && self.min_importance.is_none() && self.tags.is_empty()
    }

    /// Whether `record` passes every constraint.
    pub fn matches(&self, record: &MemoryRecord) -> bool {
        if self.category.is_some_and(|category| category != record.category) {
            return false;
        }
        if self
            .min_importance
            .is_some_and(|threshold| record.importance < threshold)
        {
            return false;
        }
        self.tags
            .iter()
            .all(|tag| record.tags.binary_search(tag).is_ok())
    }
}

/// Semantic search request.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub text: String,
    /// Maximum number of results.
    pub topk: usize,
    pub filter: RecordFilter,
    /// Query-time search width override.
    pub ef: Option<usize>,
}

impl QueryRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            topk: DEFAULT_TOPK,
            filter: RecordFilter::default(),
            ef: None,
        }
    }

    pub fn with_topk(mut self, topk: usize) -> Self {
        self.topk = topk;
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.filter.category = Some(category);
        self
    }

    pub fn with_min_importance(mut self, min_importance: f64) -> Self {
        self.filter.min_importance = Some(min_importance);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_ef(mut self, ef: usize) -> Self {
        self.ef = Some(ef);
        self
    }
}

/// A query result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryHit {
    #[serde(flatten)]
    pub record: MemoryRecord,
    /// Cosine similarity to the query text.
    pub score: f32,
}

/// Listing sort key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    CreatedAt,
    UpdatedAt,
    Importance,
    AccessCount,
    Category,
}

impl SortBy {
    /// Direction used when the caller does not pick one.
    pub fn default_order(self) -> SortOrder {
        match self {
            SortBy::Category => SortOrder::Asc,
            _ => SortOrder::Desc,
        }
    }

    pub(crate) fn column(self) -> &'static str {
        match self {
            SortBy::CreatedAt => "created_at",
            SortBy::UpdatedAt => "updated_at",
            SortBy::Importance => "importance",
            SortBy::AccessCount => "access_count",
            SortBy::Category => "category",
        }
    }
}

impl FromStr for SortBy {
    type Err = MemoryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "created_at" => Ok(SortBy::CreatedAt),
            "updated_at" => Ok(SortBy::UpdatedAt),
            "importance" => Ok(SortBy::Importance),
            "access_count" => Ok(SortBy::AccessCount),
            "category" => Ok(SortBy::Category),
            other => Err(MemoryError::Validation(format!(
                "unknown sort field '{other}' (expected created_at, updated_at, importance, access_count or category)"
            ))),
        }
    }
}

/// Listing sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub(crate) fn keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl FromStr for SortOrder {
    type Err = MemoryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(MemoryError::Validation(format!(
                "unknown sort order '{other}' (expected asc or desc)"
            ))),
        }
    }
}

/// Listing request. Ties always break by id ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct ListOptions {
    pub filter: RecordFilter,
    pub sort_by: SortBy,
    /// Overrides [`SortBy::default_order`].
    pub order: Option<SortOrder>,
    /// `None` lists everything.
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            filter: RecordFilter::default(),
            sort_by: SortBy::default(),
            order: None,
            limit: Some(DEFAULT_LIST_LIMIT),
            offset: 0,
        }
    }
}

impl ListOptions {
    /// Every record, default order.
    pub fn all() -> Self {
        Self {
            limit: None,
            ..Self::default()
        }
    }

    pub fn effective_order(&self) -> SortOrder {
        self.order.unwrap_or(self.sort_by.default_order())
    }
}

/// Importance distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImportanceStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// Aggregates computed from the record table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordStats {
    /// Number of records.
    pub count: u64,
    /// Records per category; categories without records are omitted.
    pub categories: BTreeMap<Category, u64>,
    /// Distinct tags in use.
    pub tags: u64,
    /// `None` for an empty store.
    pub importance: Option<ImportanceStats>,
    /// Oldest `created_at`.
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub earliest: Option<DateTime<Utc>>,
    /// Newest `updated_at`.
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub latest: Option<DateTime<Utc>>,
}

/// Store statistics reported by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStats {
    #[serde(flatten)]
    pub records: RecordStats,
    /// Bytes used by the store directory.
    pub size_bytes: u64,
    pub size_human: String,
    pub provider: String,
    pub model: String,
    pub dimension: usize,
    pub path: String,
}

/// Trim tags, drop empty ones, and return them sorted and unique.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|tag| tag.as_ref().trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Format a byte count with binary units.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
