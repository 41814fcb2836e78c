//! Memory engine CRUD, validation and provider failure tests.

use pretty_assertions::assert_eq;
use recall_rs_memory::{
    Category, EmbeddingGateway, EngineOptions, ErrorKind, ListOptions, MemoryEngine, NewMemory,
    QueryRequest, RecordFilter, UpdateMemory,
};
use recall_rs_test_utils::{CountingEmbedder, FailingEmbedder, HashEmbedder, SlowEmbedder};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{TempDir, tempdir};

const DIMENSION: usize = 32;

fn fast_options() -> EngineOptions {
    EngineOptions {
        retry_backoff: Duration::from_millis(1),
        ..EngineOptions::default()
    }
}

fn store_path(temp: &TempDir) -> PathBuf {
    temp.path().join("store")
}

fn open(temp: &TempDir, gateway: Arc<dyn EmbeddingGateway>) -> MemoryEngine {
    MemoryEngine::open(store_path(temp), gateway, fast_options()).expect("open engine")
}

fn hash_engine(temp: &TempDir) -> MemoryEngine {
    open(temp, Arc::new(HashEmbedder::new(DIMENSION)))
}

/// A stored record reads back exactly as returned by `store`.
#[tokio::test]
async fn store_then_get_round_trips() {
    let temp = tempdir().expect("tempdir");
    let engine = hash_engine(&temp);
    let stored = engine
        .store(
            NewMemory::new("  Deploys run through GitHub Actions  ", Category::Fact)
                .with_tags([" ci ", "deploy", "ci"])
                .with_importance(0.7)
                .with_source("onboarding"),
        )
        .await
        .expect("store");

    assert!(stored.id.starts_with("mem_"));
    assert_eq!(stored.content, "Deploys run through GitHub Actions");
    assert_eq!(stored.tags, vec!["ci".to_string(), "deploy".to_string()]);
    assert_eq!(stored.source.as_deref(), Some("onboarding"));
    assert!(stored.updated_at >= stored.created_at);

    let fetched = engine.get(&stored.id).await.expect("get");
    assert_eq!(fetched, stored);
    assert_eq!(
        engine.embedding(&stored.id).await.expect("embedding").len(),
        DIMENSION
    );
}

/// Importance defaults to 0.5 and custom ids are honoured.
#[tokio::test]
async fn defaults_and_custom_ids() {
    let temp = tempdir().expect("tempdir");
    let engine = hash_engine(&temp);
    let stored = engine
        .store(NewMemory::new("Prefers tabs", Category::Preference).with_id("pref-tabs"))
        .await
        .expect("store");
    assert_eq!(stored.id, "pref-tabs");
    assert_eq!(stored.importance, 0.5);
    assert_eq!(stored.source, None);

    let duplicate = engine
        .store(NewMemory::new("Prefers spaces", Category::Preference).with_id("pref-tabs"))
        .await
        .unwrap_err();
    assert_eq!(duplicate.kind(), ErrorKind::Validation);
    assert_eq!(
        engine.get("pref-tabs").await.expect("get").content,
        "Prefers tabs"
    );
}

/// Invalid input is rejected before any embedding or write.
#[tokio::test]
async fn invalid_input_is_rejected_without_writes() {
    let temp = tempdir().expect("tempdir");
    let embedder = CountingEmbedder::new(DIMENSION);
    let engine = open(&temp, Arc::new(embedder.clone()));

    let empty = engine
        .store(NewMemory::new("   ", Category::Fact))
        .await
        .unwrap_err();
    assert_eq!(empty.kind(), ErrorKind::Validation);

    let too_important = engine
        .store(NewMemory::new("x", Category::Fact).with_importance(1.5))
        .await
        .unwrap_err();
    assert_eq!(too_important.kind(), ErrorKind::Validation);

    let bad_id = engine
        .store(NewMemory::new("x", Category::Fact).with_id("no spaces allowed"))
        .await
        .unwrap_err();
    assert_eq!(bad_id.kind(), ErrorKind::Validation);

    assert_eq!(embedder.calls(), 0);
    assert_eq!(engine.stats().await.expect("stats").records.count, 0);
}

/// Text is normalized before embedding; stored content keeps its shape.
#[tokio::test]
async fn embedding_input_is_preprocessed() {
    let temp = tempdir().expect("tempdir");
    let embedder = CountingEmbedder::new(DIMENSION);
    let engine = open(&temp, Arc::new(embedder.clone()));
    let stored = engine
        .store(NewMemory::new("  line one\n\n  line   two ", Category::Context))
        .await
        .expect("store");
    assert_eq!(stored.content, "line one\n\n  line   two");
    assert_eq!(embedder.inputs(), vec!["line one line two".to_string()]);
}

/// Partial updates change only the named fields.
#[tokio::test]
async fn update_changes_only_named_fields() {
    let temp = tempdir().expect("tempdir");
    let embedder = CountingEmbedder::new(DIMENSION);
    let engine = open(&temp, Arc::new(embedder.clone()));
    let stored = engine
        .store(
            NewMemory::new("Uses PostgreSQL 15", Category::Fact)
                .with_tags(["db"])
                .with_source("chat"),
        )
        .await
        .expect("store");

    let updated = engine
        .update(
            &stored.id,
            UpdateMemory {
                importance: Some(0.9),
                tags: Some(vec!["db".to_string(), "infra".to_string()]),
                source: Some(String::new()),
                ..UpdateMemory::default()
            },
        )
        .await
        .expect("update");
    assert_eq!(updated.content, stored.content);
    assert_eq!(updated.importance, 0.9);
    assert_eq!(updated.tags, vec!["db".to_string(), "infra".to_string()]);
    assert_eq!(updated.source, None);
    assert_eq!(updated.created_at, stored.created_at);
    assert!(updated.updated_at >= stored.updated_at);
    assert_eq!(embedder.calls(), 1, "metadata-only update must not re-embed");

    let before = engine.embedding(&stored.id).await.expect("embedding");
    let recategorized = engine
        .update(
            &stored.id,
            UpdateMemory {
                content: Some("Uses PostgreSQL 16".to_string()),
                category: Some(Category::Decision),
                ..UpdateMemory::default()
            },
        )
        .await
        .expect("update content");
    assert_eq!(embedder.calls(), 2);
    assert_eq!(recategorized.category, Category::Decision);
    assert_eq!(recategorized.content, "Uses PostgreSQL 16");
    assert_ne!(engine.embedding(&stored.id).await.expect("embedding"), before);
    assert!(engine.verify().await.expect("verify").is_consistent());
}

/// Updating a missing id or with no fields fails cleanly.
#[tokio::test]
async fn update_errors() {
    let temp = tempdir().expect("tempdir");
    let engine = hash_engine(&temp);
    let missing = engine
        .update(
            "mem_doesnotexist",
            UpdateMemory {
                importance: Some(0.1),
                ..UpdateMemory::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);

    let stored = engine
        .store(NewMemory::new("something", Category::Fact))
        .await
        .expect("store");
    let empty = engine
        .update(&stored.id, UpdateMemory::default())
        .await
        .unwrap_err();
    assert_eq!(empty.kind(), ErrorKind::Validation);
}

/// Deleting is idempotent and removes the record from queries.
#[tokio::test]
async fn delete_is_idempotent() {
    let temp = tempdir().expect("tempdir");
    let engine = hash_engine(&temp);
    let stored = engine
        .store(NewMemory::new("Temporary note", Category::Context))
        .await
        .expect("store");

    assert!(engine.delete(&stored.id).await.expect("delete"));
    assert!(!engine.delete(&stored.id).await.expect("delete again"));
    assert!(!engine.delete("mem_neverexisted").await.expect("delete missing"));

    assert_eq!(
        engine.get(&stored.id).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    let hits = engine
        .query(QueryRequest::new("Temporary note"))
        .await
        .expect("query");
    assert!(hits.is_empty());
    let report = engine.verify().await.expect("verify");
    assert_eq!((report.records, report.indexed), (0, 0));
}

/// Listing goes through the record table with filters applied.
#[tokio::test]
async fn list_filters_by_tags_and_category() {
    let temp = tempdir().expect("tempdir");
    let engine = hash_engine(&temp);
    for (content, category, tags) in [
        ("Rust 2024 edition", Category::Fact, vec!["rust"]),
        ("Prefer anyhow in binaries", Category::Preference, vec!["rust", "errors"]),
        ("Use thiserror in libraries", Category::Decision, vec!["rust", "errors"]),
        ("Standup at 10", Category::Fact, vec!["team"]),
    ] {
        engine
            .store(NewMemory::new(content, category).with_tags(tags))
            .await
            .expect("store");
    }

    let tagged = engine
        .list(ListOptions {
            filter: RecordFilter {
                tags: vec!["errors".to_string(), "rust".to_string()],
                ..RecordFilter::default()
            },
            ..ListOptions::all()
        })
        .await
        .expect("list");
    assert_eq!(tagged.len(), 2);
    assert!(tagged.iter().all(|record| record.tags.contains(&"errors".to_string())));

    let facts = engine
        .list(ListOptions {
            filter: RecordFilter {
                category: Some(Category::Fact),
                ..RecordFilter::default()
            },
            ..ListOptions::default()
        })
        .await
        .expect("list");
    assert_eq!(facts.len(), 2);
    assert!(facts.iter().all(|record| record.category == Category::Fact));
}

/// Stats combine record aggregates with store details.
#[tokio::test]
async fn stats_report_store_details() {
    let temp = tempdir().expect("tempdir");
    let engine = hash_engine(&temp);
    engine
        .store(NewMemory::new("one", Category::Fact).with_tags(["a"]))
        .await
        .expect("store");
    engine
        .store(
            NewMemory::new("two", Category::Error)
                .with_tags(["a", "b"])
                .with_importance(0.9),
        )
        .await
        .expect("store");

    let stats = engine.stats().await.expect("stats");
    assert_eq!(stats.records.count, 2);
    assert_eq!(stats.records.categories.get(&Category::Error), Some(&1));
    assert_eq!(stats.records.tags, 2);
    assert_eq!(stats.provider, "test");
    assert_eq!(stats.model, "hash");
    assert_eq!(stats.dimension, DIMENSION);
    assert!(stats.size_bytes > 0);
    assert!(!stats.size_human.is_empty());
    let importance = stats.records.importance.expect("importance");
    assert_eq!(importance.max, 0.9);
}

/// Transient provider failures are retried a bounded number of times.
#[tokio::test]
async fn transient_provider_failures_are_retried() {
    let temp = tempdir().expect("tempdir");
    let flaky = CountingEmbedder::new(DIMENSION).failing_first(2);
    let engine = open(&temp, Arc::new(flaky.clone()));
    engine
        .store(NewMemory::new("eventually stored", Category::Fact))
        .await
        .expect("store after retries");
    assert_eq!(flaky.calls(), 3);

    let down = CountingEmbedder::new(DIMENSION).failing_first(10);
    let engine = open(&temp, Arc::new(down.clone()));
    let err = engine
        .store(NewMemory::new("never stored", Category::Fact))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
    assert_eq!(down.calls(), 3);
    assert_eq!(engine.stats().await.expect("stats").records.count, 1);
}

/// A missing model is reported distinctly and never retried.
#[tokio::test]
async fn missing_model_is_not_retried() {
    let temp = tempdir().expect("tempdir");
    let failing = FailingEmbedder::model_missing(DIMENSION);
    let engine = open(&temp, Arc::new(failing.clone()));
    let err = engine
        .query(QueryRequest::new("anything"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModelNotFound);
    assert_eq!(failing.calls(), 1);
}

/// A hung provider surfaces as unavailable instead of blocking forever.
#[tokio::test]
async fn slow_provider_times_out() {
    let temp = tempdir().expect("tempdir");
    let options = EngineOptions {
        embed_timeout: Duration::from_millis(20),
        embed_attempts: 1,
        ..fast_options()
    };
    let engine = MemoryEngine::open(
        store_path(&temp),
        Arc::new(SlowEmbedder::new(DIMENSION, Duration::from_secs(5))),
        options,
    )
    .expect("open");
    let err = engine
        .store(NewMemory::new("too slow", Category::Fact))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
    assert_eq!(engine.stats().await.expect("stats").records.count, 0);
}

/// Unavailable providers leave the store untouched.
#[tokio::test]
async fn failed_embedding_stores_nothing() {
    let temp = tempdir().expect("tempdir");
    let engine = open(&temp, Arc::new(FailingEmbedder::unavailable(DIMENSION)));
    let err = engine
        .store(NewMemory::new("lost", Category::Fact))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
    let report = engine.verify().await.expect("verify");
    assert_eq!(report.records, 0);
    assert!(report.is_consistent());
}

/// Records and the graph survive reopening the store.
#[tokio::test]
async fn records_persist_across_engines() {
    let temp = tempdir().expect("tempdir");
    let stored = {
        let engine = hash_engine(&temp);
        engine
            .store(NewMemory::new("The staging database is read only", Category::Fact))
            .await
            .expect("store")
    };

    let reopened = hash_engine(&temp);
    assert!(!reopened.created());
    let hits = reopened
        .query(QueryRequest::new("staging database").with_topk(1))
        .await
        .expect("query");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.id, stored.id);
}

/// Queries bump access counters without touching `updated_at`.
#[tokio::test]
async fn queries_track_access() {
    let temp = tempdir().expect("tempdir");
    let engine = hash_engine(&temp);
    let stored = engine
        .store(NewMemory::new("Coffee order is a flat white", Category::Preference))
        .await
        .expect("store");
    for _ in 0..2 {
        engine
            .query(QueryRequest::new("coffee order"))
            .await
            .expect("query");
    }
    let fetched = engine.get(&stored.id).await.expect("get");
    assert_eq!(fetched.access_count, 2);
    assert!(fetched.last_accessed_at.is_some());
    assert_eq!(fetched.updated_at, stored.updated_at);

    let quiet = MemoryEngine::open(
        store_path(&temp),
        Arc::new(HashEmbedder::new(DIMENSION)),
        EngineOptions {
            track_access: false,
            ..fast_options()
        },
    )
    .expect("open");
    quiet
        .query(QueryRequest::new("coffee order"))
        .await
        .expect("query");
    assert_eq!(quiet.get(&stored.id).await.expect("get").access_count, 2);
}

/// Query validation happens before the provider is called.
#[tokio::test]
async fn query_validation() {
    let temp = tempdir().expect("tempdir");
    let embedder = CountingEmbedder::new(DIMENSION);
    let engine = open(&temp, Arc::new(embedder.clone()));
    for request in [
        QueryRequest::new("  "),
        QueryRequest::new("text").with_topk(0),
        QueryRequest::new("text").with_min_importance(2.0),
        QueryRequest::new("text").with_ef(0),
    ] {
        let err = engine.query(request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
    assert_eq!(embedder.calls(), 0);
}

/// `init` probes the provider and creates the database.
#[tokio::test]
async fn init_probes_provider() {
    let temp = tempdir().expect("tempdir");
    let embedder = CountingEmbedder::new(DIMENSION);
    let engine = open(&temp, Arc::new(embedder.clone()));
    assert!(engine.created());
    let config = engine.init().await.expect("init");
    assert_eq!(config.dimension, DIMENSION);
    assert_eq!(embedder.calls(), 1);
    assert!(store_path(&temp).join("memory.db").exists());
    assert!(store_path(&temp).join("memory_config.json").exists());
}
