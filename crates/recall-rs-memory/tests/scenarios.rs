//! End-to-end search behaviour: ranking, filtering and re-embedding.

use pretty_assertions::assert_eq;
use recall_rs_memory::{
    Category, EngineOptions, ErrorKind, MemoryEngine, NewMemory, QueryRequest, UpdateMemory,
};
use recall_rs_test_utils::{HashEmbedder, MismatchedEmbedder};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{TempDir, tempdir};

const DIMENSION: usize = 256;

fn engine(temp: &TempDir) -> MemoryEngine {
    MemoryEngine::open(
        temp.path().join("store"),
        Arc::new(HashEmbedder::new(DIMENSION)),
        EngineOptions {
            retry_backoff: Duration::from_millis(1),
            ..EngineOptions::default()
        },
    )
    .expect("open engine")
}

/// A stored preference is found by a related question.
#[tokio::test]
async fn preference_is_recalled_by_related_question() {
    let temp = tempdir().expect("tempdir");
    let engine = engine(&temp);
    let stored = engine
        .store(NewMemory::new("User prefers dark mode", Category::Preference).with_importance(0.8))
        .await
        .expect("store");

    let hits = engine
        .query(QueryRequest::new("what theme does the user like").with_topk(1))
        .await
        .expect("query");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.id, stored.id);
    assert_eq!(hits[0].record.importance, 0.8);
}

/// The closest record ranks first and scores never increase down the list.
#[tokio::test]
async fn results_are_ranked_by_similarity() {
    let temp = tempdir().expect("tempdir");
    let engine = engine(&temp);
    let mut target = None;
    for content in [
        "The API gateway runs on port 8080",
        "Lunch is usually at noon",
        "Deployments use blue green switching on the gateway",
        "The release train leaves every second Tuesday",
    ] {
        let record = engine
            .store(NewMemory::new(content, Category::Fact))
            .await
            .expect("store");
        if content.contains("8080") {
            target = Some(record.id);
        }
    }

    let hits = engine
        .query(QueryRequest::new("which port does the API gateway run on").with_topk(4))
        .await
        .expect("query");
    assert_eq!(hits.len(), 4);
    assert_eq!(Some(hits[0].record.id.clone()), target);
    assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));
}

/// Running the same query twice against an unchanged store gives the same
/// ids in the same order with the same scores.
#[tokio::test]
async fn queries_are_deterministic() {
    let temp = tempdir().expect("tempdir");
    let engine = engine(&temp);
    for n in 0..40 {
        engine
            .store(NewMemory::new(
                format!("note {n} about service {} and owner {}", n % 7, n % 3),
                Category::Context,
            ))
            .await
            .expect("store");
    }
    let request = QueryRequest::new("service 3 owner 1").with_topk(10);
    let first = engine.query(request.clone()).await.expect("first");
    let second = engine.query(request).await.expect("second");
    let summary = |hits: &[recall_rs_memory::QueryHit]| {
        hits.iter()
            .map(|hit| (hit.record.id.clone(), hit.score))
            .collect::<Vec<_>>()
    };
    assert_eq!(summary(&first), summary(&second));
}

/// Filtered queries never return records outside the filter and widen the
/// candidate pool when the first pass yields too few survivors.
#[tokio::test]
async fn filtered_queries_respect_every_constraint() {
    let temp = tempdir().expect("tempdir");
    let engine = engine(&temp);
    for n in 0..200 {
        let rare = n % 40 == 0;
        let memory = NewMemory::new(
            format!("observation {n} about the cache layer and request latency"),
            if rare { Category::Error } else { Category::Fact },
        )
        .with_tags(if rare { vec!["incident", "cache"] } else { vec!["cache"] })
        .with_importance(if rare { 0.9 } else { 0.3 });
        engine.store(memory).await.expect("store");
    }

    let by_tag = engine
        .query(
            QueryRequest::new("cache layer latency")
                .with_topk(5)
                .with_tags(["incident"]),
        )
        .await
        .expect("tag query");
    assert_eq!(by_tag.len(), 5);
    assert!(by_tag
        .iter()
        .all(|hit| hit.record.tags.contains(&"incident".to_string())));

    let by_category = engine
        .query(
            QueryRequest::new("cache layer latency")
                .with_topk(10)
                .with_category(Category::Error),
        )
        .await
        .expect("category query");
    assert_eq!(by_category.len(), 5, "only five records match");
    assert!(by_category
        .iter()
        .all(|hit| hit.record.category == Category::Error));

    let by_importance = engine
        .query(
            QueryRequest::new("request latency")
                .with_topk(3)
                .with_min_importance(0.5),
        )
        .await
        .expect("importance query");
    assert_eq!(by_importance.len(), 3);
    assert!(by_importance.iter().all(|hit| hit.record.importance >= 0.5));

    let impossible = engine
        .query(
            QueryRequest::new("cache")
                .with_category(Category::Instruction)
                .with_topk(5),
        )
        .await
        .expect("empty query");
    assert!(impossible.is_empty());
}

/// Tag filters require every listed tag.
#[tokio::test]
async fn tag_filters_use_all_semantics() {
    let temp = tempdir().expect("tempdir");
    let engine = engine(&temp);
    engine
        .store(NewMemory::new("Rust uses cargo", Category::Fact).with_tags(["rust"]))
        .await
        .expect("store");
    let both = engine
        .store(
            NewMemory::new("Rust builds with cargo in CI", Category::Fact)
                .with_tags(["rust", "ci"]),
        )
        .await
        .expect("store");

    let hits = engine
        .query(QueryRequest::new("cargo").with_tags(["ci", "rust"]))
        .await
        .expect("query");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.id, both.id);
}

/// Changing the content re-embeds the record so it is found by the new
/// wording rather than the old one.
#[tokio::test]
async fn updated_content_is_searchable() {
    let temp = tempdir().expect("tempdir");
    let engine = engine(&temp);
    let stored = engine
        .store(NewMemory::new("The build uses Make", Category::Fact))
        .await
        .expect("store");
    engine
        .update(
            &stored.id,
            UpdateMemory {
                content: Some("The build uses Bazel now".to_string()),
                ..UpdateMemory::default()
            },
        )
        .await
        .expect("update");

    let new_wording = engine
        .query(QueryRequest::new("bazel now").with_topk(1))
        .await
        .expect("query new");
    let old_wording = engine
        .query(QueryRequest::new("make").with_topk(1))
        .await
        .expect("query old");
    assert_eq!(new_wording[0].record.id, stored.id);
    assert!(new_wording[0].score > old_wording[0].score);
}

/// A provider that returns vectors of the wrong size cannot write.
#[tokio::test]
async fn wrong_sized_vectors_are_rejected() {
    let temp = tempdir().expect("tempdir");
    let healthy = engine(&temp);
    healthy
        .store(NewMemory::new("kept", Category::Fact))
        .await
        .expect("store");

    let broken = MemoryEngine::open(
        temp.path().join("store"),
        Arc::new(MismatchedEmbedder::new(DIMENSION, 8)),
        EngineOptions::default(),
    )
    .expect("profile matches the config");
    let err = broken
        .store(NewMemory::new("dropped", Category::Fact))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigMismatch);

    let report = healthy.verify().await.expect("verify");
    assert_eq!(report.records, 1);
    assert!(report.is_consistent(), "{:?}", report.problems);
}

/// Opening with a different profile than the store was created for fails.
#[tokio::test]
async fn mismatched_profile_cannot_open() {
    let temp = tempdir().expect("tempdir");
    engine(&temp);

    let smaller = MemoryEngine::open(
        temp.path().join("store"),
        Arc::new(HashEmbedder::new(64)),
        EngineOptions::default(),
    )
    .unwrap_err();
    assert_eq!(smaller.kind(), ErrorKind::ConfigMismatch);

    let other_model = MemoryEngine::open(
        temp.path().join("store"),
        Arc::new(HashEmbedder::new(DIMENSION).with_identity("test", "other")),
        EngineOptions::default(),
    )
    .unwrap_err();
    assert_eq!(other_model.kind(), ErrorKind::ConfigMismatch);
}
