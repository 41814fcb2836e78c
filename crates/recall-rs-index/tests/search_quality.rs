//! Approximate search quality checked against exhaustive search.

use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use recall_rs_index::{HnswIndex, IndexParams, SearchHit};
use std::collections::HashSet;

const DIMENSION: usize = 16;

fn random_vectors(count: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            (0..DIMENSION)
                .map(|_| rng.random_range(-1.0f32..1.0))
                .collect()
        })
        .collect()
}

fn build(count: usize, params: IndexParams) -> HnswIndex {
    let mut index = HnswIndex::new(params, DIMENSION).expect("index");
    for (position, vector) in random_vectors(count, 7).into_iter().enumerate() {
        index
            .insert(format!("node-{position}"), vector)
            .expect("insert");
    }
    index
}

fn ids(hits: &[SearchHit]) -> Vec<String> {
    hits.iter().map(|hit| hit.id.clone()).collect()
}

fn recall_at(index: &HnswIndex, queries: &[Vec<f32>], k: usize, ef: usize) -> f32 {
    let mut found = 0usize;
    for query in queries {
        let exact: HashSet<String> = ids(&index.search_exact(query, k).expect("exact"))
            .into_iter()
            .collect();
        let approx = index.search_with_ef(query, k, ef).expect("approx");
        found += approx.iter().filter(|hit| exact.contains(&hit.id)).count();
    }
    found as f32 / (queries.len() * k) as f32
}

/// A search width covering the whole graph reproduces the exhaustive result.
#[test]
fn full_width_search_matches_brute_force() {
    let params = IndexParams {
        m: 8,
        ef_construction: 64,
        ..IndexParams::default()
    };
    let index = build(200, params);
    index.check_integrity().expect("integrity");
    for query in random_vectors(20, 99) {
        let exact = index.search_exact(&query, 10).expect("exact");
        let approx = index.search_with_ef(&query, 10, index.len()).expect("approx");
        assert_eq!(ids(&approx), ids(&exact));
    }
}

/// Default parameters give high recall and wider searches never do worse
/// on this fixture.
#[test]
fn recall_is_high_and_grows_with_search_width() {
    let index = build(300, IndexParams::default());
    let queries = random_vectors(30, 1234);
    let narrow = recall_at(&index, &queries, 10, 10);
    let wide = recall_at(&index, &queries, 10, 128);
    assert!(wide >= narrow, "narrow={narrow} wide={wide}");
    assert!(wide >= 0.9, "wide recall too low: {wide}");
}

/// Results never exceed k and shrink to the index size.
#[test]
fn result_length_is_bounded() {
    let index = build(5, IndexParams::default());
    let query = random_vectors(1, 3).remove(0);
    assert_eq!(index.search(&query, 3).expect("search").len(), 3);
    assert_eq!(index.search(&query, 50).expect("search").len(), 5);
}

/// Scores come back in descending order.
#[test]
fn hits_are_sorted_by_score() {
    let index = build(100, IndexParams::default());
    for query in random_vectors(5, 55) {
        let hits = index.search(&query, 20).expect("search");
        assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));
    }
}

/// Removing half the nodes leaves a consistent, fully searchable graph.
#[test]
fn removals_keep_graph_consistent() {
    let params = IndexParams {
        m: 8,
        ef_construction: 64,
        ..IndexParams::default()
    };
    let mut index = build(160, params);
    for position in (0..160).step_by(2) {
        assert!(index.remove(&format!("node-{position}")));
    }
    index.check_integrity().expect("integrity");
    assert_eq!(index.len(), 80);
    assert!(index.ids().all(|id| {
        let position: usize = id.trim_start_matches("node-").parse().expect("position");
        position % 2 == 1
    }));

    let queries = random_vectors(20, 4321);
    let full = recall_at(&index, &queries, 5, index.len());
    assert!(full >= 0.95, "recall after removals too low: {full}");
}

/// Exported nodes restore into an index with identical answers.
#[test]
fn restore_round_trips_search_results() {
    let mut index = build(120, IndexParams::default());
    index.remove("node-3");
    index.remove("node-40");
    let nodes: Vec<_> = index.nodes().cloned().collect();
    let restored =
        HnswIndex::restore(index.params(), DIMENSION, nodes, index.next_seq()).expect("restore");
    assert_eq!(restored.len(), index.len());
    assert_eq!(restored.next_seq(), index.next_seq());
    for query in random_vectors(10, 77) {
        let before = index.search(&query, 10).expect("before");
        let after = restored.search(&query, 10).expect("after");
        assert_eq!(before, after);
    }
}

/// Identical inputs build identical graphs.
#[test]
fn construction_is_deterministic() {
    let first = build(80, IndexParams::default());
    let second = build(80, IndexParams::default());
    let first_nodes: Vec<_> = first.nodes().cloned().collect();
    let second_nodes: Vec<_> = second.nodes().cloned().collect();
    assert_eq!(first_nodes, second_nodes);
}
