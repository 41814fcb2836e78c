//! Hierarchical navigable small-world graph.

use crate::IndexError;
use crate::node::IndexNode;
use crate::params::IndexParams;
use crate::similarity::{cosine_with_norms, norm};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet};

/// Upper bound on node levels.
const MAX_LEVEL: usize = 16;

/// A search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// External record identifier.
    pub id: String,
    /// Cosine similarity to the query.
    pub score: f32,
}

/// Node mutations accumulated since the last drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexChanges {
    /// Nodes inserted or whose neighbour lists changed.
    pub upserted: Vec<u64>,
    /// Nodes that no longer exist.
    pub removed: Vec<u64>,
}

impl IndexChanges {
    /// True when nothing changed.
    pub fn is_empty(&self) -> bool {
        self.upserted.is_empty() && self.removed.is_empty()
    }
}

/// Candidate ordered so that "greater" means "better": higher score, then
/// earlier insertion.
#[derive(Debug, Clone, Copy)]
struct Scored {
    score: f32,
    seq: u64,
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Clone)]
struct Slot {
    node: IndexNode,
    norm: f32,
}

/// In-memory graph index over fixed-dimension vectors.
#[derive(Debug, Clone)]
pub struct HnswIndex {
    params: IndexParams,
    dimension: usize,
    slots: BTreeMap<u64, Slot>,
    ids: HashMap<String, u64>,
    entry: Option<u64>,
    next_seq: u64,
    touched: BTreeSet<u64>,
    removed: BTreeSet<u64>,
}

impl HnswIndex {
    /// Create an empty index.
    pub fn new(params: IndexParams, dimension: usize) -> Result<Self, IndexError> {
        params.validate()?;
        if dimension == 0 {
            return Err(IndexError::InvalidParams(
                "dimension must be positive".to_string(),
            ));
        }
        Ok(Self {
            params,
            dimension,
            slots: BTreeMap::new(),
            ids: HashMap::new(),
            entry: None,
            next_seq: 0,
            touched: BTreeSet::new(),
            removed: BTreeSet::new(),
        })
    }

    /// Rebuild an index from previously exported nodes.
    ///
    /// `next_seq` is raised above every restored sequence number so later
    /// insertions keep ordering after existing nodes.
    pub fn restore(
        params: IndexParams,
        dimension: usize,
        nodes: Vec<IndexNode>,
        next_seq: u64,
    ) -> Result<Self, IndexError> {
        let mut index = Self::new(params, dimension)?;
        for node in nodes {
            if node.vector.len() != dimension {
                return Err(IndexError::Corrupt(format!(
                    "node {} has dimension {} (expected {dimension})",
                    node.id,
                    node.vector.len()
                )));
            }
            if node.links.len() != node.level + 1 {
                return Err(IndexError::Corrupt(format!(
                    "node {} has {} link layers for level {}",
                    node.id,
                    node.links.len(),
                    node.level
                )));
            }
            if index.ids.insert(node.id.clone(), node.seq).is_some() {
                return Err(IndexError::Corrupt(format!("duplicate id {}", node.id)));
            }
            let seq = node.seq;
            let norm = norm(&node.vector);
            if index.slots.insert(seq, Slot { node, norm }).is_some() {
                return Err(IndexError::Corrupt(format!("duplicate sequence {seq}")));
            }
        }
        index.check_integrity()?;
        index.entry = index.pick_entry();
        let restored_next = index.slots.keys().next_back().map_or(0, |seq| seq + 1);
        index.next_seq = next_seq.max(restored_next);
        debug!(
            "restored index (nodes={}, next_seq={})",
            index.slots.len(),
            index.next_seq
        );
        Ok(index)
    }

    /// Build parameters in effect.
    pub fn params(&self) -> IndexParams {
        self.params
    }

    /// Vector dimension accepted by this index.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of indexed vectors.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when the index holds no vectors.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether an id is indexed.
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains_key(id)
    }

    /// Sequence number that the next insertion will receive.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Indexed ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.slots.values().map(|slot| slot.node.id.as_str())
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &IndexNode> {
        self.slots.values().map(|slot| &slot.node)
    }

    /// Node by sequence number.
    pub fn node(&self, seq: u64) -> Option<&IndexNode> {
        self.slots.get(&seq).map(|slot| &slot.node)
    }

    /// Stored vector for an id.
    pub fn vector(&self, id: &str) -> Option<&[f32]> {
        let seq = self.ids.get(id)?;
        self.slots.get(seq).map(|slot| slot.node.vector.as_slice())
    }

    /// Drain the set of nodes changed since the previous call.
    pub fn take_changes(&mut self) -> IndexChanges {
        IndexChanges {
            upserted: std::mem::take(&mut self.touched).into_iter().collect(),
            removed: std::mem::take(&mut self.removed).into_iter().collect(),
        }
    }

    /// Insert a vector under `id`, replacing any previous entry for it.
    pub fn insert(&mut self, id: impl Into<String>, vector: Vec<f32>) -> Result<u64, IndexError> {
        let id = id.into();
        self.check_vector(&vector)?;
        if let Some(previous) = self.ids.remove(&id) {
            self.remove_seq(previous);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let level = self.level_for(seq);
        let vector_norm = norm(&vector);
        let mut links = vec![Vec::new(); level + 1];

        if let Some(entry_seq) = self.entry {
            let top = self.top_level();
            let mut current = Scored {
                score: self.score(&vector, vector_norm, entry_seq),
                seq: entry_seq,
            };
            if top > level {
                current = self.descend(&vector, vector_norm, current, top, level);
            }
            let mut entry_points = vec![current];
            for layer in (0..=level.min(top)).rev() {
                let found = self.search_layer(
                    &vector,
                    vector_norm,
                    &entry_points,
                    self.params.ef_construction,
                    layer,
                );
                links[layer] = self.select_neighbours(&found, self.params.max_links(layer));
                entry_points = found;
            }
        }

        let node = IndexNode {
            id: id.clone(),
            seq,
            level,
            vector,
            links,
        };
        let backlinks: Vec<(usize, Vec<u64>)> = node.links.iter().cloned().enumerate().collect();
        self.slots.insert(
            seq,
            Slot {
                node,
                norm: vector_norm,
            },
        );
        self.ids.insert(id, seq);
        self.touched.insert(seq);

        for (layer, neighbours) in backlinks {
            for neighbour in neighbours {
                self.link(neighbour, seq, layer);
            }
        }

        if self.entry.is_none() || level > self.top_level() {
            self.entry = Some(seq);
        }
        Ok(seq)
    }

    /// Remove the entry for `id`; returns false when it was not indexed.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(seq) = self.ids.remove(id) else {
            return false;
        };
        self.remove_seq(seq);
        true
    }

    /// Approximate top-k search using the default search width.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        self.search_with_ef(query, k, self.params.ef_search)
    }

    /// Approximate top-k search with an explicit search width.
    ///
    /// Results are ordered by descending similarity, ties by insertion order.
    pub fn search_with_ef(
        &self,
        query: &[f32],
        k: usize,
        ef: usize,
    ) -> Result<Vec<SearchHit>, IndexError> {
        self.check_vector(query)?;
        let Some(entry_seq) = self.entry else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_norm = norm(query);
        let start = Scored {
            score: self.score(query, query_norm, entry_seq),
            seq: entry_seq,
        };
        let current = self.descend(query, query_norm, start, self.top_level(), 0);
        let found = self.search_layer(query, query_norm, &[current], ef.max(k), 0);
        Ok(found
            .into_iter()
            .take(k)
            .filter_map(|scored| self.hit(scored))
            .collect())
    }

    /// Exhaustive top-k search, used to cross-check approximate results.
    pub fn search_exact(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        self.check_vector(query)?;
        let query_norm = norm(query);
        let mut scored: Vec<Scored> = self
            .slots
            .values()
            .map(|slot| Scored {
                score: cosine_with_norms(query, query_norm, &slot.node.vector, slot.norm),
                seq: slot.node.seq,
            })
            .collect();
        scored.sort_by(|a, b| b.cmp(a));
        Ok(scored
            .into_iter()
            .take(k)
            .filter_map(|scored| self.hit(scored))
            .collect())
    }

    /// Verify structural invariants: every link points at a live node that
    /// reaches the linked layer, no self links, no duplicate links, and
    /// neighbour lists respect the degree cap.
    pub fn check_integrity(&self) -> Result<(), IndexError> {
        for slot in self.slots.values() {
            let node = &slot.node;
            if self.ids.get(&node.id) != Some(&node.seq) {
                return Err(IndexError::Corrupt(format!(
                    "id map out of sync for {}",
                    node.id
                )));
            }
            for (layer, neighbours) in node.links.iter().enumerate() {
                if neighbours.len() > self.params.max_links(layer) {
                    return Err(IndexError::Corrupt(format!(
                        "node {} exceeds degree on layer {layer}",
                        node.id
                    )));
                }
                let mut seen = HashSet::new();
                for neighbour in neighbours {
                    if *neighbour == node.seq || !seen.insert(*neighbour) {
                        return Err(IndexError::Corrupt(format!(
                            "node {} has a self or duplicate link on layer {layer}",
                            node.id
                        )));
                    }
                    match self.slots.get(neighbour) {
                        Some(target) if target.node.level >= layer => {}
                        _ => {
                            return Err(IndexError::Corrupt(format!(
                                "node {} links to missing node {neighbour} on layer {layer}",
                                node.id
                            )));
                        }
                    }
                }
            }
        }
        if self.ids.len() != self.slots.len() {
            return Err(IndexError::Corrupt("id map size mismatch".to_string()));
        }
        Ok(())
    }

    fn check_vector(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|value| !value.is_finite()) {
            return Err(IndexError::NonFiniteVector);
        }
        Ok(())
    }

    fn hit(&self, scored: Scored) -> Option<SearchHit> {
        self.slots.get(&scored.seq).map(|slot| SearchHit {
            id: slot.node.id.clone(),
            score: scored.score,
        })
    }

    /// Deterministic level drawn from an exponential distribution keyed by
    /// the sequence number.
    fn level_for(&self, seq: u64) -> usize {
        let mut rng =
            StdRng::seed_from_u64(self.params.seed ^ seq.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let uniform: f64 = rng.random();
        let multiplier = 1.0 / (self.params.m as f64).ln();
        let level = (-(1.0 - uniform).ln() * multiplier).floor();
        (level as usize).min(MAX_LEVEL)
    }

    fn top_level(&self) -> usize {
        self.entry
            .and_then(|seq| self.slots.get(&seq))
            .map_or(0, |slot| slot.node.level)
    }

    /// Highest level wins, earliest insertion breaks ties.
    fn pick_entry(&self) -> Option<u64> {
        self.slots
            .values()
            .max_by(|a, b| {
                a.node
                    .level
                    .cmp(&b.node.level)
                    .then_with(|| b.node.seq.cmp(&a.node.seq))
            })
            .map(|slot| slot.node.seq)
    }

    fn score(&self, query: &[f32], query_norm: f32, seq: u64) -> f32 {
        self.slots.get(&seq).map_or(f32::NEG_INFINITY, |slot| {
            cosine_with_norms(query, query_norm, &slot.node.vector, slot.norm)
        })
    }

    /// Greedy walk from `from_layer` down to just above `to_layer`.
    fn descend(
        &self,
        query: &[f32],
        query_norm: f32,
        start: Scored,
        from_layer: usize,
        to_layer: usize,
    ) -> Scored {
        let mut current = start;
        for layer in ((to_layer + 1)..=from_layer).rev() {
            if let Some(best) = self
                .search_layer(query, query_norm, &[current], 1, layer)
                .first()
            {
                current = *best;
            }
        }
        current
    }

    /// Best-first search restricted to one layer; returns up to `ef`
    /// candidates ordered best first.
    fn search_layer(
        &self,
        query: &[f32],
        query_norm: f32,
        entry_points: &[Scored],
        ef: usize,
        layer: usize,
    ) -> Vec<Scored> {
        let ef = ef.max(1);
        let mut visited: HashSet<u64> = entry_points.iter().map(|point| point.seq).collect();
        let mut candidates: BinaryHeap<Scored> = entry_points.iter().copied().collect();
        let mut results: BinaryHeap<Reverse<Scored>> =
            entry_points.iter().copied().map(Reverse).collect();
        while results.len() > ef {
            results.pop();
        }

        while let Some(current) = candidates.pop() {
            if results.len() >= ef
                && results
                    .peek()
                    .is_some_and(|Reverse(worst)| current < *worst)
            {
                break;
            }
            let Some(neighbours) = self
                .slots
                .get(&current.seq)
                .and_then(|slot| slot.node.links.get(layer))
            else {
                continue;
            };
            for &neighbour in neighbours {
                if !visited.insert(neighbour) {
                    continue;
                }
                let candidate = Scored {
                    score: self.score(query, query_norm, neighbour),
                    seq: neighbour,
                };
                let admit = results.len() < ef
                    || results
                        .peek()
                        .is_some_and(|Reverse(worst)| candidate > *worst);
                if admit {
                    candidates.push(candidate);
                    results.push(Reverse(candidate));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut found: Vec<Scored> = results.into_iter().map(|Reverse(scored)| scored).collect();
        found.sort_by(|a, b| b.cmp(a));
        found
    }

    /// Diversity heuristic: keep a candidate only if it is closer to the base
    /// than to any neighbour already kept, then top up with the pruned ones.
    ///
    /// `candidates` must be scored against the base and sorted best first.
    fn select_neighbours(&self, candidates: &[Scored], max: usize) -> Vec<u64> {
        let mut selected: Vec<&Slot> = Vec::with_capacity(max);
        let mut pruned = Vec::new();
        for candidate in candidates {
            if selected.len() >= max {
                break;
            }
            let Some(slot) = self.slots.get(&candidate.seq) else {
                continue;
            };
            let dominated = selected.iter().any(|chosen| {
                cosine_with_norms(&slot.node.vector, slot.norm, &chosen.node.vector, chosen.norm)
                    > candidate.score
            });
            if dominated {
                pruned.push(slot);
            } else {
                selected.push(slot);
            }
        }
        for slot in pruned {
            if selected.len() >= max {
                break;
            }
            selected.push(slot);
        }
        selected.into_iter().map(|slot| slot.node.seq).collect()
    }

    /// Add a directed link, shrinking the list when it exceeds the cap.
    fn link(&mut self, from: u64, to: u64, layer: usize) {
        let Some(slot) = self.slots.get(&from) else {
            return;
        };
        let Some(existing) = slot.node.links.get(layer) else {
            return;
        };
        if existing.contains(&to) {
            return;
        }
        let mut neighbours = existing.clone();
        neighbours.push(to);
        let max = self.params.max_links(layer);
        if neighbours.len() > max {
            neighbours = self.rank_and_select(slot, neighbours, max);
        }
        if let Some(slot) = self.slots.get_mut(&from) {
            slot.node.links[layer] = neighbours;
        }
        self.touched.insert(from);
    }

    fn rank_and_select(&self, base: &Slot, pool: Vec<u64>, max: usize) -> Vec<u64> {
        let mut scored: Vec<Scored> = pool
            .into_iter()
            .map(|seq| Scored {
                score: self.score(&base.node.vector, base.norm, seq),
                seq,
            })
            .collect();
        scored.sort_by(|a, b| b.cmp(a));
        self.select_neighbours(&scored, max)
    }

    fn remove_seq(&mut self, seq: u64) {
        let Some(removed) = self.slots.remove(&seq) else {
            return;
        };
        self.touched.remove(&seq);
        self.removed.insert(seq);

        for (layer, orphaned) in removed.node.links.iter().enumerate() {
            let referrers: Vec<u64> = self
                .slots
                .values()
                .filter(|slot| {
                    slot.node
                        .links
                        .get(layer)
                        .is_some_and(|links| links.contains(&seq))
                })
                .map(|slot| slot.node.seq)
                .collect();
            for referrer in referrers {
                self.repair(referrer, seq, layer, orphaned);
            }
            for &orphan in orphaned {
                self.reattach(orphan, layer);
            }
        }

        if self.entry == Some(seq) {
            self.entry = self.pick_entry();
        }
        debug!(
            "removed index node (seq={seq}, remaining={})",
            self.slots.len()
        );
    }

    /// Give a node that lost its last incoming link on `layer` a new one
    /// from its nearest remaining neighbour.
    fn reattach(&mut self, seq: u64, layer: usize) {
        let Some(slot) = self.slots.get(&seq) else {
            return;
        };
        if slot.node.level < layer {
            return;
        }
        let referenced = self.slots.values().any(|other| {
            other
                .node
                .links
                .get(layer)
                .is_some_and(|links| links.contains(&seq))
        });
        if referenced {
            return;
        }
        if let Some(&nearest) = slot.node.links[layer].first() {
            self.link(nearest, seq, layer);
        }
    }

    /// Replace a dropped link with candidates from the removed node's
    /// neighbourhood.
    fn repair(&mut self, referrer: u64, removed: u64, layer: usize, orphaned: &[u64]) {
        let Some(slot) = self.slots.get(&referrer) else {
            return;
        };
        let mut pool: Vec<u64> = slot.node.links[layer]
            .iter()
            .copied()
            .filter(|seq| *seq != removed)
            .collect();
        for &candidate in orphaned {
            if candidate == referrer || candidate == removed || pool.contains(&candidate) {
                continue;
            }
            if self
                .slots
                .get(&candidate)
                .is_some_and(|target| target.node.level >= layer)
            {
                pool.push(candidate);
            }
        }
        let neighbours = self.rank_and_select(slot, pool, self.params.max_links(layer));
        if let Some(slot) = self.slots.get_mut(&referrer) {
            slot.node.links[layer] = neighbours;
        }
        self.touched.insert(referrer);
    }
}
