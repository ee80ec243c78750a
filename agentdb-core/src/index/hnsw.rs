//! Hierarchical Navigable Small World graph over full-precision vectors.
//!
//! Search descends greedily through the upper layers, then runs a
//! bounded-beam search at layer 0. Distance is cosine (`1 - dot`) on
//! L2-normalized vectors. With quantization enabled, an int8 side-map is
//! maintained per vector and the top beam candidates are exact re-ranked
//! before the final top-k is returned.

use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use tracing::trace;

use super::quantize::QuantizedVector;
use crate::error::{Error, Result};
use crate::vector::{cosine_distance, validate_dimension};

/// Distance metric for the index. Stored vectors are unit-normalized, so
/// cosine distance reduces to `1 - dot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
}

/// Index construction and search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Vector dimension
    pub dimension: usize,
    /// Max neighbors per node per layer (layer 0 allows `2 * m`)
    pub m: usize,
    /// Beam width during insertion
    pub ef_construction: usize,
    /// Minimum beam width during search
    pub ef_search: usize,
    /// Distance metric
    pub metric: Metric,
    /// Maintain an int8 side-map and re-rank exactly at search time
    pub quantized: bool,
    /// Candidates kept for the re-rank pass; `None` means `k * 2`
    pub rerank_candidates: Option<usize>,
    /// Level-sampling seed, fixed in tests for reproducible graphs
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub seed: Option<u64>,
}

impl HnswConfig {
    /// Defaults for a given dimension: `M = 16`, `efConstruction = 200`,
    /// `efSearch = 50`.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            metric: Metric::Cosine,
            quantized: false,
            rerank_candidates: None,
            seed: None,
        }
    }

    /// Effective re-rank candidate count for a given `k`.
    #[must_use]
    pub fn rerank_for(&self, k: usize) -> usize {
        self.rerank_candidates.unwrap_or(k * 2)
    }
}

/// One graph vertex: its level and per-layer adjacency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswNode {
    pub id: String,
    pub level: usize,
    /// `neighbors[l]` is the adjacency set at layer `l`, `l <= level`
    pub neighbors: Vec<HashSet<String>>,
}

impl HnswNode {
    fn new(id: String, level: usize) -> Self {
        Self {
            id,
            level,
            neighbors: vec![HashSet::new(); level + 1],
        }
    }
}

/// A search hit: id plus distance (smaller is closer).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub distance: f32,
}

/// Heap entry ordered by distance only; ids are never compared.
#[derive(Debug, Clone)]
struct DistEntry {
    distance: f32,
    id: String,
}

impl PartialEq for DistEntry {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}
impl Eq for DistEntry {}
impl PartialOrd for DistEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for DistEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance.total_cmp(&other.distance)
    }
}

/// The in-memory HNSW index.
#[derive(Debug)]
pub struct HnswIndex {
    config: HnswConfig,
    nodes: HashMap<String, HnswNode>,
    vectors: HashMap<String, Vec<f32>>,
    quantized: HashMap<String, QuantizedVector>,
    entry_point: Option<String>,
    max_level: usize,
    /// Level-sampling parameter `1 / ln(M)`
    ml: f64,
    rng: StdRng,
}

impl HnswIndex {
    #[must_use]
    pub fn new(config: HnswConfig) -> Self {
        let ml = 1.0 / (config.m as f64).ln();
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::try_from_rng(&mut rand::rngs::SysRng).expect("failed to seed RNG from OS randomness"),
        };
        Self {
            config,
            nodes: HashMap::new(),
            vectors: HashMap::new(),
            quantized: HashMap::new(),
            entry_point: None,
            max_level: 0,
            ml,
            rng,
        }
    }

    #[must_use]
    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    #[must_use]
    pub fn entry_point(&self) -> Option<&str> {
        self.entry_point.as_deref()
    }

    #[must_use]
    pub fn max_level(&self) -> usize {
        self.max_level
    }

    /// Full-precision vector for an id, if present.
    #[must_use]
    pub fn vector(&self, id: &str) -> Option<&[f32]> {
        self.vectors.get(id).map(Vec::as_slice)
    }

    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.config.metric {
            Metric::Cosine => cosine_distance(a, b),
        }
    }

    fn distance_to(&self, query: &[f32], id: &str) -> f32 {
        self.vectors
            .get(id)
            .map_or(f32::INFINITY, |v| self.distance(query, v))
    }

    /// Sample an insertion level from the exponential distribution.
    fn sample_level(&mut self) -> usize {
        // U in (0, 1]: random::<f64>() yields [0, 1).
        let u: f64 = 1.0 - self.rng.random::<f64>();
        (-u.ln() * self.ml).floor() as usize
    }

    fn degree_cap(&self, layer: usize) -> usize {
        if layer == 0 {
            self.config.m * 2
        } else {
            self.config.m
        }
    }

    /// Insert a vector. An existing entry under the same id is removed first.
    pub fn add(&mut self, id: &str, vector: Vec<f32>) -> Result<()> {
        validate_dimension(&vector, self.config.dimension)?;
        if self.nodes.contains_key(id) {
            self.remove(id)?;
        }

        let level = self.sample_level();
        trace!(id, level, "hnsw insert");

        if self.config.quantized {
            self.quantized
                .insert(id.to_string(), QuantizedVector::quantize(&vector));
        }

        let Some(entry_id) = self.entry_point.clone() else {
            self.nodes.insert(id.to_string(), HnswNode::new(id.to_string(), level));
            self.vectors.insert(id.to_string(), vector);
            self.entry_point = Some(id.to_string());
            self.max_level = level;
            return Ok(());
        };

        self.vectors.insert(id.to_string(), vector.clone());
        let mut node = HnswNode::new(id.to_string(), level);

        // Greedy descent through layers above the new node's level.
        let mut current = entry_id;
        for layer in ((level + 1)..=self.max_level).rev() {
            current = self.greedy_closest(&vector, current, layer);
        }

        // Beam insertion from min(level, max_level) down to 0.
        let mut entry_points = vec![current];
        for layer in (0..=level.min(self.max_level)).rev() {
            let candidates =
                self.search_layer(&vector, &entry_points, self.config.ef_construction, layer);
            let cap = self.degree_cap(layer);
            let selected: Vec<DistEntry> = candidates.iter().take(cap).cloned().collect();

            for neighbor in &selected {
                node.neighbors[layer].insert(neighbor.id.clone());
                if let Some(other) = self.nodes.get_mut(&neighbor.id) {
                    other.neighbors[layer].insert(id.to_string());
                }
            }

            // Enforce the degree cap on every neighbor we just linked.
            for neighbor in &selected {
                self.prune_neighbors(&neighbor.id, layer);
            }

            entry_points = candidates.into_iter().map(|c| c.id).collect();
            if entry_points.is_empty() {
                entry_points = vec![self.entry_point.clone().unwrap_or_default()];
            }
        }

        self.nodes.insert(id.to_string(), node);

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(id.to_string());
        }
        Ok(())
    }

    /// Remove a vector, unlinking it from all layers.
    pub fn remove(&mut self, id: &str) -> Result<()> {
        let Some(node) = self.nodes.remove(id) else {
            return Err(Error::NotFound(id.to_string()));
        };
        for (layer, neighbors) in node.neighbors.iter().enumerate() {
            for neighbor_id in neighbors {
                if let Some(neighbor) = self.nodes.get_mut(neighbor_id) {
                    if let Some(set) = neighbor.neighbors.get_mut(layer) {
                        set.remove(id);
                    }
                }
            }
        }
        self.vectors.remove(id);
        self.quantized.remove(id);

        if self.entry_point.as_deref() == Some(id) {
            // Elect the highest-remaining-level node.
            let next = self
                .nodes
                .values()
                .max_by_key(|n| n.level)
                .map(|n| (n.id.clone(), n.level));
            match next {
                Some((next_id, next_level)) => {
                    self.entry_point = Some(next_id);
                    self.max_level = next_level;
                }
                None => {
                    self.entry_point = None;
                    self.max_level = 0;
                }
            }
        }
        Ok(())
    }

    /// K-nearest-neighbor search.
    ///
    /// Returns `min(k, len)` distinct hits in non-decreasing distance order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        validate_dimension(query, self.config.dimension)?;
        let Some(entry_id) = self.entry_point.clone() else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        // Greedy descent to layer 1.
        let mut current = entry_id;
        for layer in (1..=self.max_level).rev() {
            current = self.greedy_closest(query, current, layer);
        }

        let ef = if self.config.quantized {
            self.config.ef_search.max(self.config.rerank_for(k))
        } else {
            self.config.ef_search.max(k)
        };
        let mut candidates = self.search_layer(query, &[current], ef, 0);

        if self.config.quantized {
            // Exact re-rank of the top beam candidates on full precision.
            candidates.truncate(self.config.rerank_for(k));
            candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        }

        Ok(candidates
            .into_iter()
            .take(k)
            .map(|c| SearchHit {
                id: c.id,
                distance: c.distance,
            })
            .collect())
    }

    /// Greedy single-step descent at one layer: move to any closer
    /// neighbor until no neighbor improves.
    fn greedy_closest(&self, query: &[f32], start: String, layer: usize) -> String {
        let mut current = start;
        let mut current_dist = self.distance_to(query, &current);
        loop {
            let Some(node) = self.nodes.get(&current) else {
                return current;
            };
            let Some(neighbors) = node.neighbors.get(layer) else {
                return current;
            };
            let mut improved = false;
            for neighbor_id in neighbors {
                let dist = self.distance_to(query, neighbor_id);
                if dist < current_dist {
                    current = neighbor_id.clone();
                    current_dist = dist;
                    improved = true;
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Bounded-beam search at one layer.
    ///
    /// Two heaps: a min-heap of candidates to expand and a max-heap of the
    /// best `ef` results. Expansion stops once the nearest unexpanded
    /// candidate is farther than the worst kept result and the result
    /// heap is full. Returns results sorted by ascending distance.
    fn search_layer(
        &self,
        query: &[f32],
        entry_points: &[String],
        ef: usize,
        layer: usize,
    ) -> Vec<DistEntry> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut to_expand: BinaryHeap<Reverse<DistEntry>> = BinaryHeap::new();
        let mut results: BinaryHeap<DistEntry> = BinaryHeap::new();

        for id in entry_points {
            if !self.nodes.contains_key(id) || !visited.insert(id.clone()) {
                continue;
            }
            let entry = DistEntry {
                distance: self.distance_to(query, id),
                id: id.clone(),
            };
            to_expand.push(Reverse(entry.clone()));
            results.push(entry);
        }
        while results.len() > ef {
            results.pop();
        }

        while let Some(Reverse(candidate)) = to_expand.pop() {
            let worst = results.peek().map_or(f32::INFINITY, |w| w.distance);
            if results.len() >= ef && candidate.distance > worst {
                break;
            }
            let Some(node) = self.nodes.get(&candidate.id) else {
                continue;
            };
            let Some(neighbors) = node.neighbors.get(layer) else {
                continue;
            };
            for neighbor_id in neighbors {
                if !visited.insert(neighbor_id.clone()) {
                    continue;
                }
                let dist = self.distance_to(query, neighbor_id);
                let worst = results.peek().map_or(f32::INFINITY, |w| w.distance);
                if results.len() < ef || dist < worst {
                    let entry = DistEntry {
                        distance: dist,
                        id: neighbor_id.clone(),
                    };
                    to_expand.push(Reverse(entry.clone()));
                    results.push(entry);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut sorted = results.into_vec();
        sorted.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        sorted
    }

    /// Drop a node's farthest edges once it exceeds the layer degree cap.
    /// Removed edges are dropped from both sides.
    fn prune_neighbors(&mut self, id: &str, layer: usize) {
        let cap = self.degree_cap(layer);
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let Some(neighbors) = node.neighbors.get(layer) else {
            return;
        };
        if neighbors.len() <= cap {
            return;
        }
        let Some(own_vector) = self.vectors.get(id).cloned() else {
            return;
        };

        let mut ranked: Vec<DistEntry> = neighbors
            .iter()
            .map(|n| DistEntry {
                distance: self.distance_to(&own_vector, n),
                id: n.clone(),
            })
            .collect();
        ranked.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        let keep: HashSet<String> = ranked.iter().take(cap).map(|e| e.id.clone()).collect();
        let dropped: Vec<String> = ranked
            .into_iter()
            .skip(cap)
            .map(|e| e.id)
            .collect();

        if let Some(node) = self.nodes.get_mut(id) {
            node.neighbors[layer] = keep;
        }
        for other in dropped {
            if let Some(other_node) = self.nodes.get_mut(&other) {
                if let Some(set) = other_node.neighbors.get_mut(layer) {
                    set.remove(id);
                }
            }
        }
    }

    pub(super) fn parts(
        &self,
    ) -> (
        &HnswConfig,
        &HashMap<String, HnswNode>,
        &HashMap<String, Vec<f32>>,
        Option<&str>,
        usize,
    ) {
        (
            &self.config,
            &self.nodes,
            &self.vectors,
            self.entry_point.as_deref(),
            self.max_level,
        )
    }

    pub(super) fn from_parts(
        config: HnswConfig,
        nodes: HashMap<String, HnswNode>,
        vectors: HashMap<String, Vec<f32>>,
        entry_point: Option<String>,
        max_level: usize,
    ) -> Self {
        let quantized = if config.quantized {
            vectors
                .iter()
                .map(|(id, v)| (id.clone(), QuantizedVector::quantize(v)))
                .collect()
        } else {
            HashMap::new()
        };
        let ml = 1.0 / (config.m as f64).ln();
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::try_from_rng(&mut rand::rngs::SysRng).expect("failed to seed RNG from OS randomness"),
        };
        Self {
            config,
            nodes,
            vectors,
            quantized,
            entry_point,
            max_level,
            ml,
            rng,
        }
    }
}
