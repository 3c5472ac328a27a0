use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::ann::NearestNeighbor;
use crate::config::HnswParams;
use crate::vector::{dot, Vector};

/// Bit vector for visited node tracking.
/// Much faster than HashSet for dense integer sets.
struct VisitedSet {
    bits: Vec<u64>,
}

impl VisitedSet {
    #[inline]
    fn new(capacity: usize) -> Self {
        Self {
            bits: vec![0; capacity.div_ceil(64)],
        }
    }

    /// Returns true when `idx` was not yet visited
    #[inline]
    fn insert(&mut self, idx: usize) -> bool {
        let word_idx = idx / 64;
        let mask = 1u64 << (idx % 64);
        if word_idx >= self.bits.len() {
            self.bits.resize(word_idx + 1, 0);
        }
        let was_set = (self.bits[word_idx] & mask) != 0;
        self.bits[word_idx] |= mask;
        !was_set
    }

    #[inline]
    fn contains(&self, idx: usize) -> bool {
        self.bits
            .get(idx / 64)
            .map(|word| (word & (1u64 << (idx % 64))) != 0)
            .unwrap_or(false)
    }
}

/// Candidate for search with distance
#[derive(Clone, Copy)]
struct Candidate {
    idx: usize,
    dist: f32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist && self.idx == other.idx
    }
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: smaller distance = higher priority
        other
            .dist
            .partial_cmp(&self.dist)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.idx.cmp(&self.idx))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Reverse candidate for max-heap (furthest first)
#[derive(Clone, Copy)]
struct ReverseCandidate {
    idx: usize,
    dist: f32,
}

impl PartialEq for ReverseCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist && self.idx == other.idx
    }
}

impl Eq for ReverseCandidate {}

impl Ord for ReverseCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: larger distance = higher priority
        self.dist
            .partial_cmp(&other.dist)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.idx.cmp(&other.idx))
    }
}

impl PartialOrd for ReverseCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HnswNode {
    /// Neighbor lists, one per layer the node lives on
    layers: Vec<Vec<usize>>,
}

/// HNSW index for approximate nearest neighbor search.
///
/// Search takes `&self` so a published index can be shared by any number of
/// readers; insertion needs `&mut self` and is only done on private copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswIndex {
    nodes: Vec<HnswNode>,
    /// Contiguous storage for all normalized vectors (cache-friendly)
    vectors: Vec<f32>,
    dim: usize,
    entry_point: Option<usize>,
    top_layer: usize,
    params: HnswParams,
}

impl HnswIndex {
    pub fn new(dim: usize, params: HnswParams) -> Self {
        Self {
            nodes: Vec::new(),
            vectors: Vec::new(),
            dim,
            entry_point: None,
            top_layer: 0,
            params,
        }
    }

    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    #[inline(always)]
    fn get_vector(&self, node_idx: usize) -> &[f32] {
        let start = node_idx * self.dim;
        &self.vectors[start..start + self.dim]
    }

    #[inline(always)]
    fn distance_to_node(&self, query: &[f32], node_idx: usize) -> f32 {
        1.0 - dot(query, self.get_vector(node_idx))
    }

    /// Level for a node, drawn from an exponential decay with ratio 1/M.
    /// Seeded per position so rebuilding the same vectors gives the same graph.
    fn select_layer(&self, node_idx: usize) -> usize {
        let seed = self
            .params
            .seed
            .wrapping_add((node_idx as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let mut rng = StdRng::seed_from_u64(seed);
        let decay = 1.0 / self.params.max_connections.max(2) as f32;
        let mut layer = 0;
        while layer + 1 < self.params.max_layers && rng.random::<f32>() < decay {
            layer += 1;
        }
        layer
    }

    #[inline]
    fn max_neighbors(&self, layer: usize) -> usize {
        if layer == 0 {
            self.params.max_connections * 2
        } else {
            self.params.max_connections
        }
    }

    /// Walk greedily towards the query on one layer
    fn greedy_closest(&self, query: &[f32], entry: usize, layer: usize) -> usize {
        let mut current = entry;
        let mut current_dist = self.distance_to_node(query, current);
        loop {
            let mut improved = false;
            if let Some(neighbors) = self.nodes[current].layers.get(layer) {
                for &neighbor in neighbors {
                    let dist = self.distance_to_node(query, neighbor);
                    if dist < current_dist {
                        current = neighbor;
                        current_dist = dist;
                        improved = true;
                    }
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Best-first search on one layer, returning up to `ef` nodes sorted by
    /// ascending distance
    fn search_layer(
        &self,
        query: &[f32],
        entry_point: usize,
        ef: usize,
        layer: usize,
    ) -> Vec<(usize, f32)> {
        let mut visited = VisitedSet::new(self.nodes.len());
        let mut candidates: BinaryHeap<Candidate> = BinaryHeap::with_capacity(ef * 2);
        let mut results: BinaryHeap<ReverseCandidate> = BinaryHeap::with_capacity(ef + 1);

        let entry_dist = self.distance_to_node(query, entry_point);
        candidates.push(Candidate {
            idx: entry_point,
            dist: entry_dist,
        });
        results.push(ReverseCandidate {
            idx: entry_point,
            dist: entry_dist,
        });
        visited.insert(entry_point);

        let mut worst_dist = entry_dist;

        while let Some(Candidate {
            idx: current_idx,
            dist: current_dist,
        }) = candidates.pop()
        {
            if results.len() >= ef && current_dist > worst_dist {
                break;
            }

            let Some(neighbors) = self.nodes[current_idx].layers.get(layer) else {
                continue;
            };

            for &neighbor_idx in neighbors {
                if !visited.insert(neighbor_idx) {
                    continue;
                }
                let dist = self.distance_to_node(query, neighbor_idx);
                if results.len() < ef || dist < worst_dist {
                    candidates.push(Candidate {
                        idx: neighbor_idx,
                        dist,
                    });
                    results.push(ReverseCandidate {
                        idx: neighbor_idx,
                        dist,
                    });
                    if results.len() > ef {
                        results.pop();
                    }
                    if let Some(worst) = results.peek() {
                        worst_dist = worst.dist;
                    }
                }
            }
        }

        let mut result_vec: Vec<(usize, f32)> =
            results.into_iter().map(|c| (c.idx, c.dist)).collect();
        result_vec.sort_unstable_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        result_vec
    }

    /// Exhaustive scan; used while the graph is smaller than the search beam
    fn scan(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = (0..self.nodes.len())
            .map(|idx| (idx, self.distance_to_node(query, idx)))
            .collect();
        scored.sort_unstable_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored
    }

    /// Keep only the closest `max` links of `node_idx` on `layer`
    fn prune_links(&mut self, node_idx: usize, layer: usize, max: usize) {
        let base = self.get_vector(node_idx).to_vec();
        let mut links = std::mem::take(&mut self.nodes[node_idx].layers[layer]);
        links.sort_by(|&a, &b| {
            let dist_a = 1.0 - dot(&base, self.get_vector(a));
            let dist_b = 1.0 - dot(&base, self.get_vector(b));
            dist_a
                .partial_cmp(&dist_b)
                .unwrap_or(Ordering::Equal)
                .then(a.cmp(&b))
        });
        links.truncate(max);
        self.nodes[node_idx].layers[layer] = links;
    }
}

impl NearestNeighbor for HnswIndex {
    fn empty(dim: usize, params: &HnswParams) -> Self {
        Self::new(dim, *params)
    }

    fn insert(&mut self, vector: &Vector) {
        let node_idx = self.nodes.len();
        let layer = self.select_layer(node_idx);

        let normalized = if vector.dim() == self.dim {
            vector.normalized()
        } else {
            // Keep positions aligned with the store; a bad vector never matches
            Vector::zeros(self.dim)
        };
        self.vectors.extend_from_slice(normalized.as_slice());
        self.nodes.push(HnswNode {
            layers: vec![Vec::new(); layer + 1],
        });

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(node_idx);
            self.top_layer = layer;
            return;
        };

        let query = normalized.as_slice();
        let mut current = entry;
        let mut current_layer = self.top_layer;
        while current_layer > layer {
            current = self.greedy_closest(query, current, current_layer);
            current_layer -= 1;
        }

        for l in (0..=layer.min(self.top_layer)).rev() {
            let candidates = self.search_layer(query, current, self.params.ef_construction, l);
            let max = self.max_neighbors(l);
            let neighbors: Vec<usize> = candidates
                .iter()
                .filter(|(idx, _)| *idx != node_idx)
                .take(max)
                .map(|(idx, _)| *idx)
                .collect();

            for &neighbor_idx in &neighbors {
                self.nodes[neighbor_idx].layers[l].push(node_idx);
                if self.nodes[neighbor_idx].layers[l].len() > max {
                    self.prune_links(neighbor_idx, l, max);
                }
            }
            self.nodes[node_idx].layers[l] = neighbors;

            if let Some((closest, _)) = candidates.first() {
                current = *closest;
            }
        }

        if layer > self.top_layer {
            self.top_layer = layer;
            self.entry_point = Some(node_idx);
        }
    }

    fn search(&self, query: &Vector, k: usize) -> Vec<(usize, f32)> {
        let Some(entry) = self.entry_point else {
            return Vec::new();
        };
        if k == 0 || query.dim() != self.dim {
            return Vec::new();
        }

        let query = query.normalized();
        let q = query.as_slice();
        let ef = self.params.ef_search.max(k);

        let results = if self.nodes.len() <= ef {
            self.scan(q, k)
        } else {
            let mut current = entry;
            for layer in (1..=self.top_layer).rev() {
                current = self.greedy_closest(q, current, layer);
            }
            self.search_layer(q, current, ef, 0)
        };

        results
            .into_iter()
            .take(k)
            .map(|(idx, dist)| (idx, 1.0 - dist))
            .collect()
    }

    #[inline]
    fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    fn dim(&self) -> usize {
        self.dim
    }
}
