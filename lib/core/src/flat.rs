use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::ann::NearestNeighbor;
use crate::config::HnswParams;
use crate::vector::{dot, Vector};

/// Above this many vectors the scan is split across the rayon pool
const PARALLEL_SCAN_THRESHOLD: usize = 4096;

/// Exact nearest-neighbor index: a linear scan over contiguous storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatIndex {
    dim: usize,
    /// Normalized vectors, `dim` floats per position
    vectors: Vec<f32>,
}

impl FlatIndex {
    #[inline]
    fn get_vector(&self, idx: usize) -> &[f32] {
        let start = idx * self.dim;
        &self.vectors[start..start + self.dim]
    }
}

impl NearestNeighbor for FlatIndex {
    fn empty(dim: usize, _params: &HnswParams) -> Self {
        Self {
            dim,
            vectors: Vec::new(),
        }
    }

    fn insert(&mut self, vector: &Vector) {
        let normalized = vector.normalized();
        if normalized.dim() == self.dim {
            self.vectors.extend_from_slice(normalized.as_slice());
        } else {
            // Keep positions aligned with the store; a bad vector never matches
            self.vectors.extend(std::iter::repeat(0.0).take(self.dim));
        }
    }

    fn search(&self, query: &Vector, k: usize) -> Vec<(usize, f32)> {
        let n = self.len();
        if n == 0 || k == 0 || query.dim() != self.dim {
            return Vec::new();
        }

        let query = query.normalized();
        let q = query.as_slice();
        let mut scored: Vec<(usize, f32)> = if n >= PARALLEL_SCAN_THRESHOLD {
            (0..n)
                .into_par_iter()
                .map(|idx| (idx, dot(q, self.get_vector(idx))))
                .collect()
        } else {
            (0..n).map(|idx| (idx, dot(q, self.get_vector(idx)))).collect()
        };

        let by_score = |a: &(usize, f32), b: &(usize, f32)| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        };
        if scored.len() > k {
            scored.select_nth_unstable_by(k - 1, by_score);
            scored.truncate(k);
        }
        scored.sort_unstable_by(by_score);
        scored
    }

    #[inline]
    fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.vectors.len() / self.dim
        }
    }

    #[inline]
    fn dim(&self) -> usize {
        self.dim
    }
}
