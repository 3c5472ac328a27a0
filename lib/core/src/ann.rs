//! Nearest-neighbor strategies
//!
//! A closed set of index structures behind one capability trait. The
//! strategy is picked from configuration; callers only see [`AnnIndex`].

use serde::{Deserialize, Serialize};

use crate::config::HnswParams;
use crate::flat::FlatIndex;
use crate::hnsw::HnswIndex;
use crate::vector::Vector;

/// Which nearest-neighbor structure to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexStrategy {
    /// Exact linear scan
    Flat,
    /// Hierarchical navigable small world graph
    #[default]
    Hnsw,
}

impl std::fmt::Display for IndexStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexStrategy::Flat => write!(f, "flat"),
            IndexStrategy::Hnsw => write!(f, "hnsw"),
        }
    }
}

impl std::str::FromStr for IndexStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flat" => Ok(IndexStrategy::Flat),
            "hnsw" => Ok(IndexStrategy::Hnsw),
            other => Err(format!("unknown index strategy '{}'", other)),
        }
    }
}

/// Capability shared by every index strategy.
///
/// Vectors are addressed by insertion position. Similarity is cosine:
/// vectors are L2-normalized on insert and queries before search.
pub trait NearestNeighbor {
    fn empty(dim: usize, params: &HnswParams) -> Self
    where
        Self: Sized;

    /// Append one vector at position `len()`
    fn insert(&mut self, vector: &Vector);

    /// Up to `k` `(position, similarity)` pairs, best first
    fn search(&self, query: &Vector, k: usize) -> Vec<(usize, f32)>;

    fn len(&self) -> usize;

    fn dim(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full rebuild from scratch
    fn build<'a, I>(dim: usize, params: &HnswParams, vectors: I) -> Self
    where
        Self: Sized,
        I: IntoIterator<Item = &'a Vector>,
    {
        let mut index = Self::empty(dim, params);
        index.insert_all(vectors);
        index
    }

    /// Incremental insertion of a batch
    fn insert_all<'a, I>(&mut self, vectors: I)
    where
        Self: Sized,
        I: IntoIterator<Item = &'a Vector>,
    {
        for vector in vectors {
            self.insert(vector);
        }
    }
}

/// An index of one of the configured strategies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AnnIndex {
    Flat(FlatIndex),
    Hnsw(HnswIndex),
}

impl AnnIndex {
    pub fn empty_with(strategy: IndexStrategy, dim: usize, params: &HnswParams) -> Self {
        match strategy {
            IndexStrategy::Flat => AnnIndex::Flat(FlatIndex::empty(dim, params)),
            IndexStrategy::Hnsw => AnnIndex::Hnsw(HnswIndex::empty(dim, params)),
        }
    }

    pub fn build_with<'a, I>(
        strategy: IndexStrategy,
        dim: usize,
        params: &HnswParams,
        vectors: I,
    ) -> Self
    where
        I: IntoIterator<Item = &'a Vector>,
    {
        let mut index = Self::empty_with(strategy, dim, params);
        for vector in vectors {
            index.insert(vector);
        }
        index
    }

    pub fn strategy(&self) -> IndexStrategy {
        match self {
            AnnIndex::Flat(_) => IndexStrategy::Flat,
            AnnIndex::Hnsw(_) => IndexStrategy::Hnsw,
        }
    }

    pub fn insert(&mut self, vector: &Vector) {
        match self {
            AnnIndex::Flat(index) => index.insert(vector),
            AnnIndex::Hnsw(index) => index.insert(vector),
        }
    }

    pub fn search(&self, query: &Vector, k: usize) -> Vec<(usize, f32)> {
        match self {
            AnnIndex::Flat(index) => index.search(query, k),
            AnnIndex::Hnsw(index) => index.search(query, k),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            AnnIndex::Flat(index) => index.len(),
            AnnIndex::Hnsw(index) => index.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dim(&self) -> usize {
        match self {
            AnnIndex::Flat(index) => index.dim(),
            AnnIndex::Hnsw(index) => index.dim(),
        }
    }
}
