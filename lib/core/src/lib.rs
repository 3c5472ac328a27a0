//! # jobmatch Core
//!
//! Core library for the jobmatch recommendation engine.
//!
//! This crate provides the data model and the search structures:
//!
//! - [`JobRecord`] / [`UserQuery`] - catalog rows and recommendation requests
//! - [`Catalog`] / [`Embedder`] - contracts for the job source and text embedding
//! - [`AnnIndex`] - flat or HNSW nearest-neighbor search over unit vectors
//! - [`Index`] - immutable, versioned title + profile index over a store snapshot
//! - [`IndexManager`] - atomic publication of index versions to readers
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use jobmatch_core::{
//!     Embedder, EmbeddingEntry, HashingEmbedder, Index, IndexConfig, IndexManager, JobRecord,
//!     StoreSnapshot,
//! };
//!
//! let embedder = HashingEmbedder::new(64);
//! let job = JobRecord::new(1, "Data Scientist").with_skills(["python", "sql"]);
//! let entry = EmbeddingEntry::new(
//!     &job,
//!     embedder.embed(&job.title).unwrap(),
//!     embedder.embed(&job.profile_text()).unwrap(),
//! );
//!
//! let snapshot = StoreSnapshot {
//!     generation: 1,
//!     dim: 64,
//!     entries: vec![Arc::new(entry)],
//!     tombstones: Default::default(),
//! };
//!
//! let manager = IndexManager::new();
//! manager.publish(Index::build(&snapshot, &IndexConfig::default())).unwrap();
//!
//! let index = manager.current().unwrap();
//! let hits = index.search(&embedder.embed("Data Scientist").unwrap(), 5);
//! assert_eq!(hits[0].job_id, 1);
//! ```

pub mod ann;
pub mod catalog;
pub mod config;
pub mod embedder;
pub mod error;
pub mod flat;
pub mod hnsw;
pub mod index;
pub mod job;
pub mod manager;
pub mod vector;

pub use ann::{AnnIndex, IndexStrategy, NearestNeighbor};
pub use catalog::{Catalog, CatalogSnapshot, InMemoryCatalog, JsonFileCatalog};
pub use config::{
    EmbeddingConfig, EngineConfig, HnswParams, IndexConfig, NormalizerConfig, ScoringConfig,
    ScoringWeights, ServerConfig, StorageConfig, SyncConfig,
};
pub use embedder::{Embedder, HashingEmbedder, DEFAULT_EMBEDDING_DIM};
pub use error::{Error, Result};
pub use flat::FlatIndex;
pub use hnsw::HnswIndex;
pub use index::{BuildKind, Index, IndexBuilder, Neighbor, StoreSnapshot};
pub use job::{
    normalize_skills, EmbeddingEntry, JobId, JobMetadata, JobRecord, Location, NumericRange,
    UserQuery, MAX_TOP_K,
};
pub use manager::{BuildTicket, IndexManager, IndexState};
pub use vector::Vector;
