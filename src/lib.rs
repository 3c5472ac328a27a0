//! # JobMatch
//!
//! A job recommendation engine: semantic vector search over job embeddings
//! fused with structured signals (skills, location, experience).
//!
//! The catalog is synced into an append-only vector store incrementally;
//! only new or edited rows are embedded. A nearest-neighbor index is kept
//! up to date by incremental insertion and published atomically, so
//! queries never observe a half-built index.
//!
//! ## Quick Start
//!
//! ### As a Server
//!
//! ```bash
//! jobmatch sync --catalog jobs.json --once
//! jobmatch serve --http-port 8080
//! ```
//!
//! ### As a Library
//!
//! ```rust,no_run
//! use jobmatch::prelude::*;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let mut config = EngineConfig::default();
//! config.embedding.dim = 128;
//! let embedder = Arc::new(HashingEmbedder::new(128));
//! let catalog = Arc::new(InMemoryCatalog::with_jobs([
//!     JobRecord::new(1, "Data Scientist").with_skills(["python", "sql"]),
//! ]));
//!
//! let data_dir = Path::new("./data");
//! let sync = DeltaSync::open(data_dir, &config, catalog, embedder.clone()).unwrap();
//! sync.run_once().unwrap();
//!
//! let recommender = Recommender::new(data_dir, config, embedder).unwrap();
//! recommender.reload().unwrap();
//! let response = recommender
//!     .recommend(&UserQuery::new("data scienctist").with_top_k(5))
//!     .unwrap();
//! println!("{} -> {:?}", response.corrected_title, response.results);
//! ```
//!
//! ## Crate Structure
//!
//! - `jobmatch-core` - Job model, configuration, embedder and catalog contracts,
//!   flat and HNSW indexes, index publication
//! - `jobmatch-storage` - Vector store, sync cursor, index artifacts, delta sync
//! - `jobmatch-similarity` - Scoring signals, ranking and title correction
//! - `jobmatch-api` - Recommendation service and REST endpoints

// Re-export core types
pub use jobmatch_core::{
    Catalog, CatalogSnapshot, Embedder, EmbeddingEntry, EngineConfig, Error, HashingEmbedder,
    InMemoryCatalog, Index, IndexManager, IndexStrategy, JobId, JobMetadata, JobRecord,
    JsonFileCatalog, Location, NumericRange, Result, ScoringWeights, UserQuery, Vector,
};

// Re-export storage
pub use jobmatch_storage::{DeltaSync, SyncOutcome, SyncReport, SyncTask, VectorStore};

// Re-export scoring
pub use jobmatch_similarity::{ScoredCandidate, ScoringEngine, TitleNormalizer};

// Re-export API
pub use jobmatch_api::{RecommendResponse, Recommender, RestApi};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        DeltaSync, EngineConfig, Error, HashingEmbedder, InMemoryCatalog, JobRecord,
        JsonFileCatalog, Location, Recommender, Result, ScoredCandidate, SyncTask, UserQuery,
    };
}
