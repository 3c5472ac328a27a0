//! # JobMatch Similarity
//!
//! Scoring signals on top of the nearest-neighbor index.
//!
//! - **Title correction**: snap a misspelled query title to the closest
//!   title in the index vocabulary
//! - **Multi-signal scoring**: fuse title similarity, skill overlap,
//!   location and experience fit into one ranked list
//!
//! ## Example
//!
//! ```rust
//! use jobmatch_similarity::{ScoringEngine, TitleNormalizer};
//! use jobmatch_core::ScoringConfig;
//! use std::sync::Arc;
//!
//! let vocabulary = Arc::new(vec!["Data Analyst".to_string(), "Data Scientist".to_string()]);
//! let normalizer = TitleNormalizer::new(vocabulary, 0.8);
//! assert_eq!(normalizer.normalize("data scienctist"), "Data Scientist");
//!
//! let engine = ScoringEngine::new(ScoringConfig::default()).unwrap();
//! assert!((engine.weights().sum() - 1.0).abs() < 1e-6);
//! ```

pub mod distance;
pub mod normalizer;
pub mod scoring;

pub use distance::{
    experience_fit, location_score, rescale_cosine, skill_overlap, string_similarity,
    title_similarity, token_set_ratio,
};
pub use normalizer::TitleNormalizer;
pub use jobmatch_core::ScoringWeights;
pub use scoring::{Candidate, ComponentScores, ScoredCandidate, ScoringEngine};
