use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::ann::IndexStrategy;
use crate::{Error, Result};

/// Top-level engine configuration.
///
/// Loaded from a TOML file; every section falls back to its defaults so a
/// partial file is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: EngineConfig =
            toml::from_str(&content).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is missing
    /// or invalid.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Check ranges and normalize scoring weights in place
    pub fn validate(&mut self) -> Result<()> {
        if self.embedding.dim == 0 {
            return Err(Error::InvalidConfig("embedding.dim must be positive".into()));
        }
        if self.sync.batch_size == 0 {
            return Err(Error::InvalidConfig("sync.batch_size must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.index.compaction_threshold) {
            return Err(Error::InvalidConfig(format!(
                "index.compaction_threshold must be within [0, 1], got {}",
                self.index.compaction_threshold
            )));
        }
        if self.index.hnsw.max_connections < 2 {
            return Err(Error::InvalidConfig(
                "index.hnsw.max_connections must be at least 2".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.normalizer.threshold) {
            return Err(Error::InvalidConfig(format!(
                "normalizer.threshold must be within [0, 1], got {}",
                self.normalizer.threshold
            )));
        }
        self.scoring.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the vector store, cursor and index artifact
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_dim")]
    pub dim: usize,
}

fn default_embedding_dim() -> usize {
    crate::embedder::DEFAULT_EMBEDDING_DIM
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dim: default_embedding_dim(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub strategy: IndexStrategy,
    pub hnsw: HnswParams,
    /// Neighbors pulled from each vector space before scoring
    pub candidate_pool: usize,
    /// Tombstoned fraction of the store that triggers compaction + rebuild
    pub compaction_threshold: f64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            strategy: IndexStrategy::Hnsw,
            hnsw: HnswParams::default(),
            candidate_pool: 100,
            compaction_threshold: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswParams {
    pub max_connections: usize,
    pub max_layers: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    /// Seed for level sampling so builds are reproducible
    pub seed: u64,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            max_connections: 16,
            max_layers: 4,
            ef_construction: 200,
            ef_search: 64,
            seed: 0x5eed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Rows embedded and appended per atomic batch
    pub batch_size: usize,
    /// Delay between cycles in continuous mode
    pub poll_interval_secs: u64,
    /// Attempts per transient fetch/embed failure, including the first
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 256,
            poll_interval_secs: 60,
            max_attempts: 3,
            retry_base_delay_ms: 100,
        }
    }
}

/// Weights of the composite score components.
///
/// Kept as named configuration so ranking can be tuned without touching the
/// scoring code. Validation normalizes them to sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub title: f32,
    pub skills: f32,
    pub location: f32,
    pub experience: f32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            title: 0.5,
            skills: 0.3,
            location: 0.1,
            experience: 0.1,
        }
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f32 {
        self.title + self.skills + self.location + self.experience
    }

    /// Reject negative weights and rescale to sum to 1.0
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        for (name, weight) in [
            ("title", self.title),
            ("skills", self.skills),
            ("location", self.location),
            ("experience", self.experience),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "scoring weight '{}' must be a non-negative number, got {}",
                    name, weight
                )));
            }
        }

        let sum = self.sum();
        if sum <= 0.0 {
            return Err(Error::InvalidConfig("scoring weights sum to zero".into()));
        }

        if (sum - 1.0).abs() > 0.001 {
            self.title /= sum;
            self.skills /= sum;
            self.location /= sum;
            self.experience /= sum;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    /// Minimum normalized edit-distance similarity for two skills to match
    pub skill_match_threshold: f64,
    /// Credit for a job in the same broader region but another city
    pub region_bonus: f32,
    /// Credit for a job in one of the query's preferred locations
    pub preferred_location_bonus: f32,
    /// Years outside the required range at which experience fit reaches 0
    pub experience_tolerance: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            skill_match_threshold: 0.8,
            region_bonus: 0.5,
            preferred_location_bonus: 0.7,
            experience_tolerance: 5.0,
        }
    }
}

impl ScoringConfig {
    pub fn validate(&mut self) -> Result<()> {
        self.weights.validate_and_normalize()?;
        if !(0.0..=1.0).contains(&self.skill_match_threshold) {
            return Err(Error::InvalidConfig(
                "scoring.skill_match_threshold must be within [0, 1]".into(),
            ));
        }
        for (name, bonus) in [
            ("region_bonus", self.region_bonus),
            ("preferred_location_bonus", self.preferred_location_bonus),
        ] {
            if !(0.0..=1.0).contains(&bonus) {
                return Err(Error::InvalidConfig(format!(
                    "scoring.{} must be within [0, 1], got {}",
                    name, bonus
                )));
            }
        }
        if !(self.experience_tolerance > 0.0) {
            return Err(Error::InvalidConfig(
                "scoring.experience_tolerance must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Minimum similarity for a query title to snap to a known title
    pub threshold: f64,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self { threshold: 0.8 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub http_port: u16,
    /// Run the continuous delta sync inside the server process
    pub background_sync: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            background_sync: false,
        }
    }
}
