//! Versioned search index over a store snapshot.
//!
//! An [`Index`] pairs a title-vector and a profile-vector nearest-neighbor
//! structure with the entries they were built from. Once handed to the
//! [`crate::IndexManager`] it is never mutated; incremental insertion
//! produces a new value.

use ahash::AHashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::ann::{AnnIndex, IndexStrategy};
use crate::config::IndexConfig;
use crate::job::{EmbeddingEntry, JobId};
use crate::vector::Vector;
use crate::{Error, Result};

/// Point-in-time view of the vector store that an index is built from
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    /// Bumped whenever the store is replaced wholesale
    pub generation: u64,
    pub dim: usize,
    /// All entries in insertion order; position `i` is the same job in every
    /// parallel array
    pub entries: Vec<Arc<EmbeddingEntry>>,
    pub tombstones: Arc<AHashSet<usize>>,
}

impl StoreSnapshot {
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fraction of stored entries that are tombstoned
    pub fn tombstone_ratio(&self) -> f64 {
        if self.entries.is_empty() {
            0.0
        } else {
            self.tombstones.len() as f64 / self.entries.len() as f64
        }
    }
}

/// One nearest-neighbor hit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub job_id: JobId,
    /// Cosine similarity in [-1, 1]
    pub similarity: f32,
}

#[derive(Debug, Clone)]
pub struct Index {
    version: u64,
    store_generation: u64,
    dim: usize,
    title: AnnIndex,
    profile: AnnIndex,
    entries: Vec<Arc<EmbeddingEntry>>,
    tombstones: Arc<AHashSet<usize>>,
    vocabulary: Arc<Vec<String>>,
}

impl Index {
    /// Full rebuild over every entry of the snapshot
    pub fn build(snapshot: &StoreSnapshot, config: &IndexConfig) -> Self {
        let strategy = config.strategy;
        let title = AnnIndex::build_with(
            strategy,
            snapshot.dim,
            &config.hnsw,
            snapshot.entries.iter().map(|e| &e.title_vector),
        );
        let profile = AnnIndex::build_with(
            strategy,
            snapshot.dim,
            &config.hnsw,
            snapshot.entries.iter().map(|e| &e.profile_vector),
        );
        info!(
            "Built {} index over {} entries (generation {})",
            strategy,
            snapshot.len(),
            snapshot.generation
        );
        Self::assemble(snapshot, title, profile)
    }

    /// Reassemble an index from persisted nearest-neighbor structures.
    ///
    /// The structures must cover a prefix of the snapshot; call
    /// [`Index::insert`] afterwards to cover the tail.
    pub fn from_parts(
        snapshot: &StoreSnapshot,
        title: AnnIndex,
        profile: AnnIndex,
        covered: usize,
    ) -> Result<Self> {
        if title.len() != covered || profile.len() != covered {
            return Err(Error::Storage(format!(
                "index parts cover {}/{} vectors, expected {}",
                title.len(),
                profile.len(),
                covered
            )));
        }
        if covered > snapshot.len() {
            return Err(Error::Storage(format!(
                "index covers {} vectors but the store holds {}",
                covered,
                snapshot.len()
            )));
        }
        if covered > 0 && title.dim() != snapshot.dim {
            return Err(Error::InvalidDimension {
                expected: snapshot.dim,
                actual: title.dim(),
            });
        }
        let prefix = StoreSnapshot {
            generation: snapshot.generation,
            dim: snapshot.dim,
            entries: snapshot.entries[..covered].to_vec(),
            tombstones: snapshot.tombstones.clone(),
        };
        Ok(Self::assemble(&prefix, title, profile))
    }

    fn assemble(snapshot: &StoreSnapshot, title: AnnIndex, profile: AnnIndex) -> Self {
        let vocabulary = live_vocabulary(&snapshot.entries, &snapshot.tombstones);
        Self {
            version: 0,
            store_generation: snapshot.generation,
            dim: snapshot.dim,
            title,
            profile,
            entries: snapshot.entries.clone(),
            tombstones: snapshot.tombstones.clone(),
            vocabulary: Arc::new(vocabulary),
        }
    }

    /// Incremental update: a copy of this index extended with the snapshot's
    /// entries past `self.len()`, carrying the snapshot's tombstones.
    pub fn insert(&self, snapshot: &StoreSnapshot) -> Result<Self> {
        if snapshot.generation != self.store_generation {
            return Err(Error::Storage(format!(
                "store generation changed ({} -> {}); a full rebuild is required",
                self.store_generation, snapshot.generation
            )));
        }
        if snapshot.len() < self.len() {
            return Err(Error::Storage(format!(
                "store shrank from {} to {} entries; a full rebuild is required",
                self.len(),
                snapshot.len()
            )));
        }

        let new_entries = &snapshot.entries[self.len()..];
        let mut title = self.title.clone();
        let mut profile = self.profile.clone();
        for entry in new_entries {
            title.insert(&entry.title_vector);
            profile.insert(&entry.profile_vector);
        }
        debug!(
            "Inserted {} entries into index (now {})",
            new_entries.len(),
            snapshot.len()
        );

        let mut updated = Self::assemble(snapshot, title, profile);
        updated.dim = self.dim;
        Ok(updated)
    }

    /// Top-k live neighbors by title-vector similarity
    pub fn search(&self, query: &Vector, k: usize) -> Vec<Neighbor> {
        self.search_in(&self.title, query, k)
    }

    /// Top-k live neighbors by full-profile similarity
    pub fn search_profile(&self, query: &Vector, k: usize) -> Vec<Neighbor> {
        self.search_in(&self.profile, query, k)
    }

    fn search_in(&self, ann: &AnnIndex, query: &Vector, k: usize) -> Vec<Neighbor> {
        if k == 0 || self.entries.is_empty() {
            return Vec::new();
        }
        // Over-fetch so tombstoned hits do not starve the result
        let fetch = (k + self.tombstones.len()).min(self.entries.len());
        ann.search(query, fetch)
            .into_iter()
            .filter(|(position, _)| !self.tombstones.contains(position))
            .filter_map(|(position, similarity)| {
                self.entries.get(position).map(|entry| Neighbor {
                    position,
                    job_id: entry.job_id,
                    similarity,
                })
            })
            .take(k)
            .collect()
    }

    /// Exact title cosine between the query and a stored entry
    pub fn title_similarity(&self, position: usize, query: &Vector) -> f32 {
        self.entries
            .get(position)
            .map(|entry| entry.title_vector.cosine_similarity(query))
            .unwrap_or(0.0)
    }

    #[inline]
    pub fn entry(&self, position: usize) -> Option<&Arc<EmbeddingEntry>> {
        self.entries.get(position)
    }

    #[inline]
    pub fn is_tombstoned(&self, position: usize) -> bool {
        self.tombstones.contains(&position)
    }

    /// Position of the live entry for a job, if any
    pub fn position_of(&self, job_id: JobId) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .rev()
            .find(|(pos, e)| e.job_id == job_id && !self.tombstones.contains(pos))
            .map(|(pos, _)| pos)
    }

    /// Number of indexed vectors (tombstoned included)
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.entries.len() - self.tombstones.len()
    }

    pub fn tombstone_ratio(&self) -> f64 {
        if self.entries.is_empty() {
            0.0
        } else {
            self.tombstones.len() as f64 / self.entries.len() as f64
        }
    }

    /// Distinct titles of live entries, used for query title correction
    pub fn vocabulary(&self) -> &Arc<Vec<String>> {
        &self.vocabulary
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    #[inline]
    pub fn store_generation(&self) -> u64 {
        self.store_generation
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn strategy(&self) -> IndexStrategy {
        self.title.strategy()
    }

    /// The nearest-neighbor structures, for persistence
    pub fn ann_parts(&self) -> (&AnnIndex, &AnnIndex) {
        (&self.title, &self.profile)
    }
}

fn live_vocabulary(entries: &[Arc<EmbeddingEntry>], tombstones: &AHashSet<usize>) -> Vec<String> {
    let mut seen: AHashSet<String> = AHashSet::new();
    let mut vocabulary = Vec::new();
    for (position, entry) in entries.iter().enumerate() {
        if tombstones.contains(&position) {
            continue;
        }
        let title = entry.metadata.title.trim();
        if title.is_empty() {
            continue;
        }
        if seen.insert(title.to_lowercase()) {
            vocabulary.push(title.to_string());
        }
    }
    vocabulary.sort();
    vocabulary
}

/// How [`IndexBuilder::refresh`] produced its index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildKind {
    /// Full rebuild from the snapshot
    Rebuilt,
    /// Previous index extended with `added` entries
    Extended { added: usize },
}

/// Chooses between incremental insertion and a full rebuild
pub struct IndexBuilder<'a> {
    config: &'a IndexConfig,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(config: &'a IndexConfig) -> Self {
        Self { config }
    }

    /// Bring `previous` up to date with `snapshot`, rebuilding when it
    /// cannot be extended (other generation, other strategy, store shrank).
    pub fn refresh(&self, previous: Option<&Index>, snapshot: &StoreSnapshot) -> (Index, BuildKind) {
        if let Some(previous) = previous {
            let compatible = previous.strategy() == self.config.strategy
                && previous.store_generation() == snapshot.generation
                && previous.len() <= snapshot.len()
                && (previous.is_empty() || previous.dim() == snapshot.dim);
            if compatible {
                let added = snapshot.len() - previous.len();
                if let Ok(index) = previous.insert(snapshot) {
                    return (index, BuildKind::Extended { added });
                }
            }
        }
        (Index::build(snapshot, self.config), BuildKind::Rebuilt)
    }

    /// Whether the tombstoned share of the store calls for compaction
    pub fn needs_compaction(&self, snapshot: &StoreSnapshot) -> bool {
        !snapshot.tombstones.is_empty()
            && snapshot.tombstone_ratio() > self.config.compaction_threshold
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::job::JobRecord;

    pub(crate) fn entry(job_id: JobId, title: &str, title_vec: Vec<f32>) -> Arc<EmbeddingEntry> {
        let job = JobRecord::new(job_id, title);
        let profile = Vector::new(title_vec.iter().rev().copied().collect());
        Arc::new(EmbeddingEntry::new(&job, Vector::new(title_vec), profile))
    }

    pub(crate) fn snapshot(entries: Vec<Arc<EmbeddingEntry>>, tombstones: &[usize]) -> StoreSnapshot {
        StoreSnapshot {
            generation: 1,
            dim: 3,
            entries,
            tombstones: Arc::new(tombstones.iter().copied().collect()),
        }
    }

    fn three_jobs() -> Vec<Arc<EmbeddingEntry>> {
        vec![
            entry(10, "Data Scientist", vec![1.0, 0.0, 0.0]),
            entry(20, "Data Engineer", vec![0.0, 1.0, 0.0]),
            entry(30, "Chef", vec![0.0, 0.0, 1.0]),
        ]
    }

    #[test]
    fn test_search_empty_index() {
        let index = Index::build(&snapshot(Vec::new(), &[]), &IndexConfig::default());
        assert!(index.search(&Vector::new(vec![1.0, 0.0, 0.0]), 5).is_empty());
        assert!(index.vocabulary().is_empty());
    }

    #[test]
    fn test_search_returns_known_ids_and_at_most_k() {
        let snap = snapshot(three_jobs(), &[]);
        let index = Index::build(&snap, &IndexConfig::default());
        let hits = index.search(&Vector::new(vec![0.9, 0.1, 0.0]), 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].job_id, 10);
        for hit in &hits {
            assert!([10, 20, 30].contains(&hit.job_id));
        }
    }

    #[test]
    fn test_tombstoned_entries_are_skipped() {
        let snap = snapshot(three_jobs(), &[0]);
        let index = Index::build(&snap, &IndexConfig::default());
        let hits = index.search(&Vector::new(vec![1.0, 0.0, 0.0]), 3);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.job_id != 10));
        assert_eq!(index.live_count(), 2);
        assert!(!index.vocabulary().contains(&"Data Scientist".to_string()));
    }

    #[test]
    fn test_insert_leaves_original_untouched() {
        let mut jobs = three_jobs();
        let before = Index::build(&snapshot(jobs[..2].to_vec(), &[]), &IndexConfig::default());

        jobs.push(entry(40, "Sous Chef", vec![0.0, 0.1, 1.0]));
        let after = before.insert(&snapshot(jobs, &[])).unwrap();

        assert_eq!(before.len(), 2);
        assert_eq!(after.len(), 4);
        let query = Vector::new(vec![0.0, 0.0, 1.0]);
        assert!(before.search(&query, 4).iter().all(|h| h.job_id != 30 && h.job_id != 40));
        assert_eq!(after.search(&query, 1)[0].job_id, 30);
    }

    #[test]
    fn test_insert_rejects_other_generation() {
        let jobs = three_jobs();
        let index = Index::build(&snapshot(jobs.clone(), &[]), &IndexConfig::default());
        let mut next = snapshot(jobs, &[]);
        next.generation = 2;
        assert!(index.insert(&next).is_err());

        let (rebuilt, kind) = IndexBuilder::new(&IndexConfig::default()).refresh(Some(&index), &next);
        assert_eq!(kind, BuildKind::Rebuilt);
        assert_eq!(rebuilt.store_generation(), 2);
    }

    #[test]
    fn test_refresh_extends_compatible_index() {
        let config = IndexConfig::default();
        let mut jobs = three_jobs();
        let index = Index::build(&snapshot(jobs.clone(), &[]), &config);
        jobs.push(entry(40, "Sous Chef", vec![0.0, 0.1, 1.0]));

        let (next, kind) = IndexBuilder::new(&config).refresh(Some(&index), &snapshot(jobs, &[]));
        assert_eq!(kind, BuildKind::Extended { added: 1 });
        assert_eq!(next.len(), 4);
    }

    #[test]
    fn test_needs_compaction() {
        let config = IndexConfig {
            compaction_threshold: 0.3,
            ..IndexConfig::default()
        };
        let builder = IndexBuilder::new(&config);
        assert!(!builder.needs_compaction(&snapshot(three_jobs(), &[0])));
        assert!(builder.needs_compaction(&snapshot(three_jobs(), &[0, 1])));
    }

    #[test]
    fn test_vocabulary_dedups_case_insensitively() {
        let entries = vec![
            entry(1, "Data Scientist", vec![1.0, 0.0, 0.0]),
            entry(2, "data scientist", vec![1.0, 0.0, 0.0]),
            entry(3, "  ", vec![0.0, 1.0, 0.0]),
        ];
        let index = Index::build(&snapshot(entries, &[]), &IndexConfig::default());
        assert_eq!(index.vocabulary().as_slice(), &["Data Scientist".to_string()]);
    }

    #[test]
    fn test_position_of_prefers_live_entry() {
        let entries = vec![
            entry(1, "Data Scientist", vec![1.0, 0.0, 0.0]),
            entry(1, "Senior Data Scientist", vec![1.0, 0.1, 0.0]),
        ];
        let index = Index::build(&snapshot(entries, &[0]), &IndexConfig::default());
        assert_eq!(index.position_of(1), Some(1));
        assert_eq!(index.position_of(2), None);
    }
}
