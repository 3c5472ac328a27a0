//! Append-only, segment-based vector store.
//!
//! On disk a store directory holds `manifest.json` plus one bincode segment
//! per committed batch. The manifest is the commit point: a segment that is
//! not listed in it does not exist as far as readers are concerned.

use ahash::{AHashMap, AHashSet};
use jobmatch_core::{
    EmbeddingEntry, Error, JobId, JobMetadata, Result, StoreSnapshot, Vector,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::persistence::{decode, encode, read_json, remove_quietly, sha256_hex, write_atomic, write_json};

const MANIFEST_FILE: &str = "manifest.json";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    generation: u64,
    dim: usize,
    next_segment: u64,
    segments: Vec<SegmentMeta>,
    /// Sorted tombstoned positions
    tombstones: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SegmentMeta {
    file: String,
    count: usize,
    sha256: String,
}

/// The four parallel arrays of one committed batch
#[derive(Serialize, Deserialize)]
struct Segment {
    ids: Vec<(JobId, u64)>,
    title_vectors: Vec<Vec<f32>>,
    profile_vectors: Vec<Vec<f32>>,
    metadata: Vec<JobMetadata>,
}

impl Segment {
    fn from_entries(entries: &[Arc<EmbeddingEntry>]) -> Self {
        Self {
            ids: entries.iter().map(|e| (e.job_id, e.version)).collect(),
            title_vectors: entries.iter().map(|e| e.title_vector.as_slice().to_vec()).collect(),
            profile_vectors: entries.iter().map(|e| e.profile_vector.as_slice().to_vec()).collect(),
            metadata: entries.iter().map(|e| e.metadata.clone()).collect(),
        }
    }

    fn into_entries(self, path: &Path, dim: usize) -> Result<Vec<Arc<EmbeddingEntry>>> {
        let n = self.ids.len();
        if self.title_vectors.len() != n || self.profile_vectors.len() != n || self.metadata.len() != n {
            return Err(Error::corrupt(path, "parallel arrays differ in length"));
        }
        self.ids
            .into_iter()
            .zip(self.title_vectors)
            .zip(self.profile_vectors)
            .zip(self.metadata)
            .map(|((((job_id, version), title), profile), metadata)| {
                if title.len() != dim || profile.len() != dim {
                    return Err(Error::corrupt(
                        path,
                        format!("job {} has a vector of the wrong dimension", job_id),
                    ));
                }
                Ok(Arc::new(EmbeddingEntry {
                    job_id,
                    version,
                    title_vector: Vector::new(title),
                    profile_vector: Vector::new(profile),
                    metadata,
                }))
            })
            .collect()
    }
}

/// In-memory mirror of the committed on-disk state
struct StoreState {
    manifest: Manifest,
    entries: Vec<Arc<EmbeddingEntry>>,
    tombstones: Arc<AHashSet<usize>>,
    /// Live job -> (position, version)
    live: AHashMap<JobId, (usize, u64)>,
}

impl StoreState {
    fn build(manifest: Manifest, entries: Vec<Arc<EmbeddingEntry>>) -> Self {
        let tombstones: AHashSet<usize> = manifest.tombstones.iter().copied().collect();
        let mut live = AHashMap::with_capacity(entries.len());
        for (position, entry) in entries.iter().enumerate() {
            if !tombstones.contains(&position) {
                live.insert(entry.job_id, (position, entry.version));
            }
        }
        Self {
            manifest,
            entries,
            tombstones: Arc::new(tombstones),
            live,
        }
    }
}

pub struct VectorStore {
    dir: PathBuf,
    state: RwLock<StoreState>,
}

impl VectorStore {
    /// Open the store in `dir`, creating an empty one of dimension `dim`
    /// when none exists yet.
    pub fn open<P: AsRef<Path>>(dir: P, dim: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let manifest_path = dir.join(MANIFEST_FILE);

        let state = match read_json::<Manifest>(&manifest_path)? {
            Some(manifest) => Self::load_state(&dir, manifest, dim)?,
            None => {
                let manifest = Manifest {
                    format_version: FORMAT_VERSION,
                    generation: 1,
                    dim,
                    next_segment: 1,
                    segments: Vec::new(),
                    tombstones: Vec::new(),
                };
                write_json(&manifest_path, &manifest)?;
                info!("Created empty vector store at {}", dir.display());
                StoreState::build(manifest, Vec::new())
            }
        };

        Ok(Self {
            dir,
            state: RwLock::new(state),
        })
    }

    /// Move an unreadable store aside and start an empty one in its place
    pub fn recreate<P: AsRef<Path>>(dir: P, dim: usize) -> Result<Self> {
        let dir = dir.as_ref();
        if dir.exists() {
            let mut quarantine = dir.as_os_str().to_owned();
            quarantine.push(".corrupt");
            let quarantine = PathBuf::from(quarantine);
            if quarantine.exists() {
                std::fs::remove_dir_all(&quarantine)?;
            }
            std::fs::rename(dir, &quarantine)?;
            warn!("Moved unreadable store to {}", quarantine.display());
        }
        Self::open(dir, dim)
    }

    fn load_state(dir: &Path, manifest: Manifest, dim: usize) -> Result<StoreState> {
        let manifest_path = dir.join(MANIFEST_FILE);
        if manifest.format_version != FORMAT_VERSION {
            return Err(Error::corrupt(
                &manifest_path,
                format!("unsupported format version {}", manifest.format_version),
            ));
        }
        let stored: usize = manifest.segments.iter().map(|s| s.count).sum();
        if stored > 0 && manifest.dim != dim {
            return Err(Error::InvalidDimension {
                expected: dim,
                actual: manifest.dim,
            });
        }

        let mut entries = Vec::with_capacity(stored);
        for meta in &manifest.segments {
            let path = dir.join(&meta.file);
            let data = std::fs::read(&path).map_err(|e| Error::corrupt(&path, e.to_string()))?;
            if sha256_hex(&data) != meta.sha256 {
                return Err(Error::corrupt(&path, "checksum mismatch"));
            }
            let segment: Segment = decode(&path, &data)?;
            if segment.ids.len() != meta.count {
                return Err(Error::corrupt(
                    &path,
                    format!("expected {} entries, found {}", meta.count, segment.ids.len()),
                ));
            }
            entries.extend(segment.into_entries(&path, manifest.dim)?);
        }

        if let Some(&bad) = manifest.tombstones.iter().find(|&&p| p >= entries.len()) {
            return Err(Error::corrupt(
                &manifest_path,
                format!("tombstone {} beyond {} entries", bad, entries.len()),
            ));
        }

        let mut manifest = manifest;
        manifest.dim = dim;
        let state = StoreState::build(manifest, entries);
        let live_total = state.entries.len() - state.tombstones.len();
        if state.live.len() != live_total {
            return Err(Error::corrupt(&manifest_path, "a job has more than one live entry"));
        }
        info!(
            "Loaded vector store from {} ({} entries, {} live, generation {})",
            dir.display(),
            state.entries.len(),
            live_total,
            state.manifest.generation
        );
        Ok(state)
    }

    /// Durably append a batch.
    ///
    /// All-or-nothing: on error neither the files nor the in-memory view
    /// change. An entry carrying a new version of a live job tombstones the
    /// superseded entry in the same commit.
    pub fn append(&self, batch: Vec<EmbeddingEntry>) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.write();
        let dim = state.manifest.dim;

        let mut batch_jobs = AHashSet::with_capacity(batch.len());
        let mut superseded = Vec::new();
        for entry in &batch {
            for vector in [&entry.title_vector, &entry.profile_vector] {
                if vector.dim() != dim {
                    return Err(Error::InvalidDimension {
                        expected: dim,
                        actual: vector.dim(),
                    });
                }
            }
            let live_version = state.live.get(&entry.job_id).map(|&(_, version)| version);
            if live_version == Some(entry.version) || !batch_jobs.insert(entry.job_id) {
                return Err(Error::DuplicateEntry {
                    job_id: entry.job_id,
                    version: entry.version,
                });
            }
            if let Some(&(position, _)) = state.live.get(&entry.job_id) {
                superseded.push(position);
            }
        }

        let batch: Vec<Arc<EmbeddingEntry>> = batch.into_iter().map(Arc::new).collect();
        let mut manifest = state.manifest.clone();
        let meta = self.write_segment(&mut manifest, &batch)?;
        let segment_path = self.dir.join(&meta.file);
        manifest.segments.push(meta);
        manifest.tombstones.extend(superseded.iter().copied());
        manifest.tombstones.sort_unstable();

        if let Err(e) = write_json(&self.manifest_path(), &manifest) {
            remove_quietly(&segment_path);
            return Err(e);
        }

        // Committed; mirror it in memory
        let first = state.entries.len();
        let mut tombstones = (*state.tombstones).clone();
        for position in &superseded {
            tombstones.insert(*position);
        }
        for (offset, entry) in batch.iter().enumerate() {
            state.live.insert(entry.job_id, (first + offset, entry.version));
        }
        state.entries.extend(batch);
        state.tombstones = Arc::new(tombstones);
        state.manifest = manifest;

        debug!(
            "Appended {} entries ({} superseded), store now holds {}",
            state.entries.len() - first,
            superseded.len(),
            state.entries.len()
        );
        Ok(state.entries.len() - first)
    }

    /// Mark the live entries of `job_ids` deleted. Unknown ids are ignored.
    pub fn tombstone(&self, job_ids: &[JobId]) -> Result<usize> {
        let mut state = self.state.write();
        let mut positions: Vec<usize> = job_ids
            .iter()
            .filter_map(|id| state.live.get(id).map(|&(position, _)| position))
            .collect();
        positions.sort_unstable();
        positions.dedup();
        if positions.is_empty() {
            return Ok(0);
        }

        let mut manifest = state.manifest.clone();
        manifest.tombstones.extend(positions.iter().copied());
        manifest.tombstones.sort_unstable();
        manifest.tombstones.dedup();
        write_json(&self.manifest_path(), &manifest)?;

        let mut tombstones = (*state.tombstones).clone();
        for position in &positions {
            tombstones.insert(*position);
        }
        for id in job_ids {
            state.live.remove(id);
        }
        state.tombstones = Arc::new(tombstones);
        state.manifest = manifest;
        info!("Tombstoned {} entries", positions.len());
        Ok(positions.len())
    }

    /// Rewrite the live entries into a single segment under a new generation
    pub fn compact(&self) -> Result<()> {
        let live: Vec<Arc<EmbeddingEntry>> = {
            let state = self.state.read();
            state
                .entries
                .iter()
                .enumerate()
                .filter(|(position, _)| !state.tombstones.contains(position))
                .map(|(_, entry)| entry.clone())
                .collect()
        };
        self.replace_with(live)
    }

    /// Replace the whole store (full rebuild)
    pub fn replace_all(&self, entries: Vec<EmbeddingEntry>) -> Result<()> {
        let dim = self.dim();
        let mut seen = AHashSet::with_capacity(entries.len());
        for entry in &entries {
            if entry.title_vector.dim() != dim || entry.profile_vector.dim() != dim {
                return Err(Error::InvalidDimension {
                    expected: dim,
                    actual: entry.dim(),
                });
            }
            if !seen.insert(entry.job_id) {
                return Err(Error::DuplicateEntry {
                    job_id: entry.job_id,
                    version: entry.version,
                });
            }
        }
        self.replace_with(entries.into_iter().map(Arc::new).collect())
    }

    fn replace_with(&self, entries: Vec<Arc<EmbeddingEntry>>) -> Result<()> {
        let mut state = self.state.write();
        let old_files: Vec<String> = state.manifest.segments.iter().map(|s| s.file.clone()).collect();

        let mut manifest = state.manifest.clone();
        manifest.generation += 1;
        manifest.segments.clear();
        manifest.tombstones.clear();
        if !entries.is_empty() {
            let meta = self.write_segment(&mut manifest, &entries)?;
            manifest.segments.push(meta);
        }
        if let Err(e) = write_json(&self.manifest_path(), &manifest) {
            for meta in &manifest.segments {
                remove_quietly(&self.dir.join(&meta.file));
            }
            return Err(e);
        }

        for file in old_files {
            remove_quietly(&self.dir.join(file));
        }
        info!(
            "Rewrote vector store: {} entries, generation {}",
            entries.len(),
            manifest.generation
        );
        *state = StoreState::build(manifest, entries);
        Ok(())
    }

    fn write_segment(&self, manifest: &mut Manifest, entries: &[Arc<EmbeddingEntry>]) -> Result<SegmentMeta> {
        let file = format!("segment-{:06}.bin", manifest.next_segment);
        manifest.next_segment += 1;
        let data = encode(&Segment::from_entries(entries))?;
        let path = self.dir.join(&file);
        if let Err(e) = write_atomic(&path, &data) {
            remove_quietly(&path);
            return Err(e);
        }
        Ok(SegmentMeta {
            file,
            count: entries.len(),
            sha256: sha256_hex(&data),
        })
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    /// All entries in insertion order, tombstoned included
    pub fn load(&self) -> Vec<Arc<EmbeddingEntry>> {
        self.state.read().entries.clone()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.read();
        StoreSnapshot {
            generation: state.manifest.generation,
            dim: state.manifest.dim,
            entries: state.entries.clone(),
            tombstones: state.tombstones.clone(),
        }
    }

    /// Number of stored entries, tombstoned included
    pub fn count(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn live_count(&self) -> usize {
        self.state.read().live.len()
    }

    pub fn generation(&self) -> u64 {
        self.state.read().manifest.generation
    }

    pub fn dim(&self) -> usize {
        self.state.read().manifest.dim
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Live jobs with the version currently embedded
    pub fn covered(&self) -> BTreeMap<JobId, u64> {
        self.state
            .read()
            .live
            .iter()
            .map(|(&id, &(_, version))| (id, version))
            .collect()
    }

    /// Whether `version` of the job is live in the store
    pub fn contains(&self, job_id: JobId, version: u64) -> bool {
        self.state
            .read()
            .live
            .get(&job_id)
            .map_or(false, |&(_, live)| live == version)
    }

    pub fn live_version(&self, job_id: JobId) -> Option<u64> {
        self.state.read().live.get(&job_id).map(|&(_, version)| version)
    }

    pub fn tombstone_ratio(&self) -> f64 {
        let state = self.state.read();
        if state.entries.is_empty() {
            0.0
        } else {
            state.tombstones.len() as f64 / state.entries.len() as f64
        }
    }
}
