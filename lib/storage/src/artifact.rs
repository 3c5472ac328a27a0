//! On-disk form of the nearest-neighbor structures.
//!
//! The artifact stores only the two ANN structures; entries and tombstones
//! always come from the vector store so the two can never disagree about
//! job metadata.

use jobmatch_core::{
    AnnIndex, BuildKind, Error, Index, IndexBuilder, IndexConfig, Result, StoreSnapshot,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::persistence::{decode, encode, write_atomic};

const ARTIFACT_VERSION: u32 = 1;

#[derive(Serialize)]
struct ArtifactRef<'a> {
    format_version: u32,
    store_generation: u64,
    entry_count: usize,
    title: &'a AnnIndex,
    profile: &'a AnnIndex,
}

/// Persisted title and profile indexes for one store generation
#[derive(Debug, Deserialize)]
pub struct IndexArtifact {
    format_version: u32,
    pub store_generation: u64,
    pub entry_count: usize,
    title: AnnIndex,
    profile: AnnIndex,
}

impl IndexArtifact {
    pub fn save(index: &Index, path: &Path) -> Result<()> {
        let (title, profile) = index.ann_parts();
        let data = encode(&ArtifactRef {
            format_version: ARTIFACT_VERSION,
            store_generation: index.store_generation(),
            entry_count: index.len(),
            title,
            profile,
        })?;
        write_atomic(path, &data)?;
        info!(
            "Saved index artifact ({} entries, generation {}) to {}",
            index.len(),
            index.store_generation(),
            path.display()
        );
        Ok(())
    }

    /// `Ok(None)` when no artifact has been written yet
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let artifact: IndexArtifact = decode(path, &data)?;
        if artifact.format_version != ARTIFACT_VERSION {
            return Err(Error::corrupt(
                path,
                format!("unsupported artifact version {}", artifact.format_version),
            ));
        }
        if artifact.title.len() != artifact.entry_count || artifact.profile.len() != artifact.entry_count {
            return Err(Error::corrupt(path, "index sizes disagree with entry count"));
        }
        Ok(Some(artifact))
    }

    /// Whether the artifact can be extended to cover `snapshot`
    pub fn is_reusable(&self, snapshot: &StoreSnapshot, config: &IndexConfig) -> bool {
        self.store_generation == snapshot.generation
            && self.entry_count <= snapshot.len()
            && self.title.strategy() == config.strategy
            && (self.entry_count == 0 || self.title.dim() == snapshot.dim)
    }

    pub fn into_index(self, snapshot: &StoreSnapshot) -> Result<Index> {
        Index::from_parts(snapshot, self.title, self.profile, self.entry_count)
    }
}

/// Index for `snapshot`, reusing the artifact at `path` when it belongs to
/// the same store generation and rebuilding otherwise.
pub fn load_or_build(path: &Path, snapshot: &StoreSnapshot, config: &IndexConfig) -> (Index, BuildKind) {
    let previous = match IndexArtifact::load(path) {
        Ok(Some(artifact)) if artifact.is_reusable(snapshot, config) => {
            match artifact.into_index(snapshot) {
                Ok(index) => Some(index),
                Err(e) => {
                    warn!("Discarding index artifact {}: {}", path.display(), e);
                    None
                }
            }
        }
        Ok(Some(artifact)) => {
            info!(
                "Index artifact is stale (generation {}, {} entries); rebuilding",
                artifact.store_generation, artifact.entry_count
            );
            None
        }
        Ok(None) => None,
        Err(e) => {
            warn!("Ignoring unreadable index artifact {}: {}", path.display(), e);
            None
        }
    };
    IndexBuilder::new(config).refresh(previous.as_ref(), snapshot)
}
