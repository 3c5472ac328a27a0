//! Persisted progress of delta sync.

use jobmatch_core::{JobId, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::persistence::{read_json, write_json};

/// Which catalog rows have been handled, and at which version.
///
/// Only advanced after the matching embeddings are durably appended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Highest job id ever handled
    #[serde(default)]
    pub high_watermark: Option<JobId>,
    /// Rows embedded into the store
    #[serde(default)]
    pub covered: BTreeMap<JobId, u64>,
    /// Rows with nothing to embed; recorded so they are not retried forever
    #[serde(default)]
    pub skipped: BTreeMap<JobId, u64>,
}

impl SyncCursor {
    /// Load from `path`; a missing file is a fresh cursor
    pub fn load(path: &Path) -> Result<Self> {
        Ok(read_json(path)?.unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }

    pub fn is_covered(&self, job_id: JobId, version: u64) -> bool {
        self.covered.get(&job_id) == Some(&version) || self.skipped.get(&job_id) == Some(&version)
    }

    pub fn record_embedded<I: IntoIterator<Item = (JobId, u64)>>(&mut self, rows: I) {
        for (job_id, version) in rows {
            self.skipped.remove(&job_id);
            self.covered.insert(job_id, version);
            self.bump(job_id);
        }
    }

    pub fn record_skipped<I: IntoIterator<Item = (JobId, u64)>>(&mut self, rows: I) {
        for (job_id, version) in rows {
            self.covered.remove(&job_id);
            self.skipped.insert(job_id, version);
            self.bump(job_id);
        }
    }

    pub fn forget(&mut self, job_ids: &[JobId]) {
        for job_id in job_ids {
            self.covered.remove(job_id);
            self.skipped.remove(job_id);
        }
    }

    fn bump(&mut self, job_id: JobId) {
        self.high_watermark = Some(self.high_watermark.map_or(job_id, |w| w.max(job_id)));
    }

    /// Align with the store's live entries, which are authoritative for
    /// embedded rows. Returns whether anything changed.
    pub fn reconcile(&mut self, store_covered: &BTreeMap<JobId, u64>) -> bool {
        if &self.covered == store_covered {
            return false;
        }
        let recovered = store_covered
            .iter()
            .filter(|(id, version)| self.covered.get(*id) != Some(*version))
            .count();
        let dropped = self
            .covered
            .keys()
            .filter(|id| !store_covered.contains_key(*id))
            .count();
        info!(
            "Reconciled sync cursor with store: {} rows recovered, {} dropped",
            recovered, dropped
        );

        self.covered = store_covered.clone();
        for job_id in store_covered.keys() {
            self.skipped.remove(job_id);
        }
        if let Some(&max) = store_covered.keys().next_back() {
            self.bump(max);
        }
        true
    }
}
