//! Delta sync: embed only the catalog rows the store does not cover yet.

use jobmatch_core::{
    BuildKind, Catalog, CatalogSnapshot, Embedder, EmbeddingEntry, EngineConfig, Error, Index,
    IndexBuilder, IndexConfig, JobId, JobRecord, Result, SyncConfig,
};
use ahash::AHashSet;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::artifact::{load_or_build, IndexArtifact};
use crate::cursor::SyncCursor;
use crate::persistence::{remove_quietly, WriterLock};
use crate::store::VectorStore;

pub const STORE_DIR: &str = "store";
pub const CURSOR_FILE: &str = "cursor.json";
pub const INDEX_FILE: &str = "index.bin";
pub const LOCK_FILE: &str = "writer.lock";

/// How a sync pass ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum SyncOutcome {
    Completed,
    /// Stopped at a batch boundary on request
    Cancelled,
    /// An infrastructure failure stopped the pass; durable state is as of
    /// the last committed batch
    Aborted(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub added_count: usize,
    pub skipped_count: usize,
    pub tombstoned_count: usize,
    pub failed_ids: Vec<JobId>,
    pub outcome: SyncOutcome,
}

impl Default for SyncReport {
    fn default() -> Self {
        Self {
            added_count: 0,
            skipped_count: 0,
            tombstoned_count: 0,
            failed_ids: Vec::new(),
            outcome: SyncOutcome::Completed,
        }
    }
}

impl SyncReport {
    /// Whether the pass changed the store
    pub fn changed_store(&self) -> bool {
        self.added_count > 0 || self.tombstoned_count > 0
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == SyncOutcome::Completed
    }

    pub(crate) fn absorb(&mut self, batch: BatchOutcome) {
        self.added_count += batch.added;
        self.skipped_count += batch.skipped;
        self.tombstoned_count += batch.tombstoned;
        self.failed_ids.extend(batch.failed_ids);
        if let Some(reason) = batch.abort {
            self.outcome = SyncOutcome::Aborted(reason);
        }
    }
}

/// Work derived from one catalog snapshot
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    /// Rows to embed, ascending by id
    pub pending: Vec<(JobId, u64)>,
    /// Stored jobs no longer in the catalog
    pub removed: Vec<JobId>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.removed.is_empty()
    }

    pub fn batches(&self, batch_size: usize) -> impl Iterator<Item = &[(JobId, u64)]> {
        self.pending.chunks(batch_size.max(1))
    }
}

/// Result of one atomic batch
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub added: usize,
    pub skipped: usize,
    /// Live entries retired because their row now has nothing to embed
    pub tombstoned: usize,
    pub failed_ids: Vec<JobId>,
    /// Set when the batch hit an infrastructure failure
    pub abort: Option<String>,
}

/// Single writer of the vector store, the sync cursor and the index artifact
#[derive(Clone)]
pub struct DeltaSync {
    catalog: Arc<dyn Catalog>,
    embedder: Arc<dyn Embedder>,
    store: Arc<VectorStore>,
    cursor: Arc<Mutex<SyncCursor>>,
    cursor_path: PathBuf,
    artifact_path: PathBuf,
    config: SyncConfig,
    index_config: IndexConfig,
    _lock: Arc<WriterLock>,
}

impl DeltaSync {
    /// Open the writer state under `data_dir`.
    ///
    /// An unreadable store is moved aside and rebuilt from the catalog; the
    /// cursor is reconciled with whatever the store durably holds. Fails
    /// while another writer holds the directory.
    pub fn open(
        data_dir: &Path,
        config: &EngineConfig,
        catalog: Arc<dyn Catalog>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        if embedder.dim() != config.embedding.dim {
            return Err(Error::InvalidDimension {
                expected: config.embedding.dim,
                actual: embedder.dim(),
            });
        }
        std::fs::create_dir_all(data_dir)?;
        let lock = WriterLock::acquire(&data_dir.join(LOCK_FILE))?;
        let store_dir = data_dir.join(STORE_DIR);
        let cursor_path = data_dir.join(CURSOR_FILE);

        let store = match VectorStore::open(&store_dir, config.embedding.dim) {
            Ok(store) => store,
            Err(e @ Error::CorruptArtifact { .. }) => {
                error!("{}; rebuilding the store from the catalog", e);
                // The artifact indexes the old store and must not be reused
                remove_quietly(&data_dir.join(INDEX_FILE));
                VectorStore::recreate(&store_dir, config.embedding.dim)?
            }
            Err(e) => return Err(e),
        };

        let mut cursor = match SyncCursor::load(&cursor_path) {
            Ok(cursor) => cursor,
            Err(e @ Error::CorruptArtifact { .. }) => {
                warn!("{}; starting from a fresh cursor", e);
                SyncCursor::default()
            }
            Err(e) => return Err(e),
        };
        if cursor.reconcile(&store.covered()) {
            cursor.save(&cursor_path)?;
        }

        Ok(Self {
            catalog,
            embedder,
            store: Arc::new(store),
            cursor: Arc::new(Mutex::new(cursor)),
            cursor_path,
            artifact_path: data_dir.join(INDEX_FILE),
            config: config.sync.clone(),
            index_config: config.index.clone(),
            _lock: Arc::new(lock),
        })
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    pub fn cursor(&self) -> SyncCursor {
        self.cursor.lock().clone()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Capture the catalog's id/version set, retrying transient failures
    pub fn capture(&self) -> Result<CatalogSnapshot> {
        self.with_retry("list catalog", || CatalogSnapshot::capture(self.catalog.as_ref()))
    }

    /// One complete single-shot pass: capture, sync, refresh the artifact
    pub fn run_once(&self) -> Result<SyncReport> {
        let snapshot = self.capture()?;
        let report = self.sync(&snapshot);
        if report.changed_store() {
            self.refresh_index()?;
        }
        Ok(report)
    }

    /// Bring the store up to date with `snapshot`
    pub fn sync(&self, snapshot: &CatalogSnapshot) -> SyncReport {
        self.sync_until(snapshot, &CancellationToken::new())
    }

    /// As [`DeltaSync::sync`], stopping at the next batch boundary once
    /// `cancel` fires.
    pub fn sync_until(&self, snapshot: &CatalogSnapshot, cancel: &CancellationToken) -> SyncReport {
        let plan = self.plan(snapshot);
        let mut report = SyncReport::default();
        if plan.is_empty() {
            debug!("Catalog and store agree; nothing to sync");
            return report;
        }

        match self.apply_removals(&plan) {
            Ok(count) => report.tombstoned_count = count,
            Err(e) => {
                report.outcome = SyncOutcome::Aborted(e.to_string());
                return report;
            }
        }

        for batch in plan.batches(self.config.batch_size) {
            if cancel.is_cancelled() {
                info!("Sync cancelled at a batch boundary");
                report.outcome = SyncOutcome::Cancelled;
                break;
            }
            report.absorb(self.process_batch(batch));
            if !report.is_completed() {
                break;
            }
        }

        self.log_report(&report);
        report
    }

    /// Rows to embed and jobs to tombstone for `snapshot`
    pub fn plan(&self, snapshot: &CatalogSnapshot) -> SyncPlan {
        let cursor = self.cursor.lock();
        let pending = snapshot
            .iter()
            .filter(|&(id, version)| !cursor.is_covered(id, version))
            .collect();
        let mut removed: Vec<JobId> = cursor
            .covered
            .keys()
            .chain(cursor.skipped.keys())
            .copied()
            .filter(|id| !snapshot.contains(*id))
            .collect();
        removed.sort_unstable();
        removed.dedup();
        SyncPlan { pending, removed }
    }

    /// Tombstone jobs that left the catalog
    pub fn apply_removals(&self, plan: &SyncPlan) -> Result<usize> {
        if plan.removed.is_empty() {
            return Ok(0);
        }
        let count = self.store.tombstone(&plan.removed)?;
        let mut cursor = self.cursor.lock();
        cursor.forget(&plan.removed);
        cursor.save(&self.cursor_path)?;
        Ok(count)
    }

    /// Fetch, embed and atomically append one batch, then advance the cursor.
    ///
    /// Rows with nothing to embed, and rows the catalog no longer returns,
    /// are recorded as skipped at their listed version. Any older live entry
    /// of such a job is tombstoned.
    pub fn process_batch(&self, batch: &[(JobId, u64)]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let ids: Vec<JobId> = batch.iter().map(|&(id, _)| id).collect();

        let rows = match self.with_retry("fetch rows", || self.catalog.fetch(&ids)) {
            Ok(rows) => rows,
            Err(e) if e.is_transient() => {
                warn!("Giving up on {} rows after retries: {}", ids.len(), e);
                outcome.failed_ids = ids;
                return outcome;
            }
            Err(e) => {
                outcome.failed_ids = ids;
                outcome.abort = Some(e.to_string());
                return outcome;
            }
        };

        let fetched: AHashSet<JobId> = rows.iter().map(|job| job.job_id).collect();
        let mut skipped_rows: Vec<(JobId, u64)> = batch
            .iter()
            .filter(|(id, _)| !fetched.contains(id))
            .copied()
            .collect();
        let mut entries = Vec::with_capacity(rows.len());
        let mut already_live = Vec::new();
        for job in rows {
            if self.store.contains(job.job_id, job.version) {
                already_live.push((job.job_id, job.version));
                continue;
            }
            if !job.has_embeddable_text() {
                skipped_rows.push((job.job_id, job.version));
                continue;
            }
            match self.embed(&job) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!("Failed to embed job {}: {}", job.job_id, e);
                    outcome.failed_ids.push(job.job_id);
                }
            }
        }

        let stale: Vec<JobId> = skipped_rows
            .iter()
            .filter(|&&(id, version)| self.store.live_version(id).is_some_and(|live| live != version))
            .map(|&(id, _)| id)
            .collect();

        let embedded: Vec<(JobId, u64)> = entries.iter().map(|e| (e.job_id, e.version)).collect();
        if let Err(e) = self.store.append(entries) {
            error!("Batch append failed, cursor not advanced: {}", e);
            outcome.failed_ids.extend(embedded.iter().map(|&(id, _)| id));
            outcome.abort = Some(e.to_string());
            return outcome;
        }
        outcome.added = embedded.len();

        let mut cursor = self.cursor.lock();
        cursor.record_embedded(embedded.into_iter().chain(already_live));
        match self.store.tombstone(&stale) {
            Ok(count) => {
                outcome.tombstoned = count;
                outcome.skipped = skipped_rows.len();
                cursor.record_skipped(skipped_rows);
            }
            Err(e) => {
                error!("Failed to retire stale entries, skipped rows stay pending: {}", e);
                outcome.abort = Some(e.to_string());
            }
        }
        if let Err(e) = cursor.save(&self.cursor_path) {
            // The store is ahead of the cursor; reconciliation on the next
            // open recovers it
            error!("Failed to persist sync cursor: {}", e);
            outcome.abort = Some(e.to_string());
        }
        outcome
    }

    fn embed(&self, job: &JobRecord) -> Result<EmbeddingEntry> {
        let title = self.with_retry("embed title", || self.embedder.embed(&job.title))?;
        let profile_text = job.profile_text();
        let profile = self.with_retry("embed profile", || self.embedder.embed(&profile_text))?;
        Ok(EmbeddingEntry::new(job, title, profile))
    }

    /// Bring the persisted index artifact up to date with the store,
    /// compacting first when too much of the store is tombstoned.
    pub fn refresh_index(&self) -> Result<BuildKind> {
        let builder = IndexBuilder::new(&self.index_config);
        if builder.needs_compaction(&self.store.snapshot()) {
            info!(
                "Tombstone ratio {:.2} exceeds {:.2}; compacting store",
                self.store.tombstone_ratio(),
                self.index_config.compaction_threshold
            );
            self.store.compact()?;
        }
        let snapshot = self.store.snapshot();
        let (index, kind) = load_or_build(&self.artifact_path, &snapshot, &self.index_config);
        IndexArtifact::save(&index, &self.artifact_path)?;
        Ok(kind)
    }

    /// Re-embed the whole catalog into a new store generation and build the
    /// index artifact from scratch.
    ///
    /// Unlike [`DeltaSync::sync`], fetch failures abort: the store is only
    /// replaced once every batch has been fetched.
    pub fn rebuild(&self) -> Result<SyncReport> {
        let snapshot = self.capture()?;
        let pending: Vec<(JobId, u64)> = snapshot.iter().collect();
        info!("Full rebuild of {} catalog rows", pending.len());

        let mut report = SyncReport::default();
        let mut entries = Vec::with_capacity(pending.len());
        let mut skipped_rows = Vec::new();
        for batch in pending.chunks(self.config.batch_size.max(1)) {
            let ids: Vec<JobId> = batch.iter().map(|&(id, _)| id).collect();
            let rows = self.with_retry("fetch rows", || self.catalog.fetch(&ids))?;
            let fetched: AHashSet<JobId> = rows.iter().map(|job| job.job_id).collect();
            skipped_rows.extend(batch.iter().filter(|(id, _)| !fetched.contains(id)).copied());
            for job in rows {
                if !job.has_embeddable_text() {
                    skipped_rows.push((job.job_id, job.version));
                    continue;
                }
                match self.embed(&job) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        warn!("Failed to embed job {}: {}", job.job_id, e);
                        report.failed_ids.push(job.job_id);
                    }
                }
            }
        }

        let embedded: Vec<(JobId, u64)> = entries.iter().map(|e| (e.job_id, e.version)).collect();
        report.added_count = embedded.len();
        report.skipped_count += skipped_rows.len();
        self.store.replace_all(entries)?;

        {
            let mut cursor = self.cursor.lock();
            *cursor = SyncCursor::default();
            cursor.record_embedded(embedded);
            cursor.record_skipped(skipped_rows);
            cursor.save(&self.cursor_path)?;
        }

        let index = Index::build(&self.store.snapshot(), &self.index_config);
        IndexArtifact::save(&index, &self.artifact_path)?;
        self.log_report(&report);
        Ok(report)
    }

    /// Run `op`, retrying `TransientFetch` with exponential backoff
    fn with_retry<T>(&self, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt: u32 = 1;
        loop {
            match op() {
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    let delay = self.retry_backoff(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        what, attempt, self.config.max_attempts, e, delay
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn retry_backoff(&self, attempt: u32) -> Duration {
        let capped = attempt.saturating_sub(1).min(6);
        Duration::from_millis(self.config.retry_base_delay_ms.saturating_mul(1 << capped))
    }

    fn log_report(&self, report: &SyncReport) {
        match &report.outcome {
            SyncOutcome::Aborted(reason) => error!(
                "Sync aborted after adding {} entries: {}",
                report.added_count, reason
            ),
            _ => info!(
                "Sync pass: {} added, {} skipped, {} tombstoned, {} failed ({} stored)",
                report.added_count,
                report.skipped_count,
                report.tombstoned_count,
                report.failed_ids.len(),
                self.store.count()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobmatch_core::{HashingEmbedder, InMemoryCatalog, Location, Vector};
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DIM: usize = 32;

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.embedding.dim = DIM;
        config.sync.batch_size = 2;
        config.sync.retry_base_delay_ms = 1;
        config
    }

    fn job(id: JobId, title: &str) -> JobRecord {
        JobRecord::new(id, title)
            .with_skills(["python"])
            .with_location(Location::new("KA", "Bangalore"))
    }

    fn open(dir: &Path, catalog: Arc<dyn Catalog>) -> DeltaSync {
        DeltaSync::open(dir, &config(), catalog, Arc::new(HashingEmbedder::new(DIM))).unwrap()
    }

    /// Catalog whose first `failures` fetches report a transient error
    struct FlakyCatalog {
        inner: InMemoryCatalog,
        failures: AtomicUsize,
    }

    impl Catalog for FlakyCatalog {
        fn list_ids(&self) -> Result<BTreeSet<JobId>> {
            self.inner.list_ids()
        }

        fn fetch(&self, ids: &[JobId]) -> Result<Vec<JobRecord>> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::TransientFetch("connection reset".into()));
            }
            self.inner.fetch(ids)
        }
    }

    /// Catalog that lists a job but never returns it from `fetch`
    struct VanishingCatalog {
        inner: InMemoryCatalog,
        hidden: JobId,
    }

    impl Catalog for VanishingCatalog {
        fn list_ids(&self) -> Result<BTreeSet<JobId>> {
            self.inner.list_ids()
        }

        fn fetch(&self, ids: &[JobId]) -> Result<Vec<JobRecord>> {
            let rows = self.inner.fetch(ids)?;
            Ok(rows.into_iter().filter(|job| job.job_id != self.hidden).collect())
        }
    }

    /// Embedder that refuses one exact text
    struct PickyEmbedder {
        inner: HashingEmbedder,
        refuse: String,
    }

    impl Embedder for PickyEmbedder {
        fn dim(&self) -> usize {
            self.inner.dim()
        }

        fn embed(&self, text: &str) -> Result<Vector> {
            if text == self.refuse {
                return Err(Error::Storage("model rejected input".into()));
            }
            self.inner.embed(text)
        }
    }

    #[test]
    fn test_batches_grow_count_and_cover_ids() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(InMemoryCatalog::with_jobs([
            job(1, "Data Scientist"),
            job(2, "Data Engineer"),
            job(3, "Chef"),
        ]));
        let sync = open(dir.path(), catalog.clone());

        let report = sync.run_once().unwrap();
        assert_eq!(report.added_count, 3);
        assert!(report.failed_ids.is_empty());
        assert_eq!(report.outcome, SyncOutcome::Completed);
        assert_eq!(sync.store().count(), 3);
        let cursor = sync.cursor();
        assert_eq!(cursor.high_watermark, Some(3));
        assert!((1..=3).all(|id| cursor.is_covered(id, 0)));
        assert!(dir.path().join(INDEX_FILE).exists());
    }

    #[test]
    fn test_second_sync_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(InMemoryCatalog::with_jobs([job(1, "Chef"), job(2, "Baker")]));
        let sync = open(dir.path(), catalog.clone());
        sync.run_once().unwrap();

        let report = sync.run_once().unwrap();
        assert_eq!(report, SyncReport::default());
        assert_eq!(sync.store().count(), 2);

        // Reopening does not re-embed either
        drop(sync);
        let reopened = open(dir.path(), catalog);
        assert_eq!(reopened.run_once().unwrap().added_count, 0);
    }

    #[test]
    fn test_blank_rows_are_skipped_once() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(InMemoryCatalog::with_jobs([job(1, "Chef"), JobRecord::new(2, "  ")]));
        let sync = open(dir.path(), catalog);

        let report = sync.run_once().unwrap();
        assert_eq!(report.added_count, 1);
        assert_eq!(report.skipped_count, 1);
        assert_eq!(sync.run_once().unwrap().skipped_count, 0);
    }

    #[test]
    fn test_edited_row_is_reembedded_and_old_entry_tombstoned() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(InMemoryCatalog::with_jobs([job(1, "Chef"), job(2, "Baker")]));
        let sync = open(dir.path(), catalog.clone());
        sync.run_once().unwrap();

        catalog.upsert(job(1, "Head Chef").with_version(1));
        let report = sync.sync(&sync.capture().unwrap());
        assert_eq!(report.added_count, 1);
        assert_eq!(sync.store().count(), 3);
        assert_eq!(sync.store().live_count(), 2);
        assert_eq!(sync.store().covered(), BTreeMap::from([(1, 1), (2, 0)]));
    }

    #[test]
    fn test_row_edited_to_blank_retires_old_entry() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(InMemoryCatalog::with_jobs([job(1, "Pastry Chef"), job(2, "Baker")]));
        let sync = open(dir.path(), catalog.clone());
        sync.run_once().unwrap();

        catalog.upsert(JobRecord::new(1, "  ").with_version(1));
        let report = sync.run_once().unwrap();
        assert_eq!(report.added_count, 0);
        assert_eq!(report.skipped_count, 1);
        assert_eq!(report.tombstoned_count, 1);
        assert!(!sync.store().contains(1, 0));
        assert_eq!(sync.store().covered(), BTreeMap::from([(2, 0)]));
        assert!(sync.cursor().is_covered(1, 1));

        let (index, _) = load_or_build(
            &dir.path().join(INDEX_FILE),
            &sync.store().snapshot(),
            &config().index,
        );
        assert_eq!(index.live_count(), 1);
        assert_eq!(index.vocabulary().len(), 1);

        // Reconciliation on reopen must not resurrect the old version
        drop(sync);
        let reopened = open(dir.path(), catalog);
        assert!(reopened.cursor().is_covered(1, 1));
        assert_eq!(reopened.run_once().unwrap(), SyncReport::default());
    }

    #[test]
    fn test_row_missing_from_fetch_is_recorded_once() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(VanishingCatalog {
            inner: InMemoryCatalog::with_jobs([job(1, "Chef"), job(2, "Baker")]),
            hidden: 2,
        });
        let sync = open(dir.path(), catalog);

        let report = sync.run_once().unwrap();
        assert_eq!(report.added_count, 1);
        assert_eq!(report.skipped_count, 1);
        assert!(sync.cursor().is_covered(2, 0));
        assert_eq!(sync.run_once().unwrap(), SyncReport::default());
    }

    #[test]
    fn test_second_writer_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(InMemoryCatalog::with_jobs([job(1, "Chef")]));
        let sync = open(dir.path(), catalog.clone());
        let second = DeltaSync::open(
            dir.path(),
            &config(),
            catalog.clone(),
            Arc::new(HashingEmbedder::new(DIM)),
        );
        assert!(matches!(second, Err(Error::Storage(_))));

        // Clones share the claim; it is released with the last one
        let clone = sync.clone();
        drop(sync);
        assert!(dir.path().join(LOCK_FILE).exists());
        drop(clone);
        assert!(!dir.path().join(LOCK_FILE).exists());
        open(dir.path(), catalog);
    }

    #[test]
    fn test_deleted_row_is_tombstoned() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(InMemoryCatalog::with_jobs([job(1, "Chef"), job(2, "Baker")]));
        let sync = open(dir.path(), catalog.clone());
        sync.run_once().unwrap();

        catalog.remove(2);
        let report = sync.run_once().unwrap();
        assert_eq!(report.tombstoned_count, 1);
        assert_eq!(sync.store().live_count(), 1);
        assert!(!sync.cursor().is_covered(2, 0));
    }

    #[test]
    fn test_returning_row_is_embedded_again() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(InMemoryCatalog::with_jobs([job(1, "Chef"), job(2, "Baker")]));
        let sync = open(dir.path(), catalog.clone());
        sync.run_once().unwrap();

        catalog.remove(2);
        sync.run_once().unwrap();
        catalog.upsert(job(2, "Baker"));
        let report = sync.run_once().unwrap();
        assert_eq!(report.added_count, 1);
        assert!(sync.store().contains(2, 0));
        assert_eq!(sync.store().live_count(), 2);
    }

    #[test]
    fn test_compaction_after_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let jobs: Vec<JobRecord> = (1..=10).map(|id| job(id, &format!("Role {}", id))).collect();
        let catalog = Arc::new(InMemoryCatalog::with_jobs(jobs));
        let sync = open(dir.path(), catalog.clone());
        sync.run_once().unwrap();
        let generation = sync.store().generation();

        for id in 1..=3 {
            catalog.remove(id);
        }
        sync.run_once().unwrap();
        assert_eq!(sync.store().generation(), generation + 1);
        assert_eq!(sync.store().count(), 7);
        assert_eq!(sync.store().tombstone_ratio(), 0.0);
    }

    #[test]
    fn test_transient_fetch_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(FlakyCatalog {
            inner: InMemoryCatalog::with_jobs([job(1, "Chef")]),
            failures: AtomicUsize::new(2),
        });
        let sync = open(dir.path(), catalog);
        let report = sync.run_once().unwrap();
        assert_eq!(report.added_count, 1);
        assert!(report.failed_ids.is_empty());
    }

    #[test]
    fn test_exhausted_retries_fail_items_but_continue() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(FlakyCatalog {
            inner: InMemoryCatalog::with_jobs([job(1, "Chef"), job(2, "Baker"), job(3, "Waiter")]),
            failures: AtomicUsize::new(3),
        });
        let sync = open(dir.path(), catalog);
        let report = sync.run_once().unwrap();

        // First batch (ids 1, 2) exhausts its attempts; the second succeeds
        assert_eq!(report.failed_ids, vec![1, 2]);
        assert_eq!(report.added_count, 1);
        assert_eq!(report.outcome, SyncOutcome::Completed);

        let retry = sync.run_once().unwrap();
        assert_eq!(retry.added_count, 2);
    }

    #[test]
    fn test_embed_failure_is_per_item() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(InMemoryCatalog::with_jobs([job(1, "Chef"), job(2, "Baker")]));
        let embedder = Arc::new(PickyEmbedder {
            inner: HashingEmbedder::new(DIM),
            refuse: "Baker".into(),
        });
        let sync = DeltaSync::open(dir.path(), &config(), catalog, embedder).unwrap();
        let report = sync.run_once().unwrap();
        assert_eq!(report.added_count, 1);
        assert_eq!(report.failed_ids, vec![2]);
        assert!(!sync.cursor().is_covered(2, 0));
    }

    #[test]
    fn test_failed_append_does_not_advance_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(InMemoryCatalog::with_jobs([job(1, "Chef")]));
        let sync = open(dir.path(), catalog.clone());
        sync.run_once().unwrap();

        let manifest = dir.path().join(STORE_DIR).join("manifest.json");
        std::fs::remove_file(&manifest).unwrap();
        std::fs::create_dir(&manifest).unwrap();
        std::fs::write(manifest.join("blocker"), b"x").unwrap();

        catalog.upsert(job(2, "Baker"));
        catalog.upsert(job(3, "Waiter"));
        let report = sync.sync(&sync.capture().unwrap());
        assert!(matches!(report.outcome, SyncOutcome::Aborted(_)));
        assert_eq!(report.failed_ids, vec![2, 3]);
        assert_eq!(sync.store().count(), 1);
        assert!(!sync.cursor().is_covered(2, 0));
    }

    #[test]
    fn test_cancelled_before_first_batch() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(InMemoryCatalog::with_jobs([job(1, "Chef"), job(2, "Baker")]));
        let sync = open(dir.path(), catalog);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = sync.sync_until(&sync.capture().unwrap(), &cancel);
        assert_eq!(report.outcome, SyncOutcome::Cancelled);
        assert_eq!(sync.store().count(), 0);
    }

    #[test]
    fn test_reopen_reconciles_cursor_with_store() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(InMemoryCatalog::with_jobs([job(1, "Chef"), job(2, "Baker")]));
        {
            let sync = open(dir.path(), catalog.clone());
            sync.run_once().unwrap();
        }
        // Simulate a crash between append and cursor write
        std::fs::write(dir.path().join(CURSOR_FILE), b"{}").unwrap();

        let sync = open(dir.path(), catalog);
        assert!(sync.cursor().is_covered(1, 0));
        assert_eq!(sync.run_once().unwrap().added_count, 0);
        assert_eq!(sync.store().count(), 2);
    }

    #[test]
    fn test_corrupt_store_is_rebuilt_from_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(InMemoryCatalog::with_jobs([job(1, "Chef"), job(2, "Baker")]));
        open(dir.path(), catalog.clone()).run_once().unwrap();

        let segment = dir.path().join(STORE_DIR).join("segment-000001.bin");
        std::fs::write(&segment, b"garbage").unwrap();

        let sync = open(dir.path(), catalog);
        assert_eq!(sync.store().count(), 0);
        assert_eq!(sync.run_once().unwrap().added_count, 2);
    }

    #[test]
    fn test_rebuild_rewrites_store_and_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(InMemoryCatalog::with_jobs([
            job(1, "Chef"),
            job(2, "Baker"),
            JobRecord::new(3, ""),
        ]));
        let sync = open(dir.path(), catalog.clone());
        sync.run_once().unwrap();
        catalog.upsert(job(1, "Head Chef").with_version(1));
        sync.sync(&sync.capture().unwrap());
        let generation = sync.store().generation();

        let report = sync.rebuild().unwrap();
        assert_eq!(report.added_count, 2);
        assert_eq!(report.skipped_count, 1);
        assert_eq!(sync.store().count(), 2);
        assert_eq!(sync.store().live_count(), 2);
        assert!(sync.store().generation() > generation);
        assert_eq!(sync.cursor().covered, BTreeMap::from([(1, 1), (2, 0)]));
        assert!(sync.cursor().is_covered(3, 0));

        let artifact = IndexArtifact::load(&dir.path().join(INDEX_FILE)).unwrap().unwrap();
        assert_eq!(artifact.store_generation, sync.store().generation());
        assert_eq!(sync.run_once().unwrap(), SyncReport::default());
    }
}
