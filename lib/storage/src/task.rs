//! Continuous delta sync as a cancellable background task.

use jobmatch_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::sync::{DeltaSync, SyncOutcome, SyncReport};

type CycleHook = Arc<dyn Fn(&SyncReport) + Send + Sync>;

/// Polls the catalog and syncs it into the store until cancelled.
///
/// Each batch runs on the blocking pool and the task yields between
/// batches, so cancellation takes effect at the next batch boundary.
pub struct SyncTask {
    sync: DeltaSync,
    cancel: CancellationToken,
    poll_interval: Duration,
    on_change: Option<CycleHook>,
}

impl SyncTask {
    pub fn new(sync: DeltaSync, cancel: CancellationToken) -> Self {
        let poll_interval = Duration::from_secs(sync.config().poll_interval_secs);
        Self {
            sync,
            cancel,
            poll_interval,
            on_change: None,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run `hook` on the blocking pool after every cycle that changed the
    /// store and refreshed the index artifact
    #[must_use]
    pub fn on_change<F>(mut self, hook: F) -> Self
    where
        F: Fn(&SyncReport) + Send + Sync + 'static,
    {
        self.on_change = Some(Arc::new(hook));
        self
    }

    pub async fn run(self) {
        info!("Continuous sync started (every {:?})", self.poll_interval);
        while !self.cancel.is_cancelled() {
            match self.cycle().await {
                Ok(report) if report.changed_store() => {
                    if let Some(hook) = self.on_change.clone() {
                        if let Err(e) = spawn_blocking(move || hook(&report)).await {
                            error!("Sync hook panicked: {}", e);
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => error!("Sync cycle failed: {}", e),
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!("Continuous sync stopped");
    }

    /// One pass over the catalog
    pub async fn cycle(&self) -> Result<SyncReport> {
        let sync = self.sync.clone();
        let snapshot = blocking(move || sync.capture()).await?;

        let plan = self.sync.plan(&snapshot);
        let mut report = SyncReport::default();
        if plan.is_empty() {
            return Ok(report);
        }

        let sync = self.sync.clone();
        let removals = plan.clone();
        report.tombstoned_count = blocking(move || sync.apply_removals(&removals)).await?;

        let batch_size = self.sync.config().batch_size;
        for batch in plan.batches(batch_size) {
            if self.cancel.is_cancelled() {
                info!("Sync cancelled at a batch boundary");
                report.outcome = SyncOutcome::Cancelled;
                break;
            }
            let sync = self.sync.clone();
            let batch = batch.to_vec();
            let outcome = spawn_blocking(move || sync.process_batch(&batch))
                .await
                .map_err(|e| Error::Storage(format!("sync batch panicked: {}", e)))?;
            report.absorb(outcome);
            if !report.is_completed() {
                break;
            }
            tokio::task::yield_now().await;
        }

        if report.changed_store() {
            let sync = self.sync.clone();
            let kind = blocking(move || sync.refresh_index()).await?;
            info!(
                "Sync cycle: {} added, {} tombstoned, index {:?}",
                report.added_count, report.tombstoned_count, kind
            );
        }
        Ok(report)
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(f)
        .await
        .map_err(|e| Error::Storage(format!("blocking task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobmatch_core::{EngineConfig, HashingEmbedder, InMemoryCatalog, JobRecord};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn open(dir: &std::path::Path, catalog: Arc<InMemoryCatalog>) -> DeltaSync {
        let mut config = EngineConfig::default();
        config.embedding.dim = 16;
        config.sync.batch_size = 1;
        DeltaSync::open(dir, &config, catalog, Arc::new(HashingEmbedder::new(16))).unwrap()
    }

    #[tokio::test]
    async fn test_cycle_syncs_and_refreshes() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(InMemoryCatalog::with_jobs([
            JobRecord::new(1, "Chef"),
            JobRecord::new(2, "Baker"),
        ]));
        let task = SyncTask::new(open(dir.path(), catalog), CancellationToken::new());

        let report = task.cycle().await.unwrap();
        assert_eq!(report.added_count, 2);
        assert!(dir.path().join(crate::sync::INDEX_FILE).exists());
        assert_eq!(task.cycle().await.unwrap(), SyncReport::default());
    }

    #[tokio::test]
    async fn test_cancelled_cycle_stops_at_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(InMemoryCatalog::with_jobs([
            JobRecord::new(1, "Chef"),
            JobRecord::new(2, "Baker"),
        ]));
        let sync = open(dir.path(), catalog);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let task = SyncTask::new(sync.clone(), cancel);

        let report = task.cycle().await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::Cancelled);
        assert_eq!(sync.store().count(), 0);
    }

    #[tokio::test]
    async fn test_run_invokes_hook_and_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(InMemoryCatalog::with_jobs([JobRecord::new(1, "Chef")]));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let hook_calls = calls.clone();
        let hook_cancel = cancel.clone();
        let task = SyncTask::new(open(dir.path(), catalog), cancel.clone())
            .with_poll_interval(Duration::from_millis(10))
            .on_change(move |report| {
                assert_eq!(report.added_count, 1);
                hook_calls.fetch_add(1, Ordering::SeqCst);
                hook_cancel.cancel();
            });

        tokio::time::timeout(Duration::from_secs(10), task.run())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
