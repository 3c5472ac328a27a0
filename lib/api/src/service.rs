//! Serving-side orchestration: adopt persisted artifacts and answer queries.

use jobmatch_core::{
    normalize_skills, BuildTicket, Embedder, EngineConfig, Error, Index, IndexManager, Result,
    UserQuery,
};
use jobmatch_similarity::{ScoredCandidate, ScoringEngine, TitleNormalizer};
use jobmatch_storage::{load_or_build, VectorStore, INDEX_FILE, STORE_DIR};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
pub struct RecommendResponse {
    /// Title after correction against the index vocabulary
    pub corrected_title: String,
    /// Index version the results were computed on
    pub index_version: u64,
    pub results: Vec<ScoredCandidate>,
}

/// Read side of the engine.
///
/// Owns the [`IndexManager`]; every request pins the index that is active
/// when it starts and finishes on it.
pub struct Recommender {
    data_dir: PathBuf,
    config: EngineConfig,
    embedder: Arc<dyn Embedder>,
    manager: IndexManager,
    scoring: ScoringEngine,
}

impl Recommender {
    pub fn new(data_dir: &Path, config: EngineConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        if embedder.dim() != config.embedding.dim {
            return Err(Error::InvalidDimension {
                expected: config.embedding.dim,
                actual: embedder.dim(),
            });
        }
        let scoring = ScoringEngine::new(config.scoring.clone())?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            config,
            embedder,
            manager: IndexManager::new(),
            scoring,
        })
    }

    pub fn manager(&self) -> &IndexManager {
        &self.manager
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Adopt the latest persisted store and index artifact and publish them.
    ///
    /// Requests already running keep the index they started on. Fails with
    /// [`Error::BuildInProgress`] while another reload is running.
    pub fn reload(&self) -> Result<Arc<Index>> {
        self.adopt(self.manager.begin_build()?)
    }

    /// As [`Recommender::reload`], but waits for a running reload to finish
    /// and then reads the store again, so writes committed before the call
    /// are always published.
    pub fn reload_wait(&self) -> Result<Arc<Index>> {
        self.adopt(self.manager.begin_build_wait())
    }

    fn adopt(&self, ticket: BuildTicket<'_>) -> Result<Arc<Index>> {
        let store = VectorStore::open(self.data_dir.join(STORE_DIR), self.config.embedding.dim)?;
        let snapshot = store.snapshot();
        let (index, kind) = load_or_build(&self.data_dir.join(INDEX_FILE), &snapshot, &self.config.index);
        info!(
            "Reloaded store generation {} ({} entries, index {:?})",
            snapshot.generation,
            snapshot.len(),
            kind
        );
        Ok(ticket.publish(index))
    }

    /// Rank jobs for `query` on the currently published index
    pub fn recommend(&self, query: &UserQuery) -> Result<RecommendResponse> {
        query.validate()?;
        let index = self.manager.current()?;

        let mut query = query.clone();
        query.skills = normalize_skills(&query.skills);

        let normalizer = TitleNormalizer::new(index.vocabulary().clone(), self.config.normalizer.threshold);
        let corrected_title = normalizer.normalize(&query.title);

        let title_vector = self.embedder.embed(&corrected_title)?;
        let profile_vector = self.embedder.embed(&query.profile_text(&corrected_title))?;

        // Union of title and profile neighbors forms the candidate pool
        let pool = self.config.index.candidate_pool.max(query.top_k);
        let mut positions = Vec::with_capacity(pool * 2);
        if !corrected_title.trim().is_empty() {
            positions.extend(index.search(&title_vector, pool).into_iter().map(|n| n.position));
        }
        positions.extend(
            index
                .search_profile(&profile_vector, pool)
                .into_iter()
                .map(|n| n.position),
        );
        debug!(
            "Query '{}' -> '{}': {} candidates on index v{}",
            query.title,
            corrected_title,
            positions.len(),
            index.version()
        );

        let results = self.scoring.rank_positions(&query, &index, &title_vector, positions);
        Ok(RecommendResponse {
            corrected_title,
            index_version: index.version(),
            results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobmatch_core::{HashingEmbedder, InMemoryCatalog, JobRecord, Location};
    use jobmatch_storage::DeltaSync;

    const DIM: usize = 64;

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.embedding.dim = DIM;
        config
    }

    fn sync(dir: &Path, jobs: Vec<JobRecord>) {
        let catalog = Arc::new(InMemoryCatalog::with_jobs(jobs));
        let sync = DeltaSync::open(dir, &config(), catalog, Arc::new(HashingEmbedder::new(DIM))).unwrap();
        sync.run_once().unwrap();
    }

    fn recommender(dir: &Path) -> Recommender {
        Recommender::new(dir, config(), Arc::new(HashingEmbedder::new(DIM))).unwrap()
    }

    #[test]
    fn test_recommend_before_reload_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let r = recommender(dir.path());
        assert!(matches!(
            r.recommend(&UserQuery::new("Chef")),
            Err(Error::IndexUnavailable)
        ));
    }

    #[test]
    fn test_invalid_query_rejected_first() {
        let dir = tempfile::tempdir().unwrap();
        let r = recommender(dir.path());
        let query = UserQuery::new("Chef").with_top_k(0);
        assert!(matches!(r.recommend(&query), Err(Error::QueryValidation(_))));
    }

    #[test]
    fn test_reload_and_recommend() {
        let dir = tempfile::tempdir().unwrap();
        sync(
            dir.path(),
            vec![
                JobRecord::new(1, "Data Scientist")
                    .with_skills(["Python", "SQL"])
                    .with_location(Location::new("Karnataka", "Bangalore")),
                JobRecord::new(2, "Chef").with_location(Location::new("Delhi", "Delhi")),
            ],
        );

        let r = recommender(dir.path());
        let index = r.reload().unwrap();
        assert_eq!(index.live_count(), 2);

        let query = UserQuery::new("data scientst")
            .with_skills(["python"])
            .with_location(Location::new("Karnataka", "Bangalore"))
            .with_top_k(1);
        let response = r.recommend(&query).unwrap();
        assert_eq!(response.corrected_title, "Data Scientist");
        assert_eq!(response.index_version, index.version());
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].job_id, 1);
    }

    #[test]
    fn test_reload_on_empty_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let r = recommender(dir.path());
        r.reload().unwrap();
        let response = r.recommend(&UserQuery::new("Chef")).unwrap();
        assert!(response.results.is_empty());
        assert_eq!(response.corrected_title, "Chef");
    }

    #[test]
    fn test_reload_after_sync_waits_for_running_reload() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(InMemoryCatalog::with_jobs([JobRecord::new(1, "Pastry Chef")]));
        let embedder = Arc::new(HashingEmbedder::new(DIM));
        let sync = DeltaSync::open(dir.path(), &config(), catalog.clone(), embedder).unwrap();
        sync.run_once().unwrap();
        let r = recommender(dir.path());
        r.reload().unwrap();

        // A reload that read the store before the next cycle committed
        let ticket = r.manager().begin_build().unwrap();
        let before = VectorStore::open(dir.path().join(STORE_DIR), DIM).unwrap();
        let outdated = Index::build(&before.snapshot(), &config().index);

        catalog.upsert(JobRecord::new(3, "Machine Learning Engineer").with_skills(["Python"]));
        assert_eq!(sync.run_once().unwrap().added_count, 1);
        assert!(matches!(r.reload(), Err(Error::BuildInProgress)));

        let published = std::thread::scope(|scope| {
            let hook = scope.spawn(|| r.reload_wait());
            std::thread::sleep(std::time::Duration::from_millis(50));
            assert!(!hook.is_finished());
            ticket.publish(outdated);
            hook.join().unwrap().unwrap()
        });

        assert!(published.position_of(3).is_some());
        let response = r
            .recommend(&UserQuery::new("Machine Learning Engineer").with_top_k(1))
            .unwrap();
        assert_eq!(response.index_version, published.version());
        assert_eq!(response.results[0].job_id, 3);
    }

    #[test]
    fn test_embedder_dimension_checked() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Recommender::new(dir.path(), config(), Arc::new(HashingEmbedder::new(8))).is_err());
    }
}
