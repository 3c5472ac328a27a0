// Integration tests for JobMatch
use jobmatch_api::Recommender;
use jobmatch_core::{
    Embedder, EngineConfig, HashingEmbedder, InMemoryCatalog, IndexState, IndexStrategy,
    JobRecord, JsonFileCatalog, Location, UserQuery,
};
use jobmatch_storage::{DeltaSync, SyncOutcome};
use std::path::Path;
use std::sync::Arc;

const DIM: usize = 128;

fn config(strategy: IndexStrategy) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.embedding.dim = DIM;
    config.index.strategy = strategy;
    config.sync.batch_size = 2;
    config
}

fn embedder() -> Arc<dyn Embedder> {
    Arc::new(HashingEmbedder::new(DIM))
}

fn sample_jobs() -> Vec<JobRecord> {
    vec![
        JobRecord::new(1, "Data Scientist")
            .with_skills(["Python", "SQL", "Machine Learning"])
            .with_location(Location::new("Karnataka", "Bangalore"))
            .with_experience(2.0, 5.0),
        JobRecord::new(2, "Data Analyst")
            .with_skills(["SQL", "Excel"])
            .with_location(Location::new("Maharashtra", "Pune"))
            .with_experience(1.0, 3.0),
        JobRecord::new(4, "Pastry Chef")
            .with_skills(["Baking"])
            .with_location(Location::new("Delhi", "Delhi")),
    ]
}

fn open_sync(dir: &Path, catalog: Arc<InMemoryCatalog>, strategy: IndexStrategy) -> DeltaSync {
    DeltaSync::open(dir, &config(strategy), catalog, embedder()).unwrap()
}

fn recommender(dir: &Path, strategy: IndexStrategy) -> Recommender {
    Recommender::new(dir, config(strategy), embedder()).unwrap()
}

#[test]
fn test_misspelled_title_is_corrected_and_ranked_first() {
    for strategy in [IndexStrategy::Flat, IndexStrategy::Hnsw] {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(InMemoryCatalog::with_jobs(sample_jobs()));
        open_sync(dir.path(), catalog, strategy).run_once().unwrap();

        let recommender = recommender(dir.path(), strategy);
        recommender.reload().unwrap();

        let query = UserQuery::new("data scienctist")
            .with_skills(["python", "sql"])
            .with_location(Location::new("Karnataka", "Bangalore"))
            .with_experience(3.0)
            .with_top_k(1);
        let response = recommender.recommend(&query).unwrap();

        assert_eq!(response.corrected_title, "Data Scientist");
        assert_eq!(response.results.len(), 1);
        let top = &response.results[0];
        assert_eq!(top.job_id, 1);
        assert!((top.component_scores.title_sim - 1.0).abs() < 1e-4);
        assert_eq!(top.component_scores.location_bonus, 1.0);
        assert_eq!(top.metadata.title, "Data Scientist");
    }
}

#[test]
fn test_results_are_ranked_and_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Arc::new(InMemoryCatalog::with_jobs(sample_jobs()));
    open_sync(dir.path(), catalog, IndexStrategy::Hnsw).run_once().unwrap();
    let recommender = recommender(dir.path(), IndexStrategy::Hnsw);
    recommender.reload().unwrap();

    let query = UserQuery::new("Data Analyst").with_skills(["sql"]).with_top_k(2);
    let results = recommender.recommend(&query).unwrap().results;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].job_id, 2);
    assert!(results[0].composite_score >= results[1].composite_score);
    assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.composite_score)));
}

#[test]
fn test_empty_catalog_yields_empty_results() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Arc::new(InMemoryCatalog::new());
    let report = open_sync(dir.path(), catalog, IndexStrategy::Hnsw).run_once().unwrap();
    assert_eq!(report.added_count, 0);

    let recommender = recommender(dir.path(), IndexStrategy::Hnsw);
    let index = recommender.reload().unwrap();
    assert!(index.search(&embedder().embed("Chef").unwrap(), 5).is_empty());
    let response = recommender.recommend(&UserQuery::new("Chef")).unwrap();
    assert!(response.results.is_empty());
}

#[test]
fn test_new_job_visible_after_reload_only() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Arc::new(InMemoryCatalog::with_jobs(sample_jobs()));
    let sync = open_sync(dir.path(), catalog.clone(), IndexStrategy::Hnsw);
    sync.run_once().unwrap();

    let recommender = recommender(dir.path(), IndexStrategy::Hnsw);
    recommender.reload().unwrap();
    // A search in flight holds this version for its whole duration
    let in_flight = recommender.manager().current().unwrap();

    catalog.upsert(
        JobRecord::new(3, "Machine Learning Engineer")
            .with_skills(["Python", "PyTorch"])
            .with_location(Location::new("Karnataka", "Bangalore")),
    );
    let report = sync.run_once().unwrap();
    assert_eq!(report.added_count, 1);

    let query = UserQuery::new("Machine Learning Engineer").with_top_k(1);
    let before = recommender.recommend(&query).unwrap();
    assert_ne!(before.results[0].job_id, 3);

    let published = recommender.reload().unwrap();
    assert!(published.version() > in_flight.version());
    let after = recommender.recommend(&query).unwrap();
    assert_eq!(after.results[0].job_id, 3);
    assert_eq!(after.index_version, published.version());

    let title_vector = embedder().embed("Machine Learning Engineer").unwrap();
    assert!(in_flight.search(&title_vector, 10).iter().all(|n| n.job_id != 3));
    assert_eq!(in_flight.position_of(3), None);
    assert_eq!(
        recommender.manager().state(in_flight.version()),
        Some(IndexState::Superseded)
    );

    drop(in_flight);
    assert_eq!(recommender.manager().retained_superseded(), 0);
}

#[test]
fn test_sync_is_idempotent_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Arc::new(InMemoryCatalog::with_jobs(sample_jobs()));

    let first = open_sync(dir.path(), catalog.clone(), IndexStrategy::Flat);
    assert_eq!(first.run_once().unwrap().added_count, 3);
    drop(first);

    let second = open_sync(dir.path(), catalog, IndexStrategy::Flat);
    let report = second.run_once().unwrap();
    assert_eq!(report.added_count, 0);
    assert_eq!(report.outcome, SyncOutcome::Completed);
    assert_eq!(second.store().count(), 3);
}

#[test]
fn test_deleted_job_disappears_from_recommendations() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Arc::new(InMemoryCatalog::with_jobs(sample_jobs()));
    let sync = open_sync(dir.path(), catalog.clone(), IndexStrategy::Hnsw);
    sync.run_once().unwrap();

    catalog.remove(4);
    assert_eq!(sync.run_once().unwrap().tombstoned_count, 1);

    let recommender = recommender(dir.path(), IndexStrategy::Hnsw);
    recommender.reload().unwrap();
    let results = recommender
        .recommend(&UserQuery::new("Pastry Chef").with_top_k(10))
        .unwrap()
        .results;
    assert!(results.iter().all(|r| r.job_id != 4));
    assert_eq!(results.len(), 2);
}

#[test]
fn test_json_catalog_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let catalog_path = dir.path().join("jobs.json");
    std::fs::write(&catalog_path, serde_json::to_vec(&sample_jobs()).unwrap()).unwrap();

    let data_dir = dir.path().join("data");
    let sync = DeltaSync::open(
        &data_dir,
        &config(IndexStrategy::Hnsw),
        Arc::new(JsonFileCatalog::new(&catalog_path)),
        embedder(),
    )
    .unwrap();
    assert_eq!(sync.run_once().unwrap().added_count, 3);

    let recommender = recommender(&data_dir, IndexStrategy::Hnsw);
    recommender.reload().unwrap();
    let response = recommender
        .recommend(&UserQuery::new("pastry chef").with_top_k(1))
        .unwrap();
    assert_eq!(response.corrected_title, "Pastry Chef");
    assert_eq!(response.results[0].job_id, 4);
}
