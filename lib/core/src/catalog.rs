//! Catalog contract
//!
//! The catalog is the source of truth for job rows. Sync code depends only on
//! [`Catalog`], never on a particular storage technology.

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::job::{JobId, JobRecord};
use crate::{Error, Result};

/// Source of job rows
pub trait Catalog: Send + Sync {
    /// All job ids currently in the catalog
    fn list_ids(&self) -> Result<BTreeSet<JobId>>;

    /// Rows for the requested ids; unknown ids are omitted
    fn fetch(&self, ids: &[JobId]) -> Result<Vec<JobRecord>>;

    /// Ids with their row version stamps.
    /// Catalogs without versioning report every row at version 0.
    fn list_versions(&self) -> Result<BTreeMap<JobId, u64>> {
        Ok(self.list_ids()?.into_iter().map(|id| (id, 0)).collect())
    }
}

/// Id set (with versions) captured from the catalog at sync time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSnapshot {
    versions: BTreeMap<JobId, u64>,
}

impl CatalogSnapshot {
    pub fn capture(catalog: &dyn Catalog) -> Result<Self> {
        Ok(Self {
            versions: catalog.list_versions()?,
        })
    }

    pub fn from_versions(versions: BTreeMap<JobId, u64>) -> Self {
        Self { versions }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    #[inline]
    pub fn contains(&self, job_id: JobId) -> bool {
        self.versions.contains_key(&job_id)
    }

    #[inline]
    pub fn version_of(&self, job_id: JobId) -> Option<u64> {
        self.versions.get(&job_id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (JobId, u64)> + '_ {
        self.versions.iter().map(|(id, v)| (*id, *v))
    }
}

/// Catalog held in memory; used by tests and embedding callers
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    rows: RwLock<BTreeMap<JobId, JobRecord>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs<I: IntoIterator<Item = JobRecord>>(jobs: I) -> Self {
        let catalog = Self::new();
        for job in jobs {
            catalog.upsert(job);
        }
        catalog
    }

    /// Insert or replace a row
    pub fn upsert(&self, job: JobRecord) {
        self.rows.write().insert(job.job_id, job);
    }

    pub fn remove(&self, job_id: JobId) -> Option<JobRecord> {
        self.rows.write().remove(&job_id)
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

impl Catalog for InMemoryCatalog {
    fn list_ids(&self) -> Result<BTreeSet<JobId>> {
        Ok(self.rows.read().keys().copied().collect())
    }

    fn fetch(&self, ids: &[JobId]) -> Result<Vec<JobRecord>> {
        let rows = self.rows.read();
        Ok(ids.iter().filter_map(|id| rows.get(id).cloned()).collect())
    }

    fn list_versions(&self) -> Result<BTreeMap<JobId, u64>> {
        Ok(self
            .rows
            .read()
            .values()
            .map(|job| (job.job_id, job.version))
            .collect())
    }
}

/// Catalog backed by a JSON array of [`JobRecord`]s on disk.
///
/// The file is re-read on every call so edits made by an exporter are
/// picked up by the next sync cycle.
#[derive(Debug, Clone)]
pub struct JsonFileCatalog {
    path: PathBuf,
}

impl JsonFileCatalog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_rows(&self) -> Result<BTreeMap<JobId, JobRecord>> {
        let data = std::fs::read(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::InvalidConfig(format!(
                "catalog file {} does not exist",
                self.path.display()
            )),
            // Exporters rewrite the file in place; a failed read is retried
            _ => Error::TransientFetch(format!("{}: {}", self.path.display(), e)),
        })?;
        let jobs: Vec<JobRecord> = serde_json::from_slice(&data)?;
        Ok(jobs.into_iter().map(|job| (job.job_id, job)).collect())
    }
}

impl Catalog for JsonFileCatalog {
    fn list_ids(&self) -> Result<BTreeSet<JobId>> {
        Ok(self.read_rows()?.into_keys().collect())
    }

    fn fetch(&self, ids: &[JobId]) -> Result<Vec<JobRecord>> {
        let mut rows = self.read_rows()?;
        Ok(ids.iter().filter_map(|id| rows.remove(id)).collect())
    }

    fn list_versions(&self) -> Result<BTreeMap<JobId, u64>> {
        Ok(self
            .read_rows()?
            .into_values()
            .map(|job| (job.job_id, job.version))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_catalog() {
        let catalog = InMemoryCatalog::with_jobs([
            JobRecord::new(2, "Data Engineer"),
            JobRecord::new(1, "Data Scientist").with_version(3),
        ]);

        let ids: Vec<_> = catalog.list_ids().unwrap().into_iter().collect();
        assert_eq!(ids, vec![1, 2]);

        let rows = catalog.fetch(&[2, 9]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "Data Engineer");

        let snapshot = CatalogSnapshot::capture(&catalog).unwrap();
        assert_eq!(snapshot.version_of(1), Some(3));
        assert_eq!(snapshot.version_of(2), Some(0));
        assert!(!snapshot.contains(9));
    }

    #[test]
    fn test_json_file_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let jobs = vec![
            JobRecord::new(1, "Data Scientist").with_skills(["python", "ml"]),
            JobRecord::new(2, "Data Engineer").with_skills(["sql", "etl"]),
        ];
        std::fs::write(&path, serde_json::to_vec(&jobs).unwrap()).unwrap();

        let catalog = JsonFileCatalog::new(&path);
        assert_eq!(catalog.list_ids().unwrap().len(), 2);
        let fetched = catalog.fetch(&[1]).unwrap();
        assert_eq!(fetched, vec![jobs[0].clone()]);
    }

    #[test]
    fn test_json_file_catalog_missing_file() {
        let catalog = JsonFileCatalog::new("/nonexistent/jobs.json");
        assert!(matches!(catalog.list_ids(), Err(Error::InvalidConfig(_))));
    }
}
