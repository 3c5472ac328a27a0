use thiserror::Error;

use crate::job::JobId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Catalog or embedder temporarily unavailable; retried with backoff.
    #[error("Transient fetch error: {0}")]
    TransientFetch(String),

    /// A persisted artifact failed its integrity check on load.
    #[error("Corrupt artifact {path}: {reason}")]
    CorruptArtifact { path: String, reason: String },

    #[error("Invalid query: {0}")]
    QueryValidation(String),

    #[error("No index has been published yet")]
    IndexUnavailable,

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Entry already stored: job {job_id} version {version}")]
    DuplicateEntry { job_id: JobId, version: u64 },

    #[error("An index build is already in progress")]
    BuildInProgress,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub fn corrupt(path: impl AsRef<std::path::Path>, reason: impl Into<String>) -> Self {
        Error::CorruptArtifact {
            path: path.as_ref().display().to_string(),
            reason: reason.into(),
        }
    }

    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientFetch(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
