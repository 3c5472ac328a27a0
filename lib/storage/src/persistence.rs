//! Atomic file replacement and integrity helpers shared by the store,
//! the sync cursor and the index artifact.

use atomicwrites::{AtomicFile, OverwriteBehavior};
use jobmatch_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Replace `path` with `bytes` so readers see either the old or the new
/// content, never a prefix.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    AtomicFile::new(path, OverwriteBehavior::AllowOverwrite)
        .write(|f| f.write_all(bytes))
        .map_err(|e| Error::Storage(format!("atomic write of {} failed: {}", path.display(), e)))
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &data)
}

/// Read a JSON file; `Ok(None)` when it does not exist, `CorruptArtifact`
/// when it does not parse.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| Error::corrupt(path, e.to_string()))
}

pub(crate) fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| Error::Serialization(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(path: &Path, data: &[u8]) -> Result<T> {
    bincode::deserialize(data).map_err(|e| Error::corrupt(path, format!("decode failed: {}", e)))
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Best-effort removal; a leftover file is harmless but worth a log line
pub(crate) fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            tracing::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// Exclusive claim on a data directory for one writer process.
///
/// The lock file holds the owner's pid and is removed when the guard drops.
#[derive(Debug)]
pub(crate) struct WriterLock {
    path: PathBuf,
}

impl WriterLock {
    pub(crate) fn acquire(path: &Path) -> Result<Self> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                file.sync_all()?;
                Ok(Self {
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let owner = std::fs::read_to_string(path).unwrap_or_default();
                Err(Error::Storage(format!(
                    "{} is held by process {}; remove the file if that process is gone",
                    path.display(),
                    owner.trim()
                )))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        remove_quietly(&self.path);
    }
}
