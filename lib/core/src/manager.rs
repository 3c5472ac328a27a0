//! Publication of immutable index versions.
//!
//! Readers take an `Arc<Index>` and keep using it for the whole request,
//! even when a newer version is published meanwhile. A superseded version
//! is dropped once its last reader releases it.

use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::index::Index;
use crate::{Error, Result};

/// Lifecycle of an index version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Building,
    Publishing,
    Active,
    /// Replaced but still held by at least one reader
    Superseded,
}

#[derive(Default)]
pub struct IndexManager {
    active: RwLock<Option<Arc<Index>>>,
    next_version: AtomicU64,
    building: Mutex<bool>,
    build_released: Condvar,
    states: Mutex<BTreeMap<u64, IndexState>>,
    superseded: Mutex<Vec<(u64, Weak<Index>)>>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The index readers should use right now
    pub fn current(&self) -> Result<Arc<Index>> {
        self.active.read().clone().ok_or(Error::IndexUnavailable)
    }

    pub fn has_index(&self) -> bool {
        self.active.read().is_some()
    }

    /// Reserve the single build slot.
    ///
    /// Fails with [`Error::BuildInProgress`] while another ticket is alive.
    pub fn begin_build(&self) -> Result<BuildTicket<'_>> {
        let mut building = self.building.lock();
        if *building {
            return Err(Error::BuildInProgress);
        }
        *building = true;
        drop(building);
        Ok(self.issue_ticket())
    }

    /// Reserve the build slot, blocking until the current holder releases it.
    ///
    /// Work the caller does after this returns observes everything the
    /// previous holder published.
    pub fn begin_build_wait(&self) -> BuildTicket<'_> {
        let mut building = self.building.lock();
        if *building {
            debug!("Waiting for the running index build to finish");
        }
        while *building {
            self.build_released.wait(&mut building);
        }
        *building = true;
        drop(building);
        self.issue_ticket()
    }

    fn issue_ticket(&self) -> BuildTicket<'_> {
        let version = self.next_version.fetch_add(1, Ordering::AcqRel) + 1;
        self.states.lock().insert(version, IndexState::Building);
        debug!("Index version {} building", version);
        BuildTicket {
            manager: self,
            version,
            finished: false,
        }
    }

    /// Build slot + publish in one step, for callers that already hold the
    /// finished index.
    pub fn publish(&self, index: Index) -> Result<Arc<Index>> {
        Ok(self.begin_build()?.publish(index))
    }

    fn swap_in(&self, version: u64, mut index: Index) -> Arc<Index> {
        index.set_version(version);
        self.states.lock().insert(version, IndexState::Publishing);

        let published = Arc::new(index);
        let previous = self.active.write().replace(published.clone());

        {
            let mut states = self.states.lock();
            states.insert(version, IndexState::Active);
            if let Some(previous) = &previous {
                states.insert(previous.version(), IndexState::Superseded);
            }
        }
        if let Some(previous) = previous {
            self.superseded
                .lock()
                .push((previous.version(), Arc::downgrade(&previous)));
        }

        info!(
            "Published index version {} ({} entries, {} live)",
            version,
            published.len(),
            published.live_count()
        );
        self.prune();
        published
    }

    /// Current state of a version; `None` once it is discarded or was never
    /// allocated
    pub fn state(&self, version: u64) -> Option<IndexState> {
        self.prune();
        self.states.lock().get(&version).copied()
    }

    /// Superseded versions still held by readers
    pub fn retained_superseded(&self) -> usize {
        self.prune();
        self.superseded.lock().len()
    }

    fn prune(&self) {
        let mut superseded = self.superseded.lock();
        let mut states = self.states.lock();
        superseded.retain(|(version, weak)| {
            if weak.strong_count() > 0 {
                true
            } else {
                states.remove(version);
                debug!("Index version {} discarded", version);
                false
            }
        });
    }
}

/// Exclusive right to build and publish the next index version
pub struct BuildTicket<'a> {
    manager: &'a IndexManager,
    version: u64,
    finished: bool,
}

impl BuildTicket<'_> {
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Atomically make `index` the active version
    pub fn publish(mut self, index: Index) -> Arc<Index> {
        self.finished = true;
        self.manager.swap_in(self.version, index)
    }
}

impl Drop for BuildTicket<'_> {
    fn drop(&mut self) {
        if !self.finished {
            // Abandoned build: nothing was published
            self.manager.states.lock().remove(&self.version);
            debug!("Index version {} abandoned", self.version);
        }
        *self.manager.building.lock() = false;
        self.manager.build_released.notify_one();
    }
}
