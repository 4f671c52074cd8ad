//! Per-workspace mutation lock
//!
//! Merges and plan applies that touch the same workspace are serialized on
//! a lock keyed by the canonical workspace path. The lock is released when
//! the returned [`ProjectLockGuard`] drops, on every exit path. A slot
//! leaves the map once no guard or waiter refers to it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};

use once_cell::sync::Lazy;
use tracing::debug;

#[derive(Default)]
struct Slot {
    held: Mutex<bool>,
    released: Condvar,
}

/// Keyed map of workspace locks
#[derive(Default)]
pub struct ProjectLocks {
    slots: Mutex<HashMap<PathBuf, Arc<Slot>>>,
}

static GLOBAL: Lazy<ProjectLocks> = Lazy::new(ProjectLocks::default);

/// Held lock on one workspace
pub struct ProjectLockGuard<'a> {
    locks: &'a ProjectLocks,
    key: PathBuf,
    slot: Arc<Slot>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide instance used by merge and apply
    pub fn global() -> &'static ProjectLocks {
        &GLOBAL
    }

    /// Canonical key; paths that do not exist yet are keyed as given
    pub fn key_for(path: &Path) -> PathBuf {
        std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
    }

    /// Block until the workspace at `path` is free, then hold it
    pub fn lock(&self, path: &Path) -> ProjectLockGuard<'_> {
        let key = Self::key_for(path);
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        {
            let mut held = slot.held.lock().unwrap_or_else(|e| e.into_inner());
            while *held {
                held = slot.released.wait(held).unwrap_or_else(|e| e.into_inner());
            }
            *held = true;
        }
        debug!(workspace = %key.display(), "project lock acquired");
        ProjectLockGuard {
            locks: self,
            key,
            slot,
        }
    }

    /// Hold the lock only if nobody else does
    pub fn try_lock(&self, path: &Path) -> Option<ProjectLockGuard<'_>> {
        let key = Self::key_for(path);
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        let mut held = slot.held.lock().unwrap_or_else(|e| e.into_inner());
        if *held {
            drop(held);
            self.release_slot(&key, &slot);
            return None;
        }
        *held = true;
        drop(held);
        Some(ProjectLockGuard {
            locks: self,
            key,
            slot,
        })
    }

    /// Number of workspaces with a live slot
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove the map entry when the caller's reference is the only one
    /// besides the map's. Clones are only taken under the map mutex.
    fn release_slot(&self, key: &Path, slot: &Arc<Slot>) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let last = slots
            .get(key)
            .is_some_and(|s| Arc::ptr_eq(s, slot) && Arc::strong_count(slot) == 2);
        if last {
            slots.remove(key);
        }
    }
}

impl ProjectLockGuard<'_> {
    pub fn workspace(&self) -> &Path {
        &self.key
    }
}

impl Drop for ProjectLockGuard<'_> {
    fn drop(&mut self) {
        {
            let mut held = self.slot.held.lock().unwrap_or_else(|e| e.into_inner());
            *held = false;
            self.slot.released.notify_one();
        }
        self.locks.release_slot(&self.key, &self.slot);
        debug!(workspace = %self.key.display(), "project lock released");
    }
}
