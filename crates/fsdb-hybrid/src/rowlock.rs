//! Per-key locking.
//!
//! A [`RowLock`] is a table of named mutexes: acquisitions for distinct keys
//! never contend, acquisitions for the same key serialize. The table grows
//! one locker per distinct key; a small bounded pool recycles the locker
//! allocated by the loser of a racing first acquisition.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fsdb_core::Key;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Max number of spare lockers kept for reuse. Unrelated to the number of
/// keys the table can hold.
const LOCKER_POOL_MAX: usize = 10;

type Locker = Arc<Mutex<()>>;

/// A set of per-key locks.
#[derive(Default)]
pub struct RowLock {
    locks: DashMap<Key, Locker>,
    pool: StdMutex<Vec<Locker>>,
}

impl RowLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks a key, waiting if another holder has it. The key unlocks when
    /// the returned guard drops.
    pub async fn lock(&self, key: &Key) -> OwnedMutexGuard<()> {
        self.locker(key).lock_owned().await
    }

    /// Returns the locker for a key, installing one on first touch.
    fn locker(&self, key: &Key) -> Locker {
        if let Some(locker) = self.locks.get(key) {
            return locker.clone();
        }
        let fresh = self.take_spare();
        match self.locks.entry(key.clone()) {
            Entry::Occupied(entry) => {
                // Another task installed a locker for this key first; keep
                // ours for a later key instead of leaking it.
                self.put_spare(fresh);
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                entry.insert(fresh.clone());
                fresh
            }
        }
    }

    fn take_spare(&self) -> Locker {
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        pool.pop().unwrap_or_default()
    }

    fn put_spare(&self, locker: Locker) {
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        if pool.len() < LOCKER_POOL_MAX {
            pool.push(locker);
        }
    }

    #[cfg(test)]
    fn spare_count(&self) -> usize {
        self.pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
