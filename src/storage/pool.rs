//! A bounded cache of open user stores.
//!
//! Each shard owns one [`Pool`]. The pool keeps at most `cache_size`
//! stores open, evicting the least recently used when a new user shows
//! up. Borrowed stores are handed out as refcounted [`StoreHandle`]s, so
//! an entry evicted while a handle is still out is only closed when the
//! last handle goes away, never underneath in-flight work.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::trace;

use crate::metrics::Metrics;

use super::store::Store;
use super::timestamp::Timestamp;
use super::{Result, StorageError};

/// Computes the database path for a user: two levels deep, fanned out by
/// the last two characters of the uid.
pub fn two_level_path(data_dir: &Path, uid: &str) -> PathBuf {
    let mut split = uid.len().saturating_sub(2);
    while !uid.is_char_boundary(split) {
        split -= 1;
    }
    data_dir.join(&uid[split..]).join(format!("{uid}.db"))
}

struct StoreEntry {
    uid: String,
    store: Mutex<Store>,
}

struct PoolState {
    closed: bool,
    resident: LruCache<String, Arc<StoreEntry>>,
    outstanding: usize,
}

struct Shared {
    data_dir: PathBuf,
    metrics: Arc<Metrics>,
    state: Mutex<PoolState>,
    drained: Condvar,
}

/// A bounded LRU cache of open [`Store`]s, keyed by uid.
pub struct Pool {
    shared: Arc<Shared>,
}

impl Pool {
    /// Creates a pool holding at most `cache_size` open stores under
    /// `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>, cache_size: usize, metrics: Arc<Metrics>) -> Self {
        let cache_size = NonZeroUsize::new(cache_size.max(1)).expect("clamped to at least 1");
        Self {
            shared: Arc::new(Shared {
                data_dir: data_dir.into(),
                metrics,
                state: Mutex::new(PoolState {
                    closed: false,
                    resident: LruCache::new(cache_size),
                    outstanding: 0,
                }),
                drained: Condvar::new(),
            }),
        }
    }

    /// Borrows the store for `uid`, opening it if it is not resident.
    ///
    /// The returned handle keeps the store alive even across an eviction;
    /// borrowing never blocks on capacity because opening a new store
    /// evicts the least recently used resident first.
    pub fn borrow(&self, uid: &str) -> Result<StoreHandle> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(StorageError::PoolClosed);
        }
        let entry = match state.resident.get(uid) {
            Some(entry) => entry.clone(),
            None => {
                let path = two_level_path(&self.shared.data_dir, uid);
                let store = Store::open(&path)?;
                self.shared.metrics.stores_opened.inc();
                let entry = Arc::new(StoreEntry {
                    uid: uid.to_string(),
                    store: Mutex::new(store),
                });
                // push evicts the LRU entry once the cache is full; any
                // outstanding handle keeps the evictee open until it is
                // returned
                if let Some((evicted_uid, _evicted)) = state.resident.push(uid.to_string(), entry.clone())
                {
                    trace!(uid = %evicted_uid, "evicting user store");
                    self.shared.metrics.stores_evicted.inc();
                }
                entry
            }
        };
        state.outstanding += 1;
        Ok(StoreHandle {
            entry,
            shared: self.shared.clone(),
        })
    }

    /// Runs an expiry sweep over every resident store.
    pub fn purge_resident(&self, now: Timestamp) -> Result<usize> {
        let state = self.shared.state.lock();
        if state.closed {
            return Err(StorageError::PoolClosed);
        }
        let mut purged = 0;
        for (_, entry) in state.resident.iter() {
            purged += entry.store.lock().purge_expired(now)?;
        }
        Ok(purged)
    }

    /// Marks the pool closed, waits for outstanding handles to drain,
    /// then closes every resident store.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        state.closed = true;
        while state.outstanding > 0 {
            self.shared.drained.wait(&mut state);
        }
        state.resident.clear();
    }

    /// How many stores are currently resident.
    #[cfg(test)]
    fn resident_len(&self) -> usize {
        self.shared.state.lock().resident.len()
    }

    /// Whether `uid`'s store is resident, without touching recency.
    #[cfg(test)]
    fn is_resident(&self, uid: &str) -> bool {
        self.shared.state.lock().resident.peek(uid).is_some()
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Pool")
            .field("data_dir", &self.shared.data_dir)
            .field("resident", &state.resident.len())
            .field("outstanding", &state.outstanding)
            .field("closed", &state.closed)
            .finish()
    }
}

/// A refcounted borrow of one user's store.
///
/// Dropping the handle returns the borrow; the last handle of an evicted
/// entry closes the underlying store.
pub struct StoreHandle {
    entry: Arc<StoreEntry>,
    shared: Arc<Shared>,
}

impl StoreHandle {
    /// The uid this store belongs to.
    pub fn uid(&self) -> &str {
        &self.entry.uid
    }

    /// Locks the store for use. Uncontended in normal operation, since the
    /// owning shard is the only caller.
    pub fn store(&self) -> MutexGuard<'_, Store> {
        self.entry.store.lock()
    }
}

impl Drop for StoreHandle {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.outstanding -= 1;
        if state.outstanding == 0 {
            self.shared.drained.notify_all();
        }
        // the entry Arc dropping after this closes an evicted store
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("uid", &self.entry.uid)
            .finish()
    }
}
