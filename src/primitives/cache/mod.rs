#![forbid(unsafe_code)]
//! Reference-counted resource cache shared by the page cache and the data
//! item cache.
//!
//! Entries are loaded on first use and stay resident until every holder has
//! released them. There is no background eviction; once `capacity` entries
//! are resident (or loading) further misses fail with
//! [`VellumError::CacheFull`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::types::{Result, VellumError};

/// Loader and write-back hooks for a [`RefCache`].
pub trait CacheSource<T>: Send + Sync {
    /// Materializes the resource for `key` on a cache miss.
    fn load(&self, key: u64) -> Result<T>;
    /// Runs when the last reference to `value` is released, before its slot is freed.
    fn evict(&self, value: &T) -> Result<()>;
}

struct Entry<T> {
    value: Arc<T>,
    refs: usize,
}

struct CacheState<T> {
    entries: HashMap<u64, Entry<T>>,
    loading: HashSet<u64>,
}

/// Cache keyed by `u64` whose entries live exactly as long as they are referenced.
pub struct RefCache<T, S> {
    source: S,
    capacity: usize,
    state: Mutex<CacheState<T>>,
    loaded: Condvar,
}

impl<T, S> RefCache<T, S>
where
    S: CacheSource<T>,
{
    /// Creates a cache bounded to `capacity` resident entries (0 means unbounded).
    pub fn new(source: S, capacity: usize) -> Self {
        Self {
            source,
            capacity,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                loading: HashSet::new(),
            }),
            loaded: Condvar::new(),
        }
    }

    /// Returns the hooks backing this cache.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Returns the resource for `key`, loading it if absent, and takes one reference.
    ///
    /// Concurrent callers asking for a key that is being loaded wait for that
    /// load instead of starting their own.
    pub fn get(&self, key: u64) -> Result<Arc<T>> {
        let mut state = self.state.lock();
        loop {
            if state.loading.contains(&key) {
                self.loaded.wait(&mut state);
                continue;
            }
            if let Some(entry) = state.entries.get_mut(&key) {
                entry.refs += 1;
                return Ok(Arc::clone(&entry.value));
            }
            if self.capacity > 0 && state.entries.len() + state.loading.len() >= self.capacity {
                debug!(key, capacity = self.capacity, "cache.get.full");
                return Err(VellumError::CacheFull);
            }
            state.loading.insert(key);
            break;
        }
        drop(state);

        let mut slot = LoadingSlot {
            cache: self,
            key,
            armed: true,
        };
        let loaded = self.source.load(key);

        let mut state = self.state.lock();
        slot.armed = false;
        state.loading.remove(&key);
        self.loaded.notify_all();
        let value = Arc::new(loaded?);
        state.entries.insert(
            key,
            Entry {
                value: Arc::clone(&value),
                refs: 1,
            },
        );
        Ok(value)
    }

    /// Drops one reference to `key`; the last release evicts the entry.
    ///
    /// If the evict hook fails the entry stays resident with no references,
    /// and the next `release` of it or `close` retries the hook.
    pub fn release(&self, key: u64) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state
            .entries
            .get_mut(&key)
            .ok_or(VellumError::Invalid("release of non-resident cache key"))?;
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs > 0 {
            return Ok(());
        }
        if let Err(err) = self.source.evict(&entry.value) {
            debug!(key, error = %err, "cache.release.evict_failed");
            return Err(err);
        }
        state.entries.remove(&key);
        Ok(())
    }

    /// Force-evicts every resident entry regardless of its reference count.
    ///
    /// All entries are evicted even if a hook fails; the first failure is returned.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        let mut first_err = None;
        for (key, entry) in state.entries.drain() {
            if let Err(err) = self.source.evict(&entry.value) {
                debug!(key, error = %err, "cache.close.evict_failed");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if nothing is resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current reference count of `key`, or `None` if it is not resident.
    pub fn ref_count(&self, key: u64) -> Option<usize> {
        self.state.lock().entries.get(&key).map(|entry| entry.refs)
    }
}

// Clears a key's loading mark if the loader unwinds, so waiters wake up.
struct LoadingSlot<'a, T, S> {
    cache: &'a RefCache<T, S>,
    key: u64,
    armed: bool,
}

impl<T, S> Drop for LoadingSlot<'_, T, S> {
    fn drop(&mut self) {
        if self.armed {
            self.cache.state.lock().loading.remove(&self.key);
            self.cache.loaded.notify_all();
        }
    }
}
