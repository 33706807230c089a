//! Bounded, expiring cache of open workbook handles.
//!
//! Entries live in an [`LruCache`] (hash map plus recency list) and the
//! per-path session selections sit beside them in the same locked state, so
//! every structural change to either happens under one write-lock acquisition.
//! Lookups check presence and expiry under the shared lock and only upgrade
//! to the exclusive lock to promote or purge, re-validating after the upgrade.

use crate::config::CacheConfig;
use crate::model::CacheStats;
use anyhow::Result;
use lru::LruCache;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Deadline used when `now + ttl` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A resource that must be released when the cache lets go of it.
pub trait Release: Send + Sync {
    fn release(&self) -> Result<()>;
}

struct CacheEntry<H> {
    handle: Arc<H>,
    expires_at: Instant,
}

impl<H> CacheEntry<H> {
    fn is_live(&self, now: Instant) -> bool {
        now <= self.expires_at
    }
}

struct CacheState<H> {
    entries: LruCache<PathBuf, CacheEntry<H>>,
    selections: HashMap<PathBuf, String>,
    max_size: usize,
}

pub struct HandleCache<H: Release> {
    state: RwLock<CacheState<H>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<H: Release> HandleCache<H> {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            state: RwLock::new(CacheState {
                entries: LruCache::unbounded(),
                selections: HashMap::new(),
                max_size: config.max_size.max(1),
            }),
            ttl: config.ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns a live handle and marks it most recently used.
    ///
    /// Expired entries are purged on the way out and reported as a miss.
    pub fn get(&self, key: &Path) -> Option<Arc<H>> {
        let live = self
            .state
            .read()
            .entries
            .peek(key)
            .map(|entry| entry.is_live(Instant::now()));
        match live {
            None => {
                self.record_miss(key);
                return None;
            }
            Some(false) => {
                self.purge_if_expired(key);
                self.record_miss(key);
                return None;
            }
            Some(true) => {}
        }

        // Promotion mutates the recency list; the entry may have been evicted
        // or replaced since the shared check, so look again.
        let mut state = self.state.write();
        let now = Instant::now();
        let found = state
            .entries
            .get(key)
            .map(|entry| (entry.is_live(now), entry.handle.clone()));

        match found {
            Some((true, handle)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(path = ?key, cache_result = "hit", "handle cache lookup");
                Some(handle)
            }
            Some((false, _)) => {
                debug!(path = ?key, "purging expired handle on read");
                self.remove_locked(&mut state, key);
                drop(state);
                self.record_miss(key);
                None
            }
            None => {
                drop(state);
                self.record_miss(key);
                None
            }
        }
    }

    /// Inserts or replaces the handle for `key` with a fresh deadline.
    ///
    /// A replaced handle is released unless it is the same handle. Inserting
    /// past capacity evicts least recently used entries.
    pub fn put(&self, key: &Path, handle: Arc<H>) {
        let mut state = self.state.write();
        let entry = CacheEntry {
            handle: handle.clone(),
            expires_at: self.deadline(Instant::now()),
        };
        if let Some(previous) = state.entries.put(key.to_path_buf(), entry)
            && !Arc::ptr_eq(&previous.handle, &handle)
        {
            release_handle(key, &previous.handle);
        }
        self.enforce_capacity(&mut state);
    }

    /// Returns the live handle for `key` if one exists, otherwise caches `handle`.
    ///
    /// Two callers that both missed and opened the same file end up sharing the
    /// first handle; the loser's handle is released before it is ever shared.
    pub fn insert_or_get(&self, key: &Path, handle: Arc<H>) -> Arc<H> {
        let mut state = self.state.write();
        let now = Instant::now();
        let existing = state
            .entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.handle.clone());

        if let Some(existing) = existing {
            if !Arc::ptr_eq(&existing, &handle) {
                release_handle(key, &handle);
            }
            return existing;
        }

        let entry = CacheEntry {
            handle: handle.clone(),
            expires_at: self.deadline(now),
        };
        if let Some(previous) = state.entries.put(key.to_path_buf(), entry)
            && !Arc::ptr_eq(&previous.handle, &handle)
        {
            release_handle(key, &previous.handle);
        }
        self.enforce_capacity(&mut state);
        handle
    }

    /// Releases every entry and drops all session selections. Returns the
    /// number of handles released.
    pub fn clear(&self) -> usize {
        let mut state = self.state.write();
        let cleared = state.entries.len();
        for (key, entry) in state.entries.iter() {
            release_handle(key, &entry.handle);
        }
        state.entries.clear();
        state.selections.clear();
        if cleared > 0 {
            debug!(cleared, "handle cache cleared");
        }
        cleared
    }

    /// Evicts every entry whose deadline has passed. Returns the number removed.
    pub fn clean_expired(&self) -> usize {
        let mut state = self.state.write();
        let now = Instant::now();
        let expired: Vec<PathBuf> = state
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove_locked(&mut state, key);
        }
        if !expired.is_empty() {
            debug!(removed = expired.len(), "expired handles swept");
        }
        expired.len()
    }

    pub fn size(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.state.read().max_size
    }

    /// Changes the capacity, evicting immediately if occupancy now exceeds it.
    pub fn set_capacity(&self, max_size: usize) {
        let mut state = self.state.write();
        state.max_size = max_size.max(1);
        self.enforce_capacity(&mut state);
    }

    /// True if a live entry exists. Does not affect recency.
    pub fn contains(&self, key: &Path) -> bool {
        let state = self.state.read();
        let now = Instant::now();
        state
            .entries
            .peek(key)
            .is_some_and(|entry| entry.is_live(now))
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<PathBuf> {
        self.state
            .read()
            .entries
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Session sheet selected for a cached path.
    pub fn selection(&self, key: &Path) -> Option<String> {
        let state = self.state.read();
        if !state.entries.contains(key) {
            return None;
        }
        state.selections.get(key).cloned()
    }

    /// Records a session selection. Returns false when `key` is not cached,
    /// since a selection never outlives its entry.
    pub fn select(&self, key: &Path, sheet: &str) -> bool {
        let mut state = self.state.write();
        if !state.entries.contains(key) {
            return false;
        }
        state.selections.insert(key.to_path_buf(), sheet.to_string());
        true
    }

    pub fn selection_count(&self) -> usize {
        self.state.read().selections.len()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.read();
        CacheStats {
            size: state.entries.len(),
            capacity: state.max_size,
            ttl: self.ttl,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn purge_if_expired(&self, key: &Path) {
        let mut state = self.state.write();
        let now = Instant::now();
        if state
            .entries
            .peek(key)
            .is_some_and(|entry| !entry.is_live(now))
        {
            debug!(path = ?key, "purging expired handle on read");
            self.remove_locked(&mut state, key);
        }
    }

    fn deadline(&self, now: Instant) -> Instant {
        now.checked_add(self.ttl)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now)
    }

    fn record_miss(&self, key: &Path) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(path = ?key, cache_result = "miss", "handle cache lookup");
    }

    fn enforce_capacity(&self, state: &mut CacheState<H>) {
        while state.entries.len() > state.max_size {
            let Some(oldest) = state.entries.peek_lru().map(|(key, _)| key.clone()) else {
                break;
            };
            debug!(path = ?oldest, "evicting least recently used handle");
            self.remove_locked(state, &oldest);
        }
    }

    /// Releases the handle, then drops the entry and its selection.
    fn remove_locked(&self, state: &mut CacheState<H>, key: &Path) {
        if let Some(entry) = state.entries.peek(key) {
            release_handle(key, &entry.handle);
        }
        if state.entries.pop(key).is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        state.selections.remove(key);
    }
}

impl<H: Release> Drop for HandleCache<H> {
    fn drop(&mut self) {
        self.clear();
    }
}

fn release_handle<H: Release>(key: &Path, handle: &Arc<H>) {
    if let Err(error) = handle.release() {
        warn!(path = ?key, %error, "failed to release cached handle");
    }
}
