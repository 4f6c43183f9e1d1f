//! Fast tier: bounded in-memory LRU of validated entries

use std::sync::Arc;

use chrono::{DateTime, Utc};
use memostore::{validity, CacheEntry, CacheKey, Lookup, Validity};
use parking_lot::Mutex;
use tracing::debug;

use crate::lru::LruCache;

/// Capacity-limited key→entry table with LRU eviction
///
/// A lookup reorders the list, so every operation takes the one mutex.
pub struct FastTier {
    entries: Mutex<LruCache<CacheKey, Arc<CacheEntry>>>,
}

impl FastTier {
    /// Create a tier holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up `key`; an entry failing validation is removed
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Lookup {
        let mut entries = self.entries.lock();
        let key = key.to_string();

        let Some(entry) = entries.get(&key).cloned() else {
            return Lookup::Absent;
        };

        let reason = validity::check(&entry, now);
        if reason.is_valid() {
            Lookup::Hit(entry)
        } else {
            debug!(key = %key, ?reason, "fast entry failed validation");
            entries.remove(&key);
            Lookup::Invalid(reason)
        }
    }

    /// Insert `entry`, returning the key evicted to make room
    pub fn put(&self, entry: Arc<CacheEntry>) -> Option<CacheKey> {
        let key = entry.key.clone();
        let evicted = self.entries.lock().put(key, entry);
        evicted.map(|(k, _)| {
            debug!(key = %k, "evicted from fast tier");
            k
        })
    }

    /// Remove `key`; returns whether it was present
    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().remove(&key.to_string()).is_some()
    }

    /// Remove every entry whose key satisfies `pred`; returns removed keys
    pub fn remove_matching<F>(&self, pred: F) -> Vec<CacheKey>
    where
        F: Fn(&str) -> bool,
    {
        self.entries
            .lock()
            .remove_where(|k, _| pred(k))
            .into_iter()
            .map(|(k, _)| k)
            .collect()
    }

    /// Remove every entry that fails validation as of `now`
    pub fn remove_invalid(&self, now: DateTime<Utc>) -> Vec<(CacheKey, Validity)> {
        let mut entries = self.entries.lock();
        let failed: Vec<(CacheKey, Validity)> = entries
            .iter()
            .filter_map(|(k, e)| {
                let reason = validity::check(e, now);
                (!reason.is_valid()).then(|| (k.clone(), reason))
            })
            .collect();

        for (key, _) in &failed {
            entries.remove(key);
        }
        failed
    }

    /// Remove all entries; returns how many were removed
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let n = entries.len();
        entries.clear();
        n
    }

    /// Whether `key` is present (no validation, no reordering)
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().peek(&key.to_string()).is_some()
    }

    /// Keys from most to least recently used
    pub fn keys(&self) -> Vec<CacheKey> {
        self.entries.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.entries.lock().capacity()
    }
}
