//! MemoCache: read-through cache over a fast and a durable tier

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use memostore::{
    CacheEntry, CacheKey, Clock, Dependency, DependencyRef, DurableTier, Lookup, MetaValue,
    Metadata, SystemClock, Validity,
};
use parking_lot::{RwLock, RwLockWriteGuard};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::Result;
use crate::fast::FastTier;
use crate::singleflight::{Flights, Role};
use crate::stats::{CacheStats, StatsSnapshot};
use crate::telemetry::{self, NoopSink, TelemetrySink};

/// Per-entry options for [`MemoCache::get_or_compute_with`]
#[derive(Debug, Clone, Default)]
pub struct EntryOptions {
    pub(crate) dependencies: Vec<Dependency>,
    pub(crate) ttl: Option<Duration>,
    pub(crate) metadata: Metadata,
}

impl EntryOptions {
    /// No dependencies, no TTL, no metadata
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire the entry `ttl` after creation
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Invalidate the entry when `dependency` changes
    pub fn dependency(mut self, dependency: impl Into<Dependency>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    /// Add several dependencies
    pub fn dependencies<I, D>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<Dependency>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    /// Attach one metadata value
    pub fn metadata(mut self, name: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }

    /// Attach a whole metadata map
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata.extend(metadata);
        self
    }
}

/// Key selector for [`MemoCache::invalidate_matching`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    /// Keys starting with the pattern
    Prefix(String),
    /// Keys containing the pattern anywhere
    Substring(String),
}

impl KeyPattern {
    /// Match keys starting with `prefix`
    pub fn prefix(prefix: impl Into<String>) -> Self {
        KeyPattern::Prefix(prefix.into())
    }

    /// Match keys containing `needle`
    pub fn substring(needle: impl Into<String>) -> Self {
        KeyPattern::Substring(needle.into())
    }

    /// Whether `key` is selected
    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::Prefix(p) => key.starts_with(p.as_str()),
            KeyPattern::Substring(s) => key.contains(s.as_str()),
        }
    }
}

impl From<&str> for KeyPattern {
    fn from(s: &str) -> Self {
        KeyPattern::Substring(s.to_string())
    }
}

impl From<String> for KeyPattern {
    fn from(s: String) -> Self {
        KeyPattern::Substring(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Fast,
    Durable,
}

/// Two-tier computation cache
///
/// Lookups go fast tier, then durable tier (promoting hits), then the
/// caller's computation. Every lookup validates the entry first; entries
/// failing TTL, dependency or content checks are removed and never served.
///
/// # Example
///
/// ```no_run
/// use memocache::{CacheConfig, EntryOptions, MemoCache};
/// use std::time::Duration;
///
/// let cache = MemoCache::open(CacheConfig::new("/tmp/memocache"))?;
/// let options = EntryOptions::new()
///     .dependency("schema.ttl")
///     .ttl(Duration::from_secs(3600));
///
/// let lines: usize = cache.get_or_compute_with("count:schema.ttl", &options, || {
///     std::fs::read_to_string("schema.ttl").map(|s| s.lines().count())
/// })?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct MemoCache {
    config: CacheConfig,
    fast: FastTier,
    durable: DurableTier,
    stats: CacheStats,
    clock: Arc<dyn Clock>,
    telemetry: Arc<dyn TelemetrySink>,
    flights: Flights,
    /// Lookups and stores hold it shared, removals exclusively
    gate: RwLock<()>,
    /// Bumped by every removal; a computation started in an older epoch is not stored
    epoch: AtomicU64,
}

impl MemoCache {
    /// Open a cache, creating the durable root if needed
    pub fn open(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let durable = DurableTier::open(&config.storage_root, config.durable_max_bytes)?;

        info!(
            root = %config.storage_root.display(),
            fast_capacity = config.fast_capacity,
            durable_max_bytes = config.durable_max_bytes,
            durable_entries = durable.len(),
            "opened cache"
        );

        Ok(Self {
            fast: FastTier::new(config.fast_capacity),
            stats: CacheStats::new(config.enable_stats),
            durable,
            config,
            clock: Arc::new(SystemClock),
            telemetry: Arc::new(NoopSink),
            flights: Flights::default(),
            gate: RwLock::new(()),
            epoch: AtomicU64::new(0),
        })
    }

    /// Use `clock` for entry timestamps and TTL checks
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Forward counters and compute durations to `sink`
    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = sink;
        self
    }

    /// Configuration this cache was opened with
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// [`get_or_compute_with`](Self::get_or_compute_with) with default options
    pub fn get_or_compute<T, E, F>(&self, key: &str, compute: F) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> std::result::Result<T, E>,
    {
        self.get_or_compute_with(key, &EntryOptions::default(), compute)
    }

    /// Return the cached value for `key`, or run `compute` and cache its result
    ///
    /// `compute` runs at most once per call and, across threads, at most once
    /// at a time per key: concurrent callers for the same key wait for the
    /// running computation and then read its result. A computation error is
    /// returned unchanged and nothing is stored. Cache-side failures (durable
    /// write errors, corrupt entries) are logged and counted, never returned.
    pub fn get_or_compute_with<T, E, F>(
        &self,
        key: &str,
        options: &EntryOptions,
        compute: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> std::result::Result<T, E>,
    {
        loop {
            let started = Instant::now();
            if let Some((value, tier)) = self.probe(key) {
                self.record_hit(tier, started.elapsed());
                return Ok(value);
            }

            let _leader = match self.flights.join(key) {
                Role::Leader(guard) => guard,
                Role::Waited => continue,
            };

            // A previous leader may have stored the value between probe and join.
            let started = Instant::now();
            if let Some((value, tier)) = self.probe(key) {
                self.record_hit(tier, started.elapsed());
                return Ok(value);
            }

            self.stats.record_misses(1);
            self.telemetry.increment(telemetry::MISS, 1);

            let epoch = self.epoch.load(Ordering::Acquire);
            let snapshots: Vec<DependencyRef> =
                options.dependencies.iter().map(Dependency::snapshot).collect();

            let started = Instant::now();
            let value = compute()?;
            let took = started.elapsed();
            self.stats.record_compute(took);
            self.telemetry.record_duration(telemetry::COMPUTE_TIME, took);

            self.store(key, &value, snapshots, options, epoch);
            return Ok(value);
        }
    }

    /// Remove `key` from both tiers; returns whether anything was removed
    ///
    /// Waits for in-progress lookups to finish. A computation already running
    /// when this is called still returns its value but does not cache it.
    pub fn invalidate(&self, key: &str) -> bool {
        let _gate = self.exclusive();
        let in_fast = self.fast.remove(key);
        let in_durable = self.durable.remove(key);
        let removed = in_fast || in_durable;
        if removed {
            debug!(key, "invalidated");
            self.record_invalidations(1);
        }
        removed
    }

    /// Remove every key selected by `pattern` from both tiers
    ///
    /// A plain string selects keys containing it; use [`KeyPattern::prefix`]
    /// to anchor at the start. Returns the number of distinct keys removed.
    pub fn invalidate_matching(&self, pattern: impl Into<KeyPattern>) -> usize {
        let pattern = pattern.into();
        let _gate = self.exclusive();
        let mut removed: HashSet<CacheKey> = self
            .fast
            .remove_matching(|k| pattern.matches(k))
            .into_iter()
            .collect();
        removed.extend(self.durable.remove_matching(|k| pattern.matches(k)));

        debug!(?pattern, count = removed.len(), "invalidated matching keys");
        self.record_invalidations(removed.len() as u64);
        removed.len()
    }

    /// Empty both tiers; returns the number of distinct keys removed
    ///
    /// Statistics are kept; see [`reset_stats`](Self::reset_stats).
    pub fn clear(&self) -> usize {
        let _gate = self.exclusive();
        let mut keys: HashSet<CacheKey> = self.fast.keys().into_iter().collect();
        keys.extend(self.durable.keys());

        self.fast.clear();
        self.durable.clear();

        info!(count = keys.len(), "cleared cache");
        keys.len()
    }

    /// Remove every entry in either tier that currently fails validation
    ///
    /// Returns the number of distinct keys removed.
    pub fn sweep(&self) -> usize {
        let _gate = self.gate.write();
        let now = self.clock.now();
        let mut removed: HashSet<CacheKey> = HashSet::new();

        for (key, reason) in self
            .fast
            .remove_invalid(now)
            .into_iter()
            .chain(self.durable.remove_invalid(now))
        {
            debug!(key = %key, ?reason, "swept invalid entry");
            removed.insert(key);
        }

        self.record_invalidations(removed.len() as u64);
        removed.len()
    }

    /// Whether either tier holds `key`, without validating it
    pub fn contains(&self, key: &str) -> bool {
        self.fast.contains(key) || self.durable.contains(key)
    }

    /// Counters plus current tier sizes
    pub fn stats(&self) -> StatsSnapshot {
        let mut snapshot = self.stats.snapshot();
        snapshot.fast_entries = self.fast.len();
        snapshot.durable_entries = self.durable.len();
        snapshot.durable_bytes = self.durable.total_bytes();
        snapshot
    }

    /// Alias of [`stats`](Self::stats)
    pub fn get_stats(&self) -> StatsSnapshot {
        self.stats()
    }

    /// Zero every counter
    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Take the gate exclusively and start a new epoch
    fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        let gate = self.gate.write();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        gate
    }

    /// Look `key` up in both tiers without recording hit or miss
    fn probe<T: DeserializeOwned>(&self, key: &str) -> Option<(T, Tier)> {
        let _gate = self.gate.read();
        let now = self.clock.now();

        match self.fast.get(key, now) {
            Lookup::Hit(entry) => {
                return match self.decode(&entry) {
                    Some(value) => Some((value, Tier::Fast)),
                    None => {
                        self.durable.remove(key);
                        None
                    }
                };
            }
            Lookup::Invalid(reason) => {
                // The durable copy is the same entry and fails the same check.
                self.durable.remove(key);
                self.note_invalid(key, &reason);
                return None;
            }
            Lookup::Corrupt | Lookup::Absent => {}
        }

        match self.durable.get(key, now) {
            Lookup::Hit(entry) => match self.decode(&entry) {
                Some(value) => {
                    self.promote(entry);
                    Some((value, Tier::Durable))
                }
                None => {
                    self.durable.remove(key);
                    None
                }
            },
            Lookup::Invalid(reason) => {
                self.note_invalid(key, &reason);
                None
            }
            Lookup::Corrupt => {
                self.stats.record_corrupt_entries(1);
                None
            }
            Lookup::Absent => None,
        }
    }

    /// Deserialize a payload; a failure removes the fast copy and counts as corrupt
    fn decode<T: DeserializeOwned>(&self, entry: &CacheEntry) -> Option<T> {
        match serde_json::from_slice(&entry.value) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %entry.key, error = %e, "cached value does not decode, discarding");
                self.fast.remove(&entry.key);
                self.stats.record_corrupt_entries(1);
                None
            }
        }
    }

    fn promote(&self, entry: Arc<CacheEntry>) {
        debug!(key = %entry.key, "promoting durable hit");
        if self.fast.put(entry).is_some() {
            self.record_evictions(1);
        }
    }

    fn store<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        dependencies: Vec<DependencyRef>,
        options: &EntryOptions,
        epoch: u64,
    ) {
        let _gate = self.gate.read();
        if self.epoch.load(Ordering::Acquire) != epoch {
            debug!(key, "cache invalidated during computation, not storing");
            return;
        }

        let payload = match serde_json::to_vec(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key, error = %e, "computed value does not serialize, not caching");
                return;
            }
        };

        let now: DateTime<Utc> = self.clock.now();
        let entry = Arc::new(CacheEntry::new(
            key,
            payload,
            now,
            options.ttl,
            dependencies,
            options.metadata.clone(),
        ));

        if self.fast.put(Arc::clone(&entry)).is_some() {
            self.record_evictions(1);
        }

        match self.durable.put(&entry, now) {
            Ok(evicted) => self.record_evictions(evicted.len() as u64),
            Err(e) => {
                warn!(key, error = %e, "durable write failed, value cached in memory only");
                self.stats.record_durable_write_failures(1);
                self.telemetry.increment(telemetry::L2_WRITE_ERROR, 1);
            }
        }
    }

    fn record_hit(&self, tier: Tier, took: Duration) {
        match tier {
            Tier::Fast => {
                self.stats.record_fast_hit(took);
                self.telemetry.increment(telemetry::L1_HIT, 1);
            }
            Tier::Durable => {
                self.stats.record_durable_hit(took);
                self.telemetry.increment(telemetry::L2_HIT, 1);
            }
        }
    }

    fn note_invalid(&self, key: &str, reason: &Validity) {
        debug!(key, ?reason, "dropped invalid entry");
        self.record_invalidations(1);
    }

    fn record_invalidations(&self, n: u64) {
        if n > 0 {
            self.stats.record_invalidations(n);
            self.telemetry.increment(telemetry::INVALIDATION, n);
        }
    }

    fn record_evictions(&self, n: u64) {
        if n > 0 {
            self.stats.record_evictions(n);
            self.telemetry.increment(telemetry::EVICTION, n);
        }
    }
}

impl std::fmt::Debug for MemoCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoCache")
            .field("config", &self.config)
            .field("fast_capacity", &self.fast.capacity())
            .field("fast_entries", &self.fast.len())
            .field("durable_entries", &self.durable.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::testing::RecordingSink;
    use memostore::ManualClock;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn open(dir: &TempDir, fast_capacity: usize) -> MemoCache {
        MemoCache::open(CacheConfig::new(dir.path()).with_fast_capacity(fast_capacity)).unwrap()
    }

    fn counted(calls: &AtomicUsize, value: u64) -> impl FnOnce() -> std::result::Result<u64, Infallible> + '_ {
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        }
    }

    #[test]
    fn test_second_call_is_fast_hit() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 2);
        let calls = AtomicUsize::new(0);

        assert_eq!(cache.get_or_compute("a", counted(&calls, 7)).unwrap(), 7);
        assert_eq!(cache.get_or_compute("a", counted(&calls, 8)).unwrap(), 7);

        let stats = cache.stats();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.fast_hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.fast_entries, 1);
        assert_eq!(stats.durable_entries, 1);
    }

    #[test]
    fn test_durable_hit_is_promoted() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1);
        let calls = AtomicUsize::new(0);

        cache.get_or_compute("a", counted(&calls, 1)).unwrap();
        cache.get_or_compute("b", counted(&calls, 2)).unwrap();
        assert!(!cache.fast.contains("a"));

        assert_eq!(cache.get_or_compute("a", counted(&calls, 99)).unwrap(), 1);
        assert!(cache.fast.contains("a"));

        let stats = cache.stats();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(stats.durable_hits, 1);
        assert_eq!(stats.evictions, 2);
        assert_eq!(stats.durable_hit_rate(), 1.0 / 3.0);
        assert_eq!(stats.fast_hit_rate(), 0.0);
        assert!(stats.avg_durable_hit_time > Duration::ZERO);
        assert_eq!(stats.avg_fast_hit_time, Duration::ZERO);
    }

    #[test]
    fn test_error_is_returned_and_not_cached() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 4);

        let err = cache
            .get_or_compute::<u64, _, _>("k", || Err("boom"))
            .unwrap_err();
        assert_eq!(err, "boom");
        assert_eq!(cache.stats().fast_entries, 0);
        assert_eq!(cache.stats().durable_entries, 0);

        let value: u64 = cache.get_or_compute("k", || Ok::<_, &str>(5)).unwrap();
        assert_eq!(value, 5);
    }

    #[test]
    fn test_ttl_with_manual_clock() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        let cache = open(&dir, 4).with_clock(clock.clone());
        let calls = AtomicUsize::new(0);
        let options = EntryOptions::new().ttl(Duration::from_secs(60));

        cache.get_or_compute_with("k", &options, counted(&calls, 1)).unwrap();
        clock.advance(Duration::from_secs(59));
        cache.get_or_compute_with("k", &options, counted(&calls, 2)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(1));
        let value = cache.get_or_compute_with("k", &options, counted(&calls, 3)).unwrap();
        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[test]
    fn test_type_mismatch_is_treated_as_corrupt() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 4);

        cache.get_or_compute("k", || Ok::<_, Infallible>("text".to_string())).unwrap();
        let value: u64 = cache.get_or_compute("k", || Ok::<_, Infallible>(3)).unwrap();

        assert_eq!(value, 3);
        let stats = cache.stats();
        assert_eq!(stats.corrupt_entries, 1);
        assert_eq!(stats.misses, 2);
    }

    #[test]
    fn test_oversized_value_counts_write_failure() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let cache = MemoCache::open(
            CacheConfig::new(dir.path()).with_durable_max_bytes(4),
        )
        .unwrap()
        .with_telemetry(sink.clone());

        let value = cache
            .get_or_compute("big", || Ok::<_, Infallible>("much longer than four".to_string()))
            .unwrap();
        assert_eq!(value, "much longer than four");

        let stats = cache.stats();
        assert_eq!(stats.durable_write_failures, 1);
        assert_eq!(stats.durable_entries, 0);
        assert_eq!(stats.fast_entries, 1);
        assert_eq!(sink.count(telemetry::L2_WRITE_ERROR), 1);
    }

    #[test]
    fn test_telemetry_names() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let cache = open(&dir, 4).with_telemetry(sink.clone());

        cache.get_or_compute("k", || Ok::<_, Infallible>(1u8)).unwrap();
        cache.get_or_compute("k", || Ok::<_, Infallible>(1u8)).unwrap();
        cache.invalidate("k");

        assert_eq!(sink.count(telemetry::MISS), 1);
        assert_eq!(sink.count(telemetry::L1_HIT), 1);
        assert_eq!(sink.count(telemetry::INVALIDATION), 1);
        let durations = sink.durations.lock();
        assert_eq!(durations.len(), 1);
        assert_eq!(durations[0].0, telemetry::COMPUTE_TIME);
    }

    #[test]
    fn test_metadata_is_stored() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 4);
        let options = EntryOptions::new().metadata("function", "parse_file");

        cache.get_or_compute_with("k", &options, || Ok::<_, Infallible>(1)).unwrap();

        match cache.fast.get("k", Utc::now()) {
            Lookup::Hit(entry) => assert_eq!(
                entry.metadata.get("function"),
                Some(&MetaValue::Text("parse_file".to_string()))
            ),
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[test]
    fn test_invalidate_and_clear() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 4);
        for key in ["ns:a", "ns:b", "other"] {
            cache.get_or_compute(key, || Ok::<_, Infallible>(0)).unwrap();
        }

        assert!(cache.contains("other"));
        assert!(cache.invalidate("other"));
        assert!(!cache.contains("other"));
        assert!(!cache.invalidate("other"));
        assert_eq!(cache.invalidate_matching(KeyPattern::prefix("ns:")), 2);
        assert_eq!(cache.stats().invalidations, 3);

        cache.get_or_compute("x", || Ok::<_, Infallible>(0)).unwrap();
        assert_eq!(cache.clear(), 1);
        assert_eq!(cache.stats().misses, 4);
    }

    #[test]
    fn test_invalidated_during_compute_is_not_stored() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 4);

        let value = cache
            .get_or_compute("k", || {
                cache.invalidate_matching("k");
                Ok::<_, Infallible>(1)
            })
            .unwrap();

        assert_eq!(value, 1);
        assert!(!cache.contains("k"));
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_key_pattern() {
        assert!(KeyPattern::from("ns:").matches("a:ns:b"));
        assert!(!KeyPattern::prefix("ns:").matches("a:ns:b"));
        assert!(KeyPattern::prefix("ns:").matches("ns:b"));
    }
}
