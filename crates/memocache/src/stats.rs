//! Cache statistics tracking

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Counters for cache activity
///
/// All counters are monotonic until [`CacheStats::reset`]. When disabled,
/// `record_*` calls are no-ops.
#[derive(Debug)]
pub struct CacheStats {
    enabled: AtomicBool,
    fast_hits: AtomicU64,
    durable_hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    evictions: AtomicU64,
    durable_write_failures: AtomicU64,
    corrupt_entries: AtomicU64,
    computes: AtomicU64,
    compute_nanos: AtomicU64,
    fast_hit_nanos: AtomicU64,
    durable_hit_nanos: AtomicU64,
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new(true)
    }
}

macro_rules! recorder {
    ($(#[$doc:meta])* $name:ident => $field:ident) => {
        $(#[$doc])*
        pub fn $name(&self, n: u64) {
            if self.enabled() {
                self.$field.fetch_add(n, Ordering::Relaxed);
            }
        }
    };
}

impl CacheStats {
    /// Create new stats tracker
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            fast_hits: AtomicU64::new(0),
            durable_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            durable_write_failures: AtomicU64::new(0),
            corrupt_entries: AtomicU64::new(0),
            computes: AtomicU64::new(0),
            compute_nanos: AtomicU64::new(0),
            fast_hit_nanos: AtomicU64::new(0),
            durable_hit_nanos: AtomicU64::new(0),
        }
    }

    /// Whether counters are being updated
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    recorder!(
        /// Record full misses
        record_misses => misses
    );
    recorder!(
        /// Record removed-because-invalid entries (lazy, explicit or pattern)
        record_invalidations => invalidations
    );
    recorder!(
        /// Record capacity evictions
        record_evictions => evictions
    );
    recorder!(
        /// Record failed durable writes
        record_durable_write_failures => durable_write_failures
    );
    recorder!(
        /// Record unreadable durable entries
        record_corrupt_entries => corrupt_entries
    );

    /// Record one completed computation
    pub fn record_compute(&self, took: Duration) {
        if self.enabled() {
            self.computes.fetch_add(1, Ordering::Relaxed);
            self.compute_nanos.fetch_add(nanos(took), Ordering::Relaxed);
        }
    }

    /// Record one fast-tier hit and how long the lookup took
    pub fn record_fast_hit(&self, took: Duration) {
        if self.enabled() {
            self.fast_hits.fetch_add(1, Ordering::Relaxed);
            self.fast_hit_nanos.fetch_add(nanos(took), Ordering::Relaxed);
        }
    }

    /// Record one durable-tier hit and how long the lookup took
    pub fn record_durable_hit(&self, took: Duration) {
        if self.enabled() {
            self.durable_hits.fetch_add(1, Ordering::Relaxed);
            self.durable_hit_nanos.fetch_add(nanos(took), Ordering::Relaxed);
        }
    }

    /// Reset all statistics
    pub fn reset(&self) {
        for counter in [
            &self.fast_hits,
            &self.durable_hits,
            &self.misses,
            &self.invalidations,
            &self.evictions,
            &self.durable_write_failures,
            &self.corrupt_entries,
            &self.computes,
            &self.compute_nanos,
            &self.fast_hit_nanos,
            &self.durable_hit_nanos,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Point-in-time copy of the counters; tier sizes are filled by the caller
    pub fn snapshot(&self) -> StatsSnapshot {
        let fast_hits = self.fast_hits.load(Ordering::Relaxed);
        let durable_hits = self.durable_hits.load(Ordering::Relaxed);

        StatsSnapshot {
            fast_hits,
            durable_hits,
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            durable_write_failures: self.durable_write_failures.load(Ordering::Relaxed),
            corrupt_entries: self.corrupt_entries.load(Ordering::Relaxed),
            avg_compute_time: average(&self.compute_nanos, self.computes.load(Ordering::Relaxed)),
            avg_fast_hit_time: average(&self.fast_hit_nanos, fast_hits),
            avg_durable_hit_time: average(&self.durable_hit_nanos, durable_hits),
            fast_entries: 0,
            durable_entries: 0,
            durable_bytes: 0,
        }
    }
}

fn nanos(took: Duration) -> u64 {
    u64::try_from(took.as_nanos()).unwrap_or(u64::MAX)
}

fn average(total_nanos: &AtomicU64, count: u64) -> Duration {
    match count {
        0 => Duration::ZERO,
        n => Duration::from_nanos(total_nanos.load(Ordering::Relaxed) / n),
    }
}

/// Statistics at one point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Lookups served by the fast tier
    pub fast_hits: u64,
    /// Lookups served by the durable tier
    pub durable_hits: u64,
    /// Lookups that required computation
    pub misses: u64,
    /// Entries removed because they were invalid or explicitly invalidated
    pub invalidations: u64,
    /// Entries removed for capacity
    pub evictions: u64,
    /// Durable writes that failed (value still returned and fast-cached)
    pub durable_write_failures: u64,
    /// Durable entries found unreadable
    pub corrupt_entries: u64,
    /// Mean duration of computations
    pub avg_compute_time: Duration,
    /// Mean lookup time of fast-tier hits
    pub avg_fast_hit_time: Duration,
    /// Mean lookup time of durable-tier hits, promotion included
    pub avg_durable_hit_time: Duration,
    /// Current fast-tier entry count
    pub fast_entries: usize,
    /// Current durable-tier entry count
    pub durable_entries: usize,
    /// Current durable-tier payload bytes
    pub durable_bytes: u64,
}

impl StatsSnapshot {
    /// `(fast_hits + durable_hits) / (fast_hits + durable_hits + misses)`,
    /// or 0.0 before any lookup
    pub fn hit_rate(&self) -> f64 {
        self.rate(self.fast_hits + self.durable_hits)
    }

    /// Share of lookups served by the fast tier
    pub fn fast_hit_rate(&self) -> f64 {
        self.rate(self.fast_hits)
    }

    /// Share of lookups served by the durable tier
    pub fn durable_hit_rate(&self) -> f64 {
        self.rate(self.durable_hits)
    }

    /// Total lookups
    pub fn requests(&self) -> u64 {
        self.fast_hits + self.durable_hits + self.misses
    }

    fn rate(&self, count: u64) -> f64 {
        match self.requests() {
            0 => 0.0,
            total => count as f64 / total as f64,
        }
    }
}
