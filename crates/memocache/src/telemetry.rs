//! Telemetry sink seam
//!
//! The cache forwards counters and a compute-time histogram to whatever sink
//! it was built with. Backends (OpenTelemetry, StatsD, ...) live outside this
//! crate and implement [`TelemetrySink`].

use std::time::Duration;

/// Fast-tier hit counter
pub const L1_HIT: &str = "cache.l1.hit";
/// Durable-tier hit counter
pub const L2_HIT: &str = "cache.l2.hit";
/// Full-miss counter
pub const MISS: &str = "cache.miss";
/// Invalidation counter
pub const INVALIDATION: &str = "cache.invalidation";
/// Capacity eviction counter
pub const EVICTION: &str = "cache.eviction";
/// Durable write failure counter
pub const L2_WRITE_ERROR: &str = "cache.l2.write_error";
/// Compute duration histogram
pub const COMPUTE_TIME: &str = "cache.compute_time";

/// Receiver of cache counters and histograms
pub trait TelemetrySink: Send + Sync {
    /// Add `by` to counter `name`
    fn increment(&self, name: &'static str, by: u64);

    /// Record one observation in duration histogram `name`
    fn record_duration(&self, name: &'static str, value: Duration);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn increment(&self, _name: &'static str, _by: u64) {}

    fn record_duration(&self, _name: &'static str, _value: Duration) {}
}

/// Emits each event as a TRACE-level `tracing` event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn increment(&self, name: &'static str, by: u64) {
        tracing::trace!(target: "memocache::telemetry", metric = name, by, "counter");
    }

    fn record_duration(&self, name: &'static str, value: Duration) {
        tracing::trace!(
            target: "memocache::telemetry",
            metric = name,
            seconds = value.as_secs_f64(),
            "histogram"
        );
    }
}
