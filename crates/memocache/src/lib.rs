//! # memocache
//!
//! Read-through cache for expensive, deterministic computations.
//!
//! ## Architecture
//! - **Fast tier**: AHash-backed LRU of validated entries, bounded by count
//! - **Durable tier**: on-disk store from `memostore`, bounded by bytes
//! - **Invalidation**: TTL, dependency modification time and content hash,
//!   checked on every lookup in either tier
//! - **Single-flight**: concurrent misses on one key run one computation
//! - **Stats**: atomic hit/miss counters plus an optional telemetry sink
//!
//! ```no_run
//! use memocache::{fingerprint, CacheConfig, MemoCache};
//!
//! let cache = MemoCache::open(CacheConfig::default())?;
//! let key = fingerprint("square", &12u64)?;
//! let n: u64 = cache.get_or_compute(&key, || Ok::<_, memocache::Error>(12 * 12))?;
//! assert_eq!(n, 144);
//! # Ok::<(), memocache::Error>(())
//! ```

#![warn(missing_docs)]

mod cache;
mod config;
mod error;
mod fast;
mod fingerprint;
pub mod global;
mod lru;
mod singleflight;
mod stats;
mod strict;
pub mod telemetry;
mod wrapper;

pub use cache::{EntryOptions, KeyPattern, MemoCache};
pub use config::{
    default_storage_root, CacheConfig, DEFAULT_DURABLE_MAX_BYTES, DEFAULT_FAST_CAPACITY,
};
pub use error::{Error, Result};
pub use fingerprint::{fingerprint, Fingerprint};
pub use stats::{CacheStats, StatsSnapshot};
pub use telemetry::{NoopSink, TelemetrySink, TracingSink};
pub use wrapper::{with_cache, CachedBuilder, CachedFn};

pub use memostore::{
    CacheKey, Clock, Dependency, DependencyRef, ManualClock, MetaValue, Metadata, SystemClock,
    Validity,
};
