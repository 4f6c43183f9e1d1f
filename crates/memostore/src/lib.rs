//! # memostore
//!
//! Entry model, invalidation checks and the durable tier of memocache.
//!
//! ## Pieces
//! - **Entries**: serialized value plus TTL, dependency snapshots and metadata
//! - **Validity**: TTL, dependency-freshness and content-fingerprint checks
//! - **Durable tier**: one checksummed blob and one JSON meta record per entry,
//!   capped by total payload bytes, evicting least recently used first
//! - **Clock**: pluggable time source so expiry can be simulated

#![warn(missing_docs)]

mod clock;
mod entry;
mod error;
mod parser;
mod storage;
pub mod validity;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::{
    hash_file, modified_at, CacheEntry, CacheKey, Dependency, DependencyRef, MetaValue, Metadata,
};
pub use error::{Error, Result};
pub use storage::{DurableTier, DEFAULT_MAX_BYTES};
pub use validity::{Lookup, Validity};
