//! Process-wide default cache
//!
//! [`instance`] opens a cache from [`CacheConfig::default`] on first use.
//! [`init`] replaces it with an explicitly configured one and [`reset`] drops
//! it, so tests can start from a clean slate. Handles already given out keep
//! working against the cache they were obtained from.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::cache::MemoCache;
use crate::config::CacheConfig;
use crate::error::Result;

static DEFAULT: RwLock<Option<Arc<MemoCache>>> = parking_lot::const_rwlock(None);

/// Open a cache from `config` and make it the process default
pub fn init(config: CacheConfig) -> Result<Arc<MemoCache>> {
    let cache = Arc::new(MemoCache::open(config)?);
    *DEFAULT.write() = Some(Arc::clone(&cache));
    Ok(cache)
}

/// The process default, opened with default configuration if not yet set
pub fn instance() -> Result<Arc<MemoCache>> {
    if let Some(cache) = DEFAULT.read().as_ref() {
        return Ok(Arc::clone(cache));
    }

    let mut slot = DEFAULT.write();
    if let Some(cache) = slot.as_ref() {
        return Ok(Arc::clone(cache));
    }
    let cache = Arc::new(MemoCache::open(CacheConfig::default())?);
    *slot = Some(Arc::clone(&cache));
    Ok(cache)
}

/// Drop the process default; returns it if one was set
pub fn reset() -> Option<Arc<MemoCache>> {
    DEFAULT.write().take()
}

/// Whether a process default currently exists
pub fn is_initialized() -> bool {
    DEFAULT.read().is_some()
}
