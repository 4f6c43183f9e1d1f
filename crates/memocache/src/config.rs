//! Cache configuration

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default fast-tier capacity (entries)
pub const DEFAULT_FAST_CAPACITY: usize = 128;

/// Default durable-tier cap (bytes)
pub const DEFAULT_DURABLE_MAX_BYTES: u64 = memostore::DEFAULT_MAX_BYTES;

/// Construction options for [`MemoCache`](crate::MemoCache)
///
/// Deserializable from TOML; missing fields take their defaults:
///
/// ```toml
/// fast_capacity = 256
/// durable_max_bytes = 104857600
/// storage_root = "/var/cache/specify"
/// enable_stats = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Maximum fast-tier entries
    pub fast_capacity: usize,
    /// Maximum total durable payload bytes
    pub durable_max_bytes: u64,
    /// Directory holding the durable tier
    pub storage_root: PathBuf,
    /// Maintain hit/miss counters
    pub enable_stats: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fast_capacity: DEFAULT_FAST_CAPACITY,
            durable_max_bytes: DEFAULT_DURABLE_MAX_BYTES,
            storage_root: default_storage_root(),
            enable_stats: true,
        }
    }
}

impl CacheConfig {
    /// Defaults rooted at `storage_root`
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self::default().with_storage_root(storage_root)
    }

    /// Set the fast-tier capacity
    pub fn with_fast_capacity(mut self, capacity: usize) -> Self {
        self.fast_capacity = capacity;
        self
    }

    /// Set the durable-tier byte cap
    pub fn with_durable_max_bytes(mut self, max: u64) -> Self {
        self.durable_max_bytes = max;
        self
    }

    /// Set the durable-tier directory
    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = root.into();
        self
    }

    /// Enable or disable statistics
    pub fn with_stats(mut self, enabled: bool) -> Self {
        self.enable_stats = enabled;
        self
    }

    /// Reject values the tiers cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.fast_capacity == 0 {
            return Err(Error::InvalidConfig(
                "fast_capacity must be at least 1".to_string(),
            ));
        }
        if self.durable_max_bytes == 0 {
            return Err(Error::InvalidConfig(
                "durable_max_bytes must be at least 1".to_string(),
            ));
        }
        if self.storage_root.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("storage_root is empty".to_string()));
        }
        Ok(())
    }

    /// Parse from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: CacheConfig = toml::from_str(text).map_err(|e| Error::Config {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&text).map_err(|e| match e {
            Error::Config { reason, .. } => Error::Config {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }
}

/// `<platform cache dir>/memocache`, or `./.memocache` when there is none
pub fn default_storage_root() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("memocache"))
        .unwrap_or_else(|| PathBuf::from(".memocache"))
}
