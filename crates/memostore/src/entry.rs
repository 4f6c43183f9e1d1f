//! Cache entry model
//!
//! An entry is immutable once built. Invalidation removes it, it is never
//! edited in place; only the durable tier's access bookkeeping changes.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Opaque string identifying one cached computation
pub type CacheKey = String;

/// Scalar metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    /// Boolean flag
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// Text
    Text(String),
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        MetaValue::Bool(v)
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        MetaValue::Int(v)
    }
}

impl From<i32> for MetaValue {
    fn from(v: i32) -> Self {
        MetaValue::Int(v.into())
    }
}

impl From<u32> for MetaValue {
    fn from(v: u32) -> Self {
        MetaValue::Int(v.into())
    }
}

impl From<f64> for MetaValue {
    fn from(v: f64) -> Self {
        MetaValue::Float(v)
    }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        MetaValue::Text(v.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        MetaValue::Text(v)
    }
}

/// String to scalar map attached to an entry
pub type Metadata = BTreeMap<String, MetaValue>;

/// External resource an entry depends on, as requested by the caller
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    /// Path of the resource
    pub path: PathBuf,
    /// Also fingerprint the resource's bytes
    pub track_content: bool,
}

impl Dependency {
    /// Track a file by modification time only
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            track_content: false,
        }
    }

    /// Additionally track the file's content hash
    ///
    /// Hashing reads the whole file on every lookup; reserve it for small or
    /// critical inputs.
    pub fn with_content_hash(mut self) -> Self {
        self.track_content = true;
        self
    }

    /// Capture the resource's current freshness signals
    ///
    /// A resource that cannot be stat'ed is recorded as untracked.
    pub fn snapshot(&self) -> DependencyRef {
        let modified = modified_at(&self.path);
        let content_hash = if self.track_content && modified.is_some() {
            hash_file(&self.path).ok()
        } else {
            None
        };

        DependencyRef {
            path: self.path.clone(),
            modified,
            content_hash,
        }
    }
}

impl From<PathBuf> for Dependency {
    fn from(path: PathBuf) -> Self {
        Dependency::file(path)
    }
}

impl From<&Path> for Dependency {
    fn from(path: &Path) -> Self {
        Dependency::file(path)
    }
}

impl From<&PathBuf> for Dependency {
    fn from(path: &PathBuf) -> Self {
        Dependency::file(path)
    }
}

impl From<&str> for Dependency {
    fn from(path: &str) -> Self {
        Dependency::file(path)
    }
}

/// Snapshot of a dependency taken when the entry was created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRef {
    /// Path of the resource
    pub path: PathBuf,
    /// Modification instant at snapshot time; `None` means not tracked
    pub modified: Option<DateTime<Utc>>,
    /// SHA-256 of the resource's bytes at snapshot time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

/// A cached computation result and everything needed to judge its validity
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Key this entry is stored under
    pub key: CacheKey,
    /// Serialized value
    pub value: Vec<u8>,
    /// Creation instant
    pub created_at: DateTime<Utc>,
    /// Lifetime, if bounded
    pub ttl: Option<Duration>,
    /// Resources whose change invalidates the entry
    pub dependencies: Vec<DependencyRef>,
    /// Caller-supplied annotations
    pub metadata: Metadata,
    /// Payload size used for capacity accounting
    pub size_bytes: u64,
}

impl CacheEntry {
    /// Build an entry; `size_bytes` is derived from the payload
    pub fn new(
        key: impl Into<CacheKey>,
        value: Vec<u8>,
        created_at: DateTime<Utc>,
        ttl: Option<Duration>,
        dependencies: Vec<DependencyRef>,
        metadata: Metadata,
    ) -> Self {
        let size_bytes = value.len() as u64;
        Self {
            key: key.into(),
            value,
            created_at,
            ttl,
            dependencies,
            metadata,
            size_bytes,
        }
    }

    /// Instant after which the TTL check fails
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl = chrono::Duration::from_std(self.ttl?).ok()?;
        self.created_at.checked_add_signed(ttl)
    }
}

/// Current modification instant of a path
pub fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// SHA-256 of a file's bytes as lowercase hex
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
