//! Invalidation checks
//!
//! An entry is served only if all three checks pass:
//! - TTL: no TTL, or `now < created_at + ttl`
//! - freshness: every tracked dependency still has its snapshotted mtime
//! - content: every dependency with a stored hash re-hashes to the same value
//!
//! The checks read dependency state and nothing else. Tiers call them and act
//! on the result.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::entry::{hash_file, modified_at, CacheEntry};

/// Outcome of validating one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validity {
    /// Entry may be served
    Valid,
    /// TTL elapsed
    Expired,
    /// Dependency no longer exists
    DependencyMissing(PathBuf),
    /// Dependency modification time differs from the snapshot
    DependencyChanged(PathBuf),
    /// Dependency bytes hash differently from the snapshot
    ContentChanged(PathBuf),
}

impl Validity {
    /// True for [`Validity::Valid`]
    pub fn is_valid(&self) -> bool {
        matches!(self, Validity::Valid)
    }
}

/// Result of a tier lookup
#[derive(Debug, Clone)]
pub enum Lookup {
    /// Valid entry
    Hit(Arc<CacheEntry>),
    /// Entry existed but failed validation and was removed
    Invalid(Validity),
    /// Entry existed but could not be read back and was removed
    Corrupt,
    /// No entry under this key
    Absent,
}

/// Run all checks against `entry` as of `now`
pub fn check(entry: &CacheEntry, now: DateTime<Utc>) -> Validity {
    if let Some(expires_at) = entry.expires_at() {
        if now >= expires_at {
            return Validity::Expired;
        }
    }

    for dep in &entry.dependencies {
        let Some(snapshot) = dep.modified else {
            continue;
        };
        match modified_at(&dep.path) {
            None => return Validity::DependencyMissing(dep.path.clone()),
            Some(current) if current != snapshot => {
                return Validity::DependencyChanged(dep.path.clone())
            }
            Some(_) => {}
        }
    }

    for dep in &entry.dependencies {
        let Some(expected) = &dep.content_hash else {
            continue;
        };
        match hash_file(&dep.path) {
            Ok(actual) if actual == *expected => {}
            Ok(_) => return Validity::ContentChanged(dep.path.clone()),
            Err(_) => return Validity::DependencyMissing(dep.path.clone()),
        }
    }

    Validity::Valid
}

/// Shorthand for `check(entry, now).is_valid()`
pub fn is_valid(entry: &CacheEntry, now: DateTime<Utc>) -> bool {
    check(entry, now).is_valid()
}
