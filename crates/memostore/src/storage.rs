//! Durable tier implementation
//!
//! Directory layout, one pair of files per entry:
//! - `<sha256(key)>.blob`: value payload with a checksummed header
//! - `<sha256(key)>.meta`: JSON record (key, TTL, dependency snapshots,
//!   size, access order)
//!
//! Files are written to a `.tmp` sibling and renamed into place. The meta
//! record is written last, so an entry exists only once its meta is present.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::entry::{CacheEntry, CacheKey, DependencyRef, Metadata};
use crate::error::{Error, Result};
use crate::parser::{decode_blob, encode_blob};
use crate::validity::{self, Lookup, Validity};

/// Default byte cap (500 MiB)
pub const DEFAULT_MAX_BYTES: u64 = 500 * 1024 * 1024;

/// Meta record format version
const META_FORMAT: u32 = 1;

const BLOB_EXT: &str = "blob";
const META_EXT: &str = "meta";
const TMP_SUFFIX: &str = ".tmp";

/// On-disk metadata record, also kept in memory as the tier's index
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetaRecord {
    format: u32,
    key: CacheKey,
    created_at: DateTime<Utc>,
    ttl: Option<Duration>,
    dependencies: Vec<DependencyRef>,
    metadata: Metadata,
    size_bytes: u64,
    last_access: DateTime<Utc>,
    access_seq: u64,
}

impl MetaRecord {
    fn from_entry(entry: &CacheEntry, now: DateTime<Utc>, access_seq: u64) -> Self {
        Self {
            format: META_FORMAT,
            key: entry.key.clone(),
            created_at: entry.created_at,
            ttl: entry.ttl,
            dependencies: entry.dependencies.clone(),
            metadata: entry.metadata.clone(),
            size_bytes: entry.size_bytes,
            last_access: now,
            access_seq,
        }
    }

    /// Entry shell without the payload, for validity checks
    fn to_entry(&self, value: Vec<u8>) -> CacheEntry {
        CacheEntry {
            key: self.key.clone(),
            value,
            created_at: self.created_at,
            ttl: self.ttl,
            dependencies: self.dependencies.clone(),
            metadata: self.metadata.clone(),
            size_bytes: self.size_bytes,
        }
    }
}

#[derive(Debug, Default)]
struct Index {
    records: HashMap<CacheKey, MetaRecord>,
    total_bytes: u64,
    next_seq: u64,
}

impl Index {
    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Least recently used keys whose removal lets `incoming` bytes fit
    /// under `max_bytes`, not counting `replacing` (which is overwritten)
    fn victims(&self, max_bytes: u64, incoming: u64, replacing: Option<&str>) -> Vec<CacheKey> {
        let replaced = replacing
            .and_then(|key| self.records.get(key))
            .map_or(0, |r| r.size_bytes);
        let mut used = self.total_bytes.saturating_sub(replaced);

        let mut candidates: Vec<&MetaRecord> = self
            .records
            .values()
            .filter(|r| Some(r.key.as_str()) != replacing)
            .collect();
        candidates.sort_by_key(|r| r.access_seq);

        let mut victims = Vec::new();
        for record in candidates {
            if used + incoming <= max_bytes {
                break;
            }
            used = used.saturating_sub(record.size_bytes);
            victims.push(record.key.clone());
        }
        victims
    }
}

/// Size-capped persistent key→entry store
///
/// All mutation goes through a single lock; reads take the same lock because
/// a hit updates the access order.
pub struct DurableTier {
    /// Root directory for entry files
    root: PathBuf,

    /// Byte cap over all payloads
    max_bytes: u64,

    /// In-memory index of committed entries
    index: RwLock<Index>,
}

impl DurableTier {
    /// Open or create a durable tier rooted at `root`
    ///
    /// Rebuilds the index from meta records. Corrupt records, orphan blobs and
    /// leftover temp files are removed. If the stored entries exceed
    /// `max_bytes` the least recently used are evicted.
    pub fn open<P: AsRef<Path>>(root: P, max_bytes: u64) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| Error::io(&root, e))?;

        let index = Self::scan(&root)?;
        let tier = DurableTier {
            root,
            max_bytes,
            index: RwLock::new(index),
        };

        {
            let mut index = tier.index.write();
            let evicted = tier.make_room(&mut index, 0);
            info!(
                root = %tier.root.display(),
                entries = index.records.len(),
                bytes = index.total_bytes,
                evicted = evicted.len(),
                "durable tier opened"
            );
        }

        Ok(tier)
    }

    fn scan(root: &Path) -> Result<Index> {
        let mut index = Index::default();
        let mut blobs = Vec::new();

        let dir = fs::read_dir(root).map_err(|e| Error::io(root, e))?;
        for dirent in dir {
            let path = dirent.map_err(|e| Error::io(root, e))?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };

            if name.ends_with(TMP_SUFFIX) {
                debug!(path = %path.display(), "removing interrupted write");
                remove_quietly(&path);
                continue;
            }

            match path.extension().and_then(|e| e.to_str()) {
                Some(META_EXT) => match read_meta(&path) {
                    Ok(record) if path.with_extension(BLOB_EXT).is_file() => {
                        index.next_seq = index.next_seq.max(record.access_seq + 1);
                        index.total_bytes += record.size_bytes;
                        index.records.insert(record.key.clone(), record);
                    }
                    Ok(_) => {
                        warn!(path = %path.display(), "meta record without blob, removing");
                        remove_quietly(&path);
                    }
                    Err(e) => {
                        warn!(error = %e, "discarding corrupt durable entry");
                        remove_quietly(&path);
                        remove_quietly(&path.with_extension(BLOB_EXT));
                    }
                },
                Some(BLOB_EXT) => blobs.push(path),
                _ => {}
            }
        }

        for blob in blobs {
            if !blob.with_extension(META_EXT).is_file() {
                debug!(path = %blob.display(), "removing orphan blob");
                remove_quietly(&blob);
            }
        }

        Ok(index)
    }

    /// Look up `key`, validating it as of `now`
    ///
    /// Invalid and unreadable entries are removed and reported as such. A hit
    /// moves the entry to the most-recently-used position, on disk as well.
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Lookup {
        let mut index = self.index.write();

        let Some(record) = index.records.get(key) else {
            return Lookup::Absent;
        };

        let reason = validity::check(&record.to_entry(Vec::new()), now);
        if !reason.is_valid() {
            debug!(key, ?reason, "durable entry failed validation");
            self.remove_locked(&mut index, key);
            return Lookup::Invalid(reason);
        }

        let blob_path = self.blob_path(key);
        let payload = fs::read(&blob_path)
            .map_err(|e| Error::io(&blob_path, e))
            .and_then(|raw| {
                decode_blob(&raw)
                    .map(<[u8]>::to_vec)
                    .map_err(|reason| Error::corrupt(&blob_path, reason))
            });

        let value = match payload {
            Ok(value) if value.len() as u64 == record.size_bytes => value,
            Ok(value) => {
                let err = Error::corrupt(
                    &blob_path,
                    format!("payload is {} bytes, record says {}", value.len(), record.size_bytes),
                );
                warn!(key, error = %err, "removing corrupt durable entry");
                self.remove_locked(&mut index, key);
                return Lookup::Corrupt;
            }
            Err(err) => {
                warn!(key, error = %err, "removing corrupt durable entry");
                self.remove_locked(&mut index, key);
                return Lookup::Corrupt;
            }
        };

        let seq = index.bump_seq();
        let record = match index.records.get_mut(key) {
            Some(record) => record,
            None => return Lookup::Absent,
        };
        record.access_seq = seq;
        record.last_access = now;
        let entry = record.to_entry(value);

        // Access order is advisory: replace the record without syncing it.
        let meta_path = self.meta_path(key);
        if let Err(e) = serde_json::to_vec(&*record)
            .map_err(Error::from)
            .and_then(|bytes| write_replacing(&meta_path, &bytes, false))
        {
            // Access order is still correct in memory for this process.
            warn!(key, error = %e, "failed to persist access time");
        }

        Lookup::Hit(Arc::new(entry))
    }

    /// Persist `entry`, evicting least-recently-used entries to make room
    ///
    /// Returns the keys evicted for space. Any previous entry under the same
    /// key is replaced. Victims are only removed once the new entry is
    /// committed; on error nothing of the new entry is left on disk and no
    /// other entry is touched.
    pub fn put(&self, entry: &CacheEntry, now: DateTime<Utc>) -> Result<Vec<CacheKey>> {
        if entry.size_bytes > self.max_bytes {
            return Err(Error::EntryTooLarge {
                size: entry.size_bytes,
                max: self.max_bytes,
            });
        }

        let mut index = self.index.write();
        let victims =
            index.victims(self.max_bytes, entry.size_bytes, Some(entry.key.as_str()));

        let seq = index.bump_seq();
        let record = MetaRecord::from_entry(entry, now, seq);
        let blob_path = self.blob_path(&entry.key);
        let meta_path = self.meta_path(&entry.key);

        let written = write_atomic(&blob_path, &encode_blob(&entry.value)).and_then(|()| {
            let bytes = serde_json::to_vec(&record)?;
            write_atomic(&meta_path, &bytes)
        });

        if let Err(e) = written {
            // A previous entry under this key may be half overwritten.
            self.remove_locked(&mut index, &entry.key);
            remove_quietly(&blob_path);
            remove_quietly(&meta_path);
            return Err(e);
        }

        self.evict(&mut index, &victims);
        let size = record.size_bytes;
        if let Some(old) = index.records.insert(entry.key.clone(), record) {
            index.total_bytes = index.total_bytes.saturating_sub(old.size_bytes);
        }
        index.total_bytes += size;

        Ok(victims)
    }

    /// Evict in access order until `incoming` more bytes fit under the cap
    fn make_room(&self, index: &mut Index, incoming: u64) -> Vec<CacheKey> {
        let victims = index.victims(self.max_bytes, incoming, None);
        self.evict(index, &victims);
        victims
    }

    fn evict(&self, index: &mut Index, victims: &[CacheKey]) {
        for victim in victims {
            debug!(key = %victim, "evicting durable entry for space");
            self.remove_locked(index, victim);
        }
    }

    /// Remove `key`; returns whether it was present
    pub fn remove(&self, key: &str) -> bool {
        let mut index = self.index.write();
        self.remove_locked(&mut index, key)
    }

    fn remove_locked(&self, index: &mut Index, key: &str) -> bool {
        let Some(record) = index.records.remove(key) else {
            return false;
        };
        index.total_bytes = index.total_bytes.saturating_sub(record.size_bytes);

        // Meta first: without it the blob is an orphan and is swept on open.
        remove_quietly(&self.meta_path(key));
        remove_quietly(&self.blob_path(key));
        true
    }

    /// Remove every entry whose key satisfies `pred`; returns removed keys
    pub fn remove_matching<F>(&self, pred: F) -> Vec<CacheKey>
    where
        F: Fn(&str) -> bool,
    {
        let mut index = self.index.write();
        let keys: Vec<CacheKey> = index
            .records
            .keys()
            .filter(|k| pred(k))
            .cloned()
            .collect();

        for key in &keys {
            self.remove_locked(&mut index, key);
        }
        keys
    }

    /// Remove every entry that fails validation as of `now`
    pub fn remove_invalid(&self, now: DateTime<Utc>) -> Vec<(CacheKey, Validity)> {
        let mut index = self.index.write();
        let failed: Vec<(CacheKey, Validity)> = index
            .records
            .values()
            .filter_map(|r| {
                let reason = validity::check(&r.to_entry(Vec::new()), now);
                (!reason.is_valid()).then(|| (r.key.clone(), reason))
            })
            .collect();

        for (key, _) in &failed {
            self.remove_locked(&mut index, key);
        }
        failed
    }

    /// Remove all entries; returns how many were removed
    pub fn clear(&self) -> usize {
        let mut index = self.index.write();
        let keys: Vec<CacheKey> = index.records.keys().cloned().collect();
        for key in &keys {
            self.remove_locked(&mut index, key);
        }
        keys.len()
    }

    /// Whether `key` is currently stored (no validation)
    pub fn contains(&self, key: &str) -> bool {
        self.index.read().records.contains_key(key)
    }

    /// Stored keys, least recently used first
    pub fn keys(&self) -> Vec<CacheKey> {
        let index = self.index.read();
        let mut records: Vec<&MetaRecord> = index.records.values().collect();
        records.sort_by_key(|r| r.access_seq);
        records.into_iter().map(|r| r.key.clone()).collect()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.index.read().records.len()
    }

    /// Check if the tier is empty
    pub fn is_empty(&self) -> bool {
        self.index.read().records.is_empty()
    }

    /// Sum of stored payload sizes
    pub fn total_bytes(&self) -> u64 {
        self.index.read().total_bytes
    }

    /// Configured byte cap
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_stem(key: &str) -> String {
        hex::encode(Sha256::digest(key.as_bytes()))
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{BLOB_EXT}", Self::file_stem(key)))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{META_EXT}", Self::file_stem(key)))
    }
}

fn read_meta(path: &Path) -> Result<MetaRecord> {
    let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
    let record: MetaRecord =
        serde_json::from_slice(&bytes).map_err(|e| Error::corrupt(path, e.to_string()))?;
    if record.format != META_FORMAT {
        return Err(Error::corrupt(
            path,
            format!("unsupported meta format {}", record.format),
        ));
    }
    Ok(record)
}

/// Write `bytes` to a temp sibling, fsync, then rename over `path`
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    write_replacing(path, bytes, true)
}

/// Write to a temp sibling and rename over `path`, syncing first if `sync`
fn write_replacing(path: &Path, bytes: &[u8], sync: bool) -> Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(TMP_SUFFIX);
    let tmp = PathBuf::from(tmp_name);

    let result = File::create(&tmp)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            if sync {
                file.sync_all()?;
            }
            Ok(())
        })
        .and_then(|()| fs::rename(&tmp, path));

    result.map_err(|e| {
        remove_quietly(&tmp);
        Error::io(path, e)
    })
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove cache file");
        }
    }
}
