//! On-disk artifact cache.
//!
//! Each entry lives in `<cache_dir>/entries/<key>.bin`, where `key` is the
//! hash of the artifact id. A file is a 4-byte little-endian header length,
//! a bincode header (magic, format version, body checksum), then the bincode
//! body. Entries that fail any check are discarded on load and rebuilt.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use super::{ArtifactCache, CacheEntry, Payload};
use crate::error::{Error, Result};
use crate::fingerprint::{FingerprintSnapshot, FingerprintStore};
use crate::graph::{ArtifactId, NodeKey};

/// Magic bytes identifying a rebundle cache entry.
const ENTRY_MAGIC: [u8; 4] = *b"RBND";

/// Increment on breaking changes to the header or body layout.
const ENTRY_FORMAT_VERSION: u32 = 2;

const ENTRIES_DIR: &str = "entries";
const ENTRY_EXT: &str = "bin";

#[derive(Debug, Serialize, Deserialize)]
struct EntryHeader {
    magic: [u8; 4],
    format_version: u32,
    checksum: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    id: ArtifactId,
    valid: bool,
    snapshot: FingerprintSnapshot,
    sources: BTreeSet<NodeKey>,
    payload: Vec<u8>,
}

/// Result of restoring a cache from disk.
#[derive(Debug, Default)]
pub struct LoadedCache {
    /// Restored entries, valid and stale alike.
    pub cache: ArtifactCache,

    /// Entries whose snapshot matches the current fingerprints.
    pub restored: usize,

    /// Entries kept but marked invalid because an input changed while the
    /// process was down.
    pub stale: usize,

    /// Files that failed validation and were removed.
    pub corrupted: Vec<PathBuf>,
}

/// Reads and writes the artifact cache directory.
pub struct CachePersistence {
    entries_dir: PathBuf,
}

impl CachePersistence {
    /// Persistence rooted at `cache_dir`.
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            entries_dir: cache_dir.join(ENTRIES_DIR),
        }
    }

    /// File that holds the entry for `id`.
    pub fn entry_path(&self, id: &ArtifactId) -> PathBuf {
        self.entries_dir
            .join(format!("{:016x}.{ENTRY_EXT}", xxh3_64(id.as_str().as_bytes())))
    }

    /// Write every entry of `cache` and delete files of entries it no longer
    /// holds. Returns the number of entries written.
    pub fn save(&self, cache: &ArtifactCache) -> Result<usize> {
        fs::create_dir_all(&self.entries_dir)?;

        let entries = cache.entries();
        for (id, entry) in &entries {
            self.write_entry(id, entry)?;
        }

        let live: Vec<ArtifactId> = entries.into_iter().map(|(id, _)| id).collect();
        let removed = self.gc(&live)?;
        if removed > 0 {
            tracing::debug!("Removed {} orphaned cache entries", removed);
        }
        Ok(live.len())
    }

    fn write_entry(&self, id: &ArtifactId, entry: &CacheEntry) -> Result<()> {
        let body = PersistedEntry {
            id: id.clone(),
            valid: entry.valid,
            snapshot: entry.snapshot.clone(),
            sources: entry.sources.clone(),
            payload: entry.payload.as_bytes().to_vec(),
        };
        let body_bytes = bincode::serde::encode_to_vec(&body, bincode::config::standard())
            .map_err(|e| Error::Serialization(e.to_string()))?;

        let header = EntryHeader {
            magic: ENTRY_MAGIC,
            format_version: ENTRY_FORMAT_VERSION,
            checksum: xxh3_64(&body_bytes),
        };
        let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
            .map_err(|e| Error::Serialization(e.to_string()))?;

        let header_len = header_bytes.len() as u32;
        let mut output = Vec::with_capacity(4 + header_bytes.len() + body_bytes.len());
        output.extend_from_slice(&header_len.to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(&body_bytes);

        let path = self.entry_path(id);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &output)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn read_entry(path: &Path) -> Result<PersistedEntry> {
        let corrupt = |reason: &str| Error::CacheCorruption {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        let raw = fs::read(path)?;
        if raw.len() < 4 {
            return Err(corrupt("truncated header length"));
        }
        let header_len = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
        let Some(header_bytes) = raw.get(4..4 + header_len) else {
            return Err(corrupt("truncated header"));
        };

        let (header, _): (EntryHeader, usize) =
            bincode::serde::decode_from_slice(header_bytes, bincode::config::standard())
                .map_err(|e| corrupt(&format!("undecodable header: {e}")))?;

        if header.magic != ENTRY_MAGIC {
            return Err(corrupt("bad magic"));
        }
        if header.format_version != ENTRY_FORMAT_VERSION {
            return Err(corrupt(&format!(
                "format version {} (expected {ENTRY_FORMAT_VERSION})",
                header.format_version
            )));
        }

        let body_bytes = &raw[4 + header_len..];
        if xxh3_64(body_bytes) != header.checksum {
            return Err(corrupt("checksum mismatch"));
        }

        let (entry, _): (PersistedEntry, usize) =
            bincode::serde::decode_from_slice(body_bytes, bincode::config::standard())
                .map_err(|e| corrupt(&format!("undecodable body: {e}")))?;
        Ok(entry)
    }

    /// Restore all entries, re-validating each against `fingerprints`.
    ///
    /// Corrupt files are logged, removed, and reported in
    /// [`LoadedCache::corrupted`]; they never fail the load. Only failing to
    /// list the directory is an error.
    pub fn load(&self, fingerprints: &FingerprintStore) -> Result<LoadedCache> {
        let mut loaded = LoadedCache::default();

        let dir = match fs::read_dir(&self.entries_dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(loaded),
            Err(e) => return Err(e.into()),
        };

        let mut paths: Vec<PathBuf> = dir
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == ENTRY_EXT))
            .collect();
        paths.sort();

        for path in paths {
            let persisted = match Self::read_entry(&path) {
                Ok(persisted) if self.entry_path(&persisted.id) == path => persisted,
                Ok(persisted) => {
                    tracing::warn!(
                        "Cache entry {} holds artifact {} under the wrong key, discarding",
                        path.display(),
                        persisted.id
                    );
                    Self::discard(&path);
                    loaded.corrupted.push(path);
                    continue;
                }
                Err(e) => {
                    tracing::warn!("{}, discarding", e);
                    Self::discard(&path);
                    loaded.corrupted.push(path);
                    continue;
                }
            };

            let fresh = persisted.valid && fingerprints.matches(&persisted.snapshot);
            if fresh {
                loaded.restored += 1;
            } else {
                loaded.stale += 1;
            }
            loaded.cache.insert(
                persisted.id,
                CacheEntry {
                    payload: Payload::from(persisted.payload),
                    snapshot: persisted.snapshot,
                    sources: persisted.sources,
                    valid: fresh,
                },
            );
        }

        tracing::debug!(
            "Loaded cache from {}: {} fresh, {} stale, {} corrupted",
            self.entries_dir.display(),
            loaded.restored,
            loaded.stale,
            loaded.corrupted.len()
        );
        Ok(loaded)
    }

    /// Delete entry files whose artifact is not in `live`.
    ///
    /// Returns the number of files removed.
    pub fn gc(&self, live: &[ArtifactId]) -> Result<usize> {
        let keep: Vec<PathBuf> = live.iter().map(|id| self.entry_path(id)).collect();

        let dir = match fs::read_dir(&self.entries_dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in dir {
            let path = entry?.path();
            if !keep.contains(&path) {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn discard(path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!("Failed to remove corrupt cache entry {}: {}", path.display(), e);
        }
    }
}
