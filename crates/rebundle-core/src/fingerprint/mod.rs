//! Change detection for input files.
//!
//! This module provides:
//! - [`Fingerprint`] values computed from file content or mtime + size
//! - [`FingerprintStore`], the per-path record of current and last-seen fingerprints
//! - [`FingerprintSnapshot`], the frozen set of fingerprints an artifact was built from

mod store;

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use store::FingerprintStore;

/// How fingerprints are computed from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintMode {
    /// XXH3 over the full file contents.
    #[default]
    Content,
    /// Modification time plus size. Cheaper, but misses same-size edits
    /// within the filesystem's timestamp resolution.
    Stamp,
}

/// Signature used to detect that an input changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Fingerprint {
    Content(u64),
    Stamp { modified_ns: u64, size: u64 },
}

impl Fingerprint {
    /// Fingerprint in-memory contents.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Fingerprint::Content(xxhash_rust::xxh3::xxh3_64(bytes))
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fingerprint::Content(hash) => write!(f, "{hash:016x}"),
            Fingerprint::Stamp { modified_ns, size } => write!(f, "{modified_ns}:{size}"),
        }
    }
}

/// Compute the fingerprint of a file on disk.
///
/// Returns `Ok(None)` if the file does not exist. Any other I/O failure is a
/// [`Error::FingerprintStore`], which aborts the pass that triggered it.
pub fn fingerprint_file(path: &Path, mode: FingerprintMode) -> Result<Option<Fingerprint>> {
    let storage_err = |e: std::io::Error| Error::FingerprintStore {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    match mode {
        FingerprintMode::Content => match fs::read(path) {
            Ok(bytes) => Ok(Some(Fingerprint::from_bytes(&bytes))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_err(e)),
        },
        FingerprintMode::Stamp => {
            let meta = match fs::metadata(path) {
                Ok(meta) => meta,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(storage_err(e)),
            };
            let modified_ns = meta
                .modified()
                .map_err(storage_err)?
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0);
            Ok(Some(Fingerprint::Stamp {
                modified_ns,
                size: meta.len(),
            }))
        }
    }
}

/// Fingerprints of every input an artifact transitively depends on,
/// captured at the time the artifact was built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintSnapshot(BTreeMap<PathBuf, Fingerprint>);

impl FingerprintSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, fingerprint: Fingerprint) {
        self.0.insert(path.into(), fingerprint);
    }

    pub fn get(&self, path: &Path) -> Option<Fingerprint> {
        self.0.get(path).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &Fingerprint)> {
        self.0.iter().map(|(p, f)| (p.as_path(), f))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(PathBuf, Fingerprint)> for FingerprintSnapshot {
    fn from_iter<I: IntoIterator<Item = (PathBuf, Fingerprint)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
