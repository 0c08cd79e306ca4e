//! Fingerprint store for tracked inputs.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

use super::{Fingerprint, FingerprintSnapshot};

/// Name of the persisted store within the state directory.
const STORE_FILE: &str = "fingerprints.bin";

/// Current and last-seen fingerprint of a tracked input.
#[derive(Debug, Clone, Copy)]
struct Entry {
    current: Fingerprint,
    previous: Option<Fingerprint>,
}

/// Maps each tracked input path to its fingerprint.
///
/// Mutated only between build passes; a pass reads it through a shared
/// reference.
#[derive(Debug, Default)]
pub struct FingerprintStore {
    entries: FxHashMap<PathBuf, Entry>,
}

impl FingerprintStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new fingerprint for `path`.
    ///
    /// Returns `true` if it differs from the stored one. The first observation
    /// of a path always counts as a change.
    pub fn update(&mut self, path: &Path, fingerprint: Fingerprint) -> bool {
        match self.entries.get_mut(path) {
            Some(entry) => {
                let changed = entry.current != fingerprint;
                entry.previous = Some(entry.current);
                entry.current = fingerprint;
                changed
            }
            None => {
                self.entries.insert(
                    path.to_path_buf(),
                    Entry {
                        current: fingerprint,
                        previous: None,
                    },
                );
                true
            }
        }
    }

    /// Current fingerprint of a registered path.
    pub fn get(&self, path: &Path) -> Result<Fingerprint> {
        self.entries
            .get(path)
            .map(|e| e.current)
            .ok_or_else(|| Error::UnknownInput(path.to_path_buf()))
    }

    /// Fingerprint recorded before the most recent `update`, if any.
    pub fn previous(&self, path: &Path) -> Option<Fingerprint> {
        self.entries.get(path).and_then(|e| e.previous)
    }

    /// Stop tracking a path.
    pub fn remove(&mut self, path: &Path) -> Option<Fingerprint> {
        self.entries.remove(path).map(|e| e.current)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All tracked paths, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.entries.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Capture the current fingerprints of `paths`.
    ///
    /// Fails with [`Error::UnknownInput`] if any path has never been fingerprinted.
    pub fn snapshot<'a>(
        &self,
        paths: impl IntoIterator<Item = &'a Path>,
    ) -> Result<FingerprintSnapshot> {
        paths
            .into_iter()
            .map(|path| Ok((path.to_path_buf(), self.get(path)?)))
            .collect::<Result<Vec<_>>>()
            .map(|pairs| pairs.into_iter().collect())
    }

    /// Whether every fingerprint in `snapshot` is still current.
    pub fn matches(&self, snapshot: &FingerprintSnapshot) -> bool {
        snapshot
            .iter()
            .all(|(path, fp)| self.entries.get(path).is_some_and(|e| e.current == *fp))
    }

    /// Persist current fingerprints to `state_dir`.
    pub fn save(&self, state_dir: &Path) -> Result<()> {
        fs::create_dir_all(state_dir)?;

        let current: BTreeMap<&Path, Fingerprint> = self
            .entries
            .iter()
            .map(|(p, e)| (p.as_path(), e.current))
            .collect();
        let bytes = bincode::serde::encode_to_vec(&current, bincode::config::standard())
            .map_err(|e| Error::Serialization(e.to_string()))?;

        // Write then rename so a crash never leaves a half-written store.
        let path = state_dir.join(STORE_FILE);
        let tmp = path.with_extension("bin.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Load fingerprints persisted by [`save`](Self::save).
    ///
    /// A missing file yields an empty store. An unreadable or undecodable file
    /// is a [`Error::FingerprintStore`].
    pub fn load(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join(STORE_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => {
                return Err(Error::FingerprintStore {
                    path,
                    reason: e.to_string(),
                });
            }
        };

        let (current, _): (BTreeMap<PathBuf, Fingerprint>, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).map_err(
                |e| Error::FingerprintStore {
                    path: path.clone(),
                    reason: e.to_string(),
                },
            )?;

        let entries = current
            .into_iter()
            .map(|(p, fp)| {
                (
                    p,
                    Entry {
                        current: fp,
                        previous: None,
                    },
                )
            })
            .collect();

        tracing::debug!("Loaded fingerprint store from {}", path.display());
        Ok(Self { entries })
    }
}
