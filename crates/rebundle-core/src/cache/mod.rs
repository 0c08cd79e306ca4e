//! Artifact cache.
//!
//! This module provides:
//! - In-memory artifact store with per-entry locking
//! - Snapshot-based validity: a payload is served only while every input
//!   fingerprint it was built from is unchanged
//! - Disk persistence with re-validation on load ([`CachePersistence`])

mod persist;

use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

use rustc_hash::FxHashMap;

use crate::fingerprint::{FingerprintSnapshot, FingerprintStore};
use crate::graph::{ArtifactId, NodeKey};

pub use persist::{CachePersistence, LoadedCache};

/// Immutable, cheaply clonable artifact output.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Payload(Arc<[u8]>);

impl Payload {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.into())
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().into())
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Payload({} bytes)", self.0.len())
    }
}

/// Stored output of one artifact.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Last built output.
    pub payload: Payload,
    /// Fingerprints the payload was built from.
    pub snapshot: FingerprintSnapshot,
    /// Direct inputs and artifact dependencies at build time.
    pub sources: BTreeSet<NodeKey>,
    /// Cleared by [`ArtifactCache::invalidate`].
    pub valid: bool,
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Fresh payload, built from the current fingerprints.
    Hit(Payload),
    /// No entry, an invalidated entry, or a stale snapshot.
    Invalid,
}

impl Lookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Lookup::Hit(payload) => Some(payload),
            Lookup::Invalid => None,
        }
    }

    pub fn into_payload(self) -> Option<Payload> {
        match self {
            Lookup::Hit(payload) => Some(payload),
            Lookup::Invalid => None,
        }
    }
}

type Slot = Arc<RwLock<CacheEntry>>;

/// Shared artifact store.
///
/// Each entry sits behind its own lock, so writes to distinct artifacts
/// proceed independently and a write to one entry only excludes readers of
/// that entry. The outer map lock is held just long enough to find or insert
/// a slot.
///
/// Poisoned locks are recovered rather than propagated: entries are replaced
/// whole, so a panicking writer cannot leave a half-updated entry behind.
#[derive(Debug, Default)]
pub struct ArtifactCache {
    entries: RwLock<FxHashMap<ArtifactId, Slot>>,
}

impl ArtifactCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &ArtifactId) -> Option<Slot> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Look up a fresh payload.
    ///
    /// Returns [`Lookup::Invalid`] unless the entry exists, has not been
    /// invalidated, and its snapshot matches `fingerprints`.
    pub fn get(&self, id: &ArtifactId, fingerprints: &FingerprintStore) -> Lookup {
        let Some(slot) = self.slot(id) else {
            return Lookup::Invalid;
        };
        let entry = slot.read().unwrap_or_else(PoisonError::into_inner);
        if entry.valid && fingerprints.matches(&entry.snapshot) {
            Lookup::Hit(entry.payload.clone())
        } else {
            Lookup::Invalid
        }
    }

    /// Look up a fresh payload built from exactly `sources`.
    ///
    /// Like [`get`](Self::get), but an entry recorded with a different set
    /// of direct dependencies is [`Lookup::Invalid`] even if every
    /// fingerprint in its snapshot is unchanged.
    pub fn get_with_sources(
        &self,
        id: &ArtifactId,
        fingerprints: &FingerprintStore,
        sources: &BTreeSet<NodeKey>,
    ) -> Lookup {
        let Some(slot) = self.slot(id) else {
            return Lookup::Invalid;
        };
        let entry = slot.read().unwrap_or_else(PoisonError::into_inner);
        if entry.valid && entry.sources == *sources && fingerprints.matches(&entry.snapshot) {
            Lookup::Hit(entry.payload.clone())
        } else {
            Lookup::Invalid
        }
    }

    /// Store a freshly built payload.
    pub fn put(&self, id: ArtifactId, payload: Payload, snapshot: FingerprintSnapshot) {
        self.put_with_sources(id, payload, snapshot, BTreeSet::new());
    }

    /// Store a freshly built payload along with the direct dependencies it
    /// was built from.
    pub fn put_with_sources(
        &self,
        id: ArtifactId,
        payload: Payload,
        snapshot: FingerprintSnapshot,
        sources: BTreeSet<NodeKey>,
    ) {
        self.insert(
            id,
            CacheEntry {
                payload,
                snapshot,
                sources,
                valid: true,
            },
        );
    }

    /// Insert an entry as-is, for instance one restored from disk.
    pub fn insert(&self, id: ArtifactId, entry: CacheEntry) {
        if let Some(slot) = self.slot(&id) {
            *slot.write().unwrap_or_else(PoisonError::into_inner) = entry;
            return;
        }
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(RwLock::new(entry)));
    }

    /// Mark an entry unusable without deleting its payload.
    ///
    /// Returns `false` if there was no entry.
    pub fn invalidate(&self, id: &ArtifactId) -> bool {
        match self.slot(id) {
            Some(slot) => {
                slot.write().unwrap_or_else(PoisonError::into_inner).valid = false;
                true
            }
            None => false,
        }
    }

    /// Last payload for `id` regardless of validity.
    ///
    /// For diagnostics only; never a substitute for [`get`](Self::get).
    pub fn stale(&self, id: &ArtifactId) -> Option<Payload> {
        self.slot(id)
            .map(|slot| slot.read().unwrap_or_else(PoisonError::into_inner).payload.clone())
    }

    /// Drop an entry entirely.
    pub fn remove(&self, id: &ArtifactId) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }

    /// Clone of every entry, sorted by artifact id.
    pub fn entries(&self) -> Vec<(ArtifactId, CacheEntry)> {
        let slots: Vec<(ArtifactId, Slot)> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();

        let mut entries: Vec<_> = slots
            .into_iter()
            .map(|(id, slot)| {
                let entry = slot.read().unwrap_or_else(PoisonError::into_inner).clone();
                (id, entry)
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// All cached artifact ids, sorted.
    pub fn ids(&self) -> Vec<ArtifactId> {
        let mut ids: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cache statistics against the current fingerprints.
    pub fn stats(&self, fingerprints: &FingerprintStore) -> CacheStats {
        let entries = self.entries();
        let valid = entries
            .iter()
            .filter(|(_, e)| e.valid && fingerprints.matches(&e.snapshot))
            .count();
        CacheStats {
            entries: entries.len(),
            valid,
            bytes: entries.iter().map(|(_, e)| e.payload.len()).sum(),
        }
    }
}

/// Statistics about the artifact cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of stored entries
    pub entries: usize,

    /// Entries that would be served as a hit
    pub valid: usize,

    /// Total payload size
    pub bytes: usize,
}
