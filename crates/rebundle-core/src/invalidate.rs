//! Invalidation of artifacts affected by input changes.
//!
//! A changed input invalidates every artifact reachable from it in the
//! dependency graph, and nothing else. Deleted inputs additionally leave the
//! graph and the fingerprint store.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::error::Result;
use crate::event::{ChangeEvent, ChangeKind};
use crate::fingerprint::{FingerprintMode, FingerprintStore, fingerprint_file};
use crate::graph::{ArtifactId, DependencyGraph, NodeKey};

/// Accumulated effect of change events between two passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Inputs whose fingerprint differs from the stored one.
    pub changed: BTreeSet<PathBuf>,

    /// Inputs that were removed from the graph.
    pub deleted: BTreeSet<PathBuf>,

    /// Artifacts invalidated by deletions. Computed before the input node
    /// is removed, since the edges are gone afterwards.
    pub invalidated: BTreeSet<ArtifactId>,

    /// Events for paths the graph does not track.
    pub ignored: usize,
}

impl ChangeSet {
    /// Returns `true` if no input changed or disappeared.
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty() && self.invalidated.is_empty()
    }
}

/// Computes the minimal set of artifacts requiring recompilation.
pub struct InvalidationEngine;

impl InvalidationEngine {
    /// Union of the transitive dependents of every changed input, restricted
    /// to artifacts.
    ///
    /// Inputs the graph does not know contribute nothing.
    pub fn compute_invalidated(
        graph: &DependencyGraph,
        changed: &BTreeSet<PathBuf>,
    ) -> BTreeSet<ArtifactId> {
        changed
            .iter()
            .flat_map(|path| graph.transitive_dependents(&NodeKey::Input(path.clone())))
            .filter_map(|key| match key {
                NodeKey::Artifact(id) => Some(id),
                NodeKey::Input(_) => None,
            })
            .collect()
    }

    /// Apply a single change event to the fingerprint store and graph.
    ///
    /// `Modified` and `Created` re-fingerprint the file; a file that no longer
    /// exists is handled as `Deleted`. Fingerprint read failures other than
    /// "not found" are returned and abort the caller's pass.
    pub fn apply_event(
        graph: &mut DependencyGraph,
        store: &mut FingerprintStore,
        event: &ChangeEvent,
        mode: FingerprintMode,
        changes: &mut ChangeSet,
    ) -> Result<()> {
        let key = NodeKey::Input(event.path.clone());
        if !graph.contains(&key) {
            changes.ignored += 1;
            return Ok(());
        }

        let fingerprint = match event.kind {
            ChangeKind::Deleted => None,
            ChangeKind::Modified | ChangeKind::Created => fingerprint_file(&event.path, mode)?,
        };

        match fingerprint {
            Some(fp) => {
                if store.update(&event.path, fp) {
                    tracing::debug!("Input changed: {}", event.path.display());
                    changes.changed.insert(event.path.clone());
                }
            }
            None => {
                let dependents = Self::compute_invalidated(graph, &BTreeSet::from([event.path.clone()]));
                tracing::debug!(
                    "Input deleted: {} ({} dependents invalidated)",
                    event.path.display(),
                    dependents.len()
                );
                changes.invalidated.extend(dependents);
                changes.changed.remove(&event.path);
                changes.deleted.insert(event.path.clone());
                graph.remove_node(&key);
                store.remove(&event.path);
            }
        }
        Ok(())
    }

    /// Apply a sequence of events in order.
    pub fn apply_changes(
        graph: &mut DependencyGraph,
        store: &mut FingerprintStore,
        events: &[ChangeEvent],
        mode: FingerprintMode,
    ) -> Result<ChangeSet> {
        let mut changes = ChangeSet::default();
        for event in events {
            Self::apply_event(graph, store, event, mode, &mut changes)?;
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprint;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn id(s: &str) -> ArtifactId {
        ArtifactId::from(s)
    }

    /// A→X, B→Y, X→Z, Y→Z, plus an unrelated C→W.
    fn chunk_graph(a: &Path, b: &Path, c: &Path) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        let a = graph.add_input(a);
        let b = graph.add_input(b);
        let c = graph.add_input(c);
        let x = graph.add_artifact("x");
        let y = graph.add_artifact("y");
        let z = graph.add_artifact("z");
        let w = graph.add_artifact("w");
        graph.add_edge(&a, &x).unwrap();
        graph.add_edge(&b, &y).unwrap();
        graph.add_edge(&x, &z).unwrap();
        graph.add_edge(&y, &z).unwrap();
        graph.add_edge(&c, &w).unwrap();
        graph
    }

    #[test]
    fn test_no_changes_invalidate_nothing() {
        let graph = chunk_graph(Path::new("a"), Path::new("b"), Path::new("c"));
        assert!(InvalidationEngine::compute_invalidated(&graph, &BTreeSet::new()).is_empty());
    }

    #[test]
    fn test_changing_a_invalidates_x_and_z() {
        let graph = chunk_graph(Path::new("a"), Path::new("b"), Path::new("c"));
        let invalidated =
            InvalidationEngine::compute_invalidated(&graph, &BTreeSet::from([PathBuf::from("a")]));
        assert_eq!(invalidated, BTreeSet::from([id("x"), id("z")]));
    }

    #[test]
    fn test_invalidation_is_exact() {
        let graph = chunk_graph(Path::new("a"), Path::new("b"), Path::new("c"));
        let changed = BTreeSet::from([PathBuf::from("b"), PathBuf::from("c")]);
        let invalidated = InvalidationEngine::compute_invalidated(&graph, &changed);

        for artifact in graph.artifacts() {
            let reachable = changed.iter().any(|p| {
                graph
                    .transitive_dependents(&NodeKey::Input(p.clone()))
                    .contains(&NodeKey::Artifact(artifact.clone()))
            });
            assert_eq!(invalidated.contains(&artifact), reachable, "{artifact}");
        }
        assert_eq!(invalidated, BTreeSet::from([id("w"), id("y"), id("z")]));
    }

    #[test]
    fn test_unknown_changed_input_is_ignored() {
        let graph = chunk_graph(Path::new("a"), Path::new("b"), Path::new("c"));
        let changed = BTreeSet::from([PathBuf::from("elsewhere.js")]);
        assert!(InvalidationEngine::compute_invalidated(&graph, &changed).is_empty());
    }

    #[test]
    fn test_modified_event_marks_changed_only_on_new_fingerprint() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.js");
        let b = temp.path().join("b.js");
        let c = temp.path().join("c.js");
        for p in [&a, &b, &c] {
            fs::write(p, "v1").unwrap();
        }
        let mut graph = chunk_graph(&a, &b, &c);
        let mut store = FingerprintStore::new();
        store.update(&a, Fingerprint::from_bytes(b"v1"));

        let unchanged = InvalidationEngine::apply_changes(
            &mut graph,
            &mut store,
            &[ChangeEvent::modified(&a)],
            FingerprintMode::Content,
        )
        .unwrap();
        assert!(unchanged.is_empty());

        fs::write(&a, "v2").unwrap();
        let changed = InvalidationEngine::apply_changes(
            &mut graph,
            &mut store,
            &[ChangeEvent::modified(&a)],
            FingerprintMode::Content,
        )
        .unwrap();
        assert_eq!(changed.changed, BTreeSet::from([a.clone()]));
    }

    #[test]
    fn test_deleted_input_invalidates_dependents_and_leaves_graph() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.js");
        let b = temp.path().join("b.js");
        let c = temp.path().join("c.js");
        let mut graph = chunk_graph(&a, &b, &c);
        let mut store = FingerprintStore::new();
        store.update(&a, Fingerprint::Content(1));

        let changes = InvalidationEngine::apply_changes(
            &mut graph,
            &mut store,
            &[ChangeEvent::deleted(&a)],
            FingerprintMode::Content,
        )
        .unwrap();

        assert_eq!(changes.invalidated, BTreeSet::from([id("x"), id("z")]));
        assert_eq!(changes.deleted, BTreeSet::from([a.clone()]));
        assert!(!graph.contains(&NodeKey::Input(a.clone())));
        assert!(!store.contains(&a));
    }

    #[test]
    fn test_modified_event_for_missing_file_is_deletion() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.js");
        let mut graph = chunk_graph(&a, Path::new("b"), Path::new("c"));
        let mut store = FingerprintStore::new();

        let changes = InvalidationEngine::apply_changes(
            &mut graph,
            &mut store,
            &[ChangeEvent::modified(&a)],
            FingerprintMode::Content,
        )
        .unwrap();
        assert_eq!(changes.deleted, BTreeSet::from([a]));
    }

    #[test]
    fn test_untracked_paths_are_counted() {
        let mut graph = chunk_graph(Path::new("a"), Path::new("b"), Path::new("c"));
        let mut store = FingerprintStore::new();
        let changes = InvalidationEngine::apply_changes(
            &mut graph,
            &mut store,
            &[ChangeEvent::created("README.md")],
            FingerprintMode::Content,
        )
        .unwrap();
        assert!(changes.is_empty());
        assert_eq!(changes.ignored, 1);
    }
}
