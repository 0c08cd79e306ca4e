//! Types for the dependency graph.

use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};

use petgraph::Direction;
use petgraph::algo::has_path_connecting;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identifier of a derived build output (for example one chunk).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtifactId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ArtifactId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Public identity of a graph node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeKey {
    /// A tracked source file.
    Input(PathBuf),
    /// A derived artifact.
    Artifact(ArtifactId),
}

impl NodeKey {
    pub fn input(path: impl Into<PathBuf>) -> Self {
        NodeKey::Input(path.into())
    }

    pub fn artifact(id: impl Into<ArtifactId>) -> Self {
        NodeKey::Artifact(id.into())
    }

    pub fn as_artifact(&self) -> Option<&ArtifactId> {
        match self {
            NodeKey::Artifact(id) => Some(id),
            NodeKey::Input(_) => None,
        }
    }

    pub fn as_input(&self) -> Option<&Path> {
        match self {
            NodeKey::Input(path) => Some(path),
            NodeKey::Artifact(_) => None,
        }
    }

    fn unknown(&self) -> Error {
        match self {
            NodeKey::Input(path) => Error::UnknownInput(path.clone()),
            NodeKey::Artifact(id) => Error::UnknownArtifact(id.to_string()),
        }
    }
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKey::Input(path) => write!(f, "{}", path.display()),
            NodeKey::Artifact(id) => write!(f, "artifact:{id}"),
        }
    }
}

/// The producer→consumer dependency graph.
///
/// Edges go from an input or artifact to the artifact that consumes it.
/// The graph is kept acyclic: [`add_edge`](Self::add_edge) refuses any edge
/// that would close a cycle.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// The directed graph: edges go from producer to consumer
    graph: StableDiGraph<NodeKey, ()>,
    /// Node key to arena index mapping
    indices: FxHashMap<NodeKey, NodeIndex>,
}

impl DependencyGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an input node. Idempotent.
    pub fn add_input(&mut self, path: impl Into<PathBuf>) -> NodeKey {
        let key = NodeKey::Input(path.into());
        self.ensure_node(key.clone());
        key
    }

    /// Register an artifact node. Idempotent.
    pub fn add_artifact(&mut self, id: impl Into<ArtifactId>) -> NodeKey {
        let key = NodeKey::Artifact(id.into());
        self.ensure_node(key.clone());
        key
    }

    fn ensure_node(&mut self, key: NodeKey) -> NodeIndex {
        if let Some(&idx) = self.indices.get(&key) {
            return idx;
        }
        let idx = self.graph.add_node(key.clone());
        self.indices.insert(key, idx);
        idx
    }

    fn index(&self, key: &NodeKey) -> Result<NodeIndex> {
        self.indices.get(key).copied().ok_or_else(|| key.unknown())
    }

    /// Add a producer→consumer edge.
    ///
    /// Fails with [`Error::CycleDetected`] if `from` is reachable from `to`,
    /// leaving the graph unchanged. Duplicate edges are ignored.
    pub fn add_edge(&mut self, from: &NodeKey, to: &NodeKey) -> Result<()> {
        let from_idx = self.index(from)?;
        let to_idx = self.index(to)?;

        if matches!(to, NodeKey::Input(_)) {
            return Err(Error::InvalidOperation(format!(
                "inputs cannot depend on other nodes ({from} -> {to})"
            )));
        }

        if from_idx == to_idx || has_path_connecting(&self.graph, to_idx, from_idx, None) {
            return Err(Error::CycleDetected {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        if !self.graph.contains_edge(from_idx, to_idx) {
            self.graph.add_edge(from_idx, to_idx, ());
        }
        Ok(())
    }

    /// Remove a node and every incident edge.
    ///
    /// Returns `false` if the node was not present.
    pub fn remove_node(&mut self, key: &NodeKey) -> bool {
        match self.indices.remove(key) {
            Some(idx) => {
                self.graph.remove_node(idx);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.indices.contains_key(key)
    }

    fn neighbors(&self, key: &NodeKey, direction: Direction) -> BTreeSet<NodeKey> {
        self.indices
            .get(key)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, direction)
                    .map(|n| self.graph[n].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Direct consumers of a node.
    pub fn dependents(&self, key: &NodeKey) -> BTreeSet<NodeKey> {
        self.neighbors(key, Direction::Outgoing)
    }

    /// Direct producers of a node.
    pub fn dependencies(&self, key: &NodeKey) -> BTreeSet<NodeKey> {
        self.neighbors(key, Direction::Incoming)
    }

    /// Every node reachable forward from `key`, excluding `key` itself.
    pub fn transitive_dependents(&self, key: &NodeKey) -> BTreeSet<NodeKey> {
        self.reachable(key, Direction::Outgoing)
            .into_iter()
            .map(|idx| self.graph[idx].clone())
            .collect()
    }

    /// Every input an artifact transitively depends on.
    pub fn transitive_inputs(&self, id: &ArtifactId) -> BTreeSet<PathBuf> {
        let key = NodeKey::Artifact(id.clone());
        self.reachable(&key, Direction::Incoming)
            .into_iter()
            .filter_map(|idx| self.graph[idx].as_input().map(Path::to_path_buf))
            .collect()
    }

    // BFS in one direction, excluding the start node.
    fn reachable(&self, key: &NodeKey, direction: Direction) -> Vec<NodeIndex> {
        let Some(&start) = self.indices.get(key) else {
            return Vec::new();
        };

        let mut seen = FxHashSet::default();
        let mut found = Vec::new();
        let mut queue = VecDeque::from([start]);
        seen.insert(start);

        while let Some(idx) = queue.pop_front() {
            for next in self.graph.neighbors_directed(idx, direction) {
                if seen.insert(next) {
                    found.push(next);
                    queue.push_back(next);
                }
            }
        }
        found
    }

    /// Direct artifact dependencies of an artifact, sorted.
    pub fn artifact_dependencies(&self, id: &ArtifactId) -> Vec<ArtifactId> {
        self.dependencies(&NodeKey::Artifact(id.clone()))
            .into_iter()
            .filter_map(|k| match k {
                NodeKey::Artifact(dep) => Some(dep),
                NodeKey::Input(_) => None,
            })
            .collect()
    }

    /// Direct input dependencies of an artifact, sorted.
    pub fn input_dependencies(&self, id: &ArtifactId) -> Vec<PathBuf> {
        self.dependencies(&NodeKey::Artifact(id.clone()))
            .into_iter()
            .filter_map(|k| match k {
                NodeKey::Input(path) => Some(path),
                NodeKey::Artifact(_) => None,
            })
            .collect()
    }

    /// All artifacts in the graph, sorted.
    pub fn artifacts(&self) -> Vec<ArtifactId> {
        let mut ids: Vec<_> = self
            .indices
            .keys()
            .filter_map(|k| k.as_artifact().cloned())
            .collect();
        ids.sort();
        ids
    }

    /// All inputs in the graph, sorted.
    pub fn inputs(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self
            .indices
            .keys()
            .filter_map(|k| k.as_input().map(Path::to_path_buf))
            .collect();
        paths.sort();
        paths
    }

    /// Nearest members of `subset` that `id` depends on.
    ///
    /// Walks backward through artifacts outside the subset so that ordering
    /// holds even when the subset is not closed under dependents.
    pub fn subset_dependencies(
        &self,
        id: &ArtifactId,
        subset: &BTreeSet<ArtifactId>,
    ) -> BTreeSet<ArtifactId> {
        let mut found = BTreeSet::new();
        let Some(&start) = self.indices.get(&NodeKey::Artifact(id.clone())) else {
            return found;
        };

        let mut seen = FxHashSet::default();
        let mut queue = VecDeque::from([start]);
        while let Some(idx) = queue.pop_front() {
            for prev in self.graph.neighbors_directed(idx, Direction::Incoming) {
                if !seen.insert(prev) {
                    continue;
                }
                if let NodeKey::Artifact(dep) = &self.graph[prev] {
                    if subset.contains(dep) {
                        found.insert(dep.clone());
                    } else {
                        queue.push_back(prev);
                    }
                }
            }
        }
        found
    }

    /// Group a set of artifacts into dependency layers.
    ///
    /// Artifacts in the same layer have no dependency relation among them.
    /// Each layer is sorted by artifact id.
    pub fn topological_levels(&self, subset: &BTreeSet<ArtifactId>) -> Vec<Vec<ArtifactId>> {
        let deps: FxHashMap<&ArtifactId, BTreeSet<ArtifactId>> = subset
            .iter()
            .map(|id| (id, self.subset_dependencies(id, subset)))
            .collect();

        let mut levels = Vec::new();
        let mut remaining: BTreeSet<&ArtifactId> = subset.iter().collect();
        let mut completed: FxHashSet<&ArtifactId> = FxHashSet::default();

        while !remaining.is_empty() {
            // BTreeSet iteration keeps each level sorted
            let ready: Vec<&ArtifactId> = remaining
                .iter()
                .copied()
                .filter(|id| deps[id].iter().all(|d| completed.contains(d)))
                .collect();

            if ready.is_empty() {
                // Unreachable while the graph is acyclic
                tracing::error!("{} artifacts could not be ordered", remaining.len());
                break;
            }

            for &id in &ready {
                remaining.remove(id);
                completed.insert(id);
            }
            levels.push(ready.into_iter().cloned().collect());
        }

        levels
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}
