//! Ordering of invalidated artifacts into batches.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::graph::{ArtifactId, DependencyGraph, NodeKey};

/// Work item "recompute this artifact".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTask {
    /// Artifact to rebuild.
    pub artifact: ArtifactId,
    /// Direct input files, sorted.
    pub inputs: Vec<PathBuf>,
    /// Direct artifact dependencies, sorted.
    pub dependencies: Vec<ArtifactId>,
    /// Invalidated artifacts this one must wait for.
    pub blocked_on: BTreeSet<ArtifactId>,
}

/// Tasks with no dependency relation among them, sorted by artifact id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub tasks: Vec<BuildTask>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &ArtifactId> {
        self.tasks.iter().map(|t| &t.artifact)
    }
}

/// Turns an invalidated set into ordered batches.
pub struct BuildScheduler;

impl BuildScheduler {
    /// Topologically layer the invalidated subgraph.
    ///
    /// Every artifact lands in a later batch than each invalidated artifact
    /// it depends on. Ids the graph does not know are dropped.
    pub fn schedule(graph: &DependencyGraph, invalidated: &BTreeSet<ArtifactId>) -> Vec<Batch> {
        let known: BTreeSet<ArtifactId> = invalidated
            .iter()
            .filter(|id| graph.contains(&NodeKey::Artifact((*id).clone())))
            .cloned()
            .collect();

        graph
            .topological_levels(&known)
            .into_iter()
            .map(|level| Batch {
                tasks: level
                    .into_iter()
                    .map(|artifact| BuildTask {
                        inputs: graph.input_dependencies(&artifact),
                        dependencies: graph.artifact_dependencies(&artifact),
                        blocked_on: graph.subset_dependencies(&artifact, &known),
                        artifact,
                    })
                    .collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ArtifactId {
        ArtifactId::from(s)
    }

    fn diamond() -> DependencyGraph {
        // a -> {x, y}; x, y -> z; c -> w
        let mut graph = DependencyGraph::new();
        let a = graph.add_input("a.js");
        let c = graph.add_input("c.js");
        for artifact in ["x", "y", "z", "w"] {
            graph.add_artifact(artifact);
        }
        graph.add_edge(&a, &NodeKey::artifact("x")).unwrap();
        graph.add_edge(&a, &NodeKey::artifact("y")).unwrap();
        graph.add_edge(&NodeKey::artifact("x"), &NodeKey::artifact("z")).unwrap();
        graph.add_edge(&NodeKey::artifact("y"), &NodeKey::artifact("z")).unwrap();
        graph.add_edge(&c, &NodeKey::artifact("w")).unwrap();
        graph
    }

    #[test]
    fn test_batches_respect_dependencies() {
        let graph = diamond();
        let batches =
            BuildScheduler::schedule(&graph, &BTreeSet::from([id("z"), id("y"), id("x"), id("w")]));

        let ids: Vec<Vec<&str>> = batches
            .iter()
            .map(|b| b.artifacts().map(ArtifactId::as_str).collect())
            .collect();
        assert_eq!(ids, vec![vec!["w", "x", "y"], vec!["z"]]);
    }

    #[test]
    fn test_tasks_carry_direct_dependencies() {
        let graph = diamond();
        let batches = BuildScheduler::schedule(&graph, &BTreeSet::from([id("x"), id("z")]));

        let z = &batches[1].tasks[0];
        assert_eq!(z.artifact, id("z"));
        assert_eq!(z.dependencies, vec![id("x"), id("y")]);
        assert_eq!(z.blocked_on, BTreeSet::from([id("x")]));
        assert!(z.inputs.is_empty());

        let x = &batches[0].tasks[0];
        assert_eq!(x.inputs, vec![PathBuf::from("a.js")]);
    }

    #[test]
    fn test_empty_invalidation_schedules_nothing() {
        let graph = diamond();
        assert!(BuildScheduler::schedule(&graph, &BTreeSet::new()).is_empty());
    }

    #[test]
    fn test_unknown_artifacts_are_dropped() {
        let graph = diamond();
        let batches = BuildScheduler::schedule(&graph, &BTreeSet::from([id("ghost")]));
        assert!(batches.is_empty());
    }
}
