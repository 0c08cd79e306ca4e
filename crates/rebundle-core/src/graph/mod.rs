//! Dependency graph between inputs and artifacts.
//!
//! This module provides:
//! - Arena-backed graph with opaque node indices
//! - Cycle rejection at edge insertion
//! - Forward (dependents) and backward (inputs) traversal
//! - Topological layering of artifact subsets for batched rebuilds

mod types;

pub use types::{ArtifactId, DependencyGraph, NodeKey};
