//! Core engine for the rebundle incremental build cache.
//!
//! This crate provides:
//! - Fingerprint store for change detection on input files
//! - Dependency graph between inputs and derived artifacts
//! - Invalidation of the minimal set of affected artifacts
//! - Batched, bounded-parallel rebuild scheduling
//! - Artifact cache with on-disk persistence and re-validation

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod execute;
pub mod fingerprint;
pub mod graph;
pub mod invalidate;
pub mod paths;
pub mod schedule;

pub use cache::{ArtifactCache, CacheEntry, CachePersistence, CacheStats, Lookup, Payload};
pub use config::{ArtifactSpec, BuildConfig, CompilerConfig, ProjectConfig, WatchConfig, WatchMode};
pub use engine::{ArtifactState, BuildEngine};
pub use error::{Error, Result};
pub use event::{ChangeEvent, ChangeKind};
pub use execute::{
    AbortHandle, CommandCompiler, CompileError, CompileRequest, Compiler, ConcatCompiler,
    ParallelExecutor, PassObserver, PassReport, TaskOutcome,
};
pub use fingerprint::{Fingerprint, FingerprintMode, FingerprintSnapshot, FingerprintStore};
pub use graph::{ArtifactId, DependencyGraph, NodeKey};
pub use invalidate::{ChangeSet, InvalidationEngine};
pub use paths::ProjectDirs;
pub use schedule::{Batch, BuildScheduler, BuildTask};
