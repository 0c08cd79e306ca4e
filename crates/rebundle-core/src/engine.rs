//! Build engine.
//!
//! Owns the fingerprint store, dependency graph, and artifact cache, and
//! runs build passes over them. All mutation happens between passes through
//! `&mut self`; a pass reads the graph and the fingerprints through shared
//! references while the workers run.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::cache::{ArtifactCache, CachePersistence, Lookup, Payload};
use crate::config::{ArtifactSpec, BuildConfig, ProjectConfig};
use crate::error::{Error, Result};
use crate::event::{ChangeEvent, ChangeKind};
use crate::execute::{AbortHandle, Compiler, ParallelExecutor, PassObserver, PassReport, TaskOutcome};
use crate::fingerprint::FingerprintStore;
use crate::graph::{ArtifactId, DependencyGraph, NodeKey};
use crate::invalidate::{ChangeSet, InvalidationEngine};
use crate::paths::ProjectDirs;
use crate::schedule::BuildScheduler;

/// Cache state of one artifact, for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    /// A valid entry built from the current fingerprints.
    Fresh,
    /// An entry exists but an input changed or its build failed.
    Stale,
    /// Never built.
    Missing,
}

/// Incremental build engine.
pub struct BuildEngine {
    config: BuildConfig,
    graph: DependencyGraph,
    fingerprints: FingerprintStore,
    cache: Arc<ArtifactCache>,
    executor: ParallelExecutor,
    /// Declared artifacts, used to relink re-created inputs.
    specs: BTreeMap<ArtifactId, ArtifactSpec>,
    /// Changes applied since the last pass.
    changes: ChangeSet,
    /// Artifacts left unbuilt by earlier passes.
    pending: BTreeSet<ArtifactId>,
    /// Corrupt persisted entries not yet reported.
    corrupted: usize,
    dirs: Option<ProjectDirs>,
    observer: Option<Arc<dyn PassObserver>>,
}

impl BuildEngine {
    /// Create an in-memory engine with no persistence.
    pub fn new(config: BuildConfig, compiler: Arc<dyn Compiler>) -> Result<Self> {
        let executor =
            ParallelExecutor::new(config.worker_count(), compiler, config.task_timeout())?;
        Ok(Self {
            config,
            graph: DependencyGraph::new(),
            fingerprints: FingerprintStore::new(),
            cache: Arc::new(ArtifactCache::new()),
            executor,
            specs: BTreeMap::new(),
            changes: ChangeSet::default(),
            pending: BTreeSet::new(),
            corrupted: 0,
            dirs: None,
            observer: None,
        })
    }

    /// Create an engine backed by `dirs`, restoring any persisted state.
    ///
    /// A fingerprint store that cannot be read is fatal. Corrupt cache
    /// entries are discarded and reported in the next pass.
    pub fn open(dirs: ProjectDirs, config: BuildConfig, compiler: Arc<dyn Compiler>) -> Result<Self> {
        let mut engine = Self::new(config, compiler)?;

        engine.fingerprints = FingerprintStore::load(&dirs.state_dir)?;
        let loaded = CachePersistence::new(&dirs.cache_dir).load(&engine.fingerprints)?;
        tracing::info!(
            "Restored {} cache entries ({} stale, {} corrupt)",
            loaded.restored + loaded.stale,
            loaded.stale,
            loaded.corrupted.len()
        );

        engine.cache = Arc::new(loaded.cache);
        engine.corrupted = loaded.corrupted.len();
        engine.dirs = Some(dirs);
        Ok(engine)
    }

    /// Open the engine for a loaded project: restore state, define every
    /// artifact, and scan all inputs.
    pub fn from_project(project: &ProjectConfig) -> Result<Self> {
        let dirs = ProjectDirs::from_config(project);
        let compiler = project.compiler.build(&project.root);
        let mut engine = Self::open(dirs, project.build.clone(), compiler)?;

        for spec in &project.artifacts {
            engine.define_artifact(spec.clone())?;
        }
        engine.scan_inputs()?;
        Ok(engine)
    }

    /// Set the pass observer.
    pub fn set_observer(&mut self, observer: impl PassObserver + 'static) {
        self.observer = Some(Arc::new(observer));
    }

    /// Register an artifact with its inputs and artifact dependencies.
    ///
    /// Every edge is attempted; an edge that would close a cycle is refused
    /// and its error returned after the others are in place. The artifact is
    /// built by the next pass unless the cache already holds a fresh entry.
    pub fn define_artifact(&mut self, spec: ArtifactSpec) -> Result<()> {
        if self.specs.contains_key(&spec.id) {
            return Err(Error::InvalidOperation(format!(
                "artifact {} is already defined",
                spec.id
            )));
        }

        let node = self.graph.add_artifact(spec.id.clone());
        let mut first_error = None;

        let mut producers: Vec<NodeKey> = spec
            .inputs
            .iter()
            .map(|path| self.graph.add_input(path.clone()))
            .collect();
        producers.extend(
            spec.depends_on
                .iter()
                .map(|dep| self.graph.add_artifact(dep.clone())),
        );
        for producer in &producers {
            if let Err(e) = self.graph.add_edge(producer, &node) {
                tracing::warn!("Refusing edge for {}: {}", spec.id, e);
                first_error.get_or_insert(e);
            }
        }

        tracing::debug!(
            "Defined artifact {} ({} inputs, {} dependencies)",
            spec.id,
            spec.inputs.len(),
            spec.depends_on.len()
        );
        self.specs.insert(spec.id.clone(), spec);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Fingerprint every declared input.
    ///
    /// Declared inputs that do not exist are handled as deletions; inputs
    /// deleted earlier that exist again are relinked.
    pub fn scan_inputs(&mut self) -> Result<()> {
        let declared: BTreeSet<PathBuf> = self
            .specs
            .values()
            .flat_map(|spec| spec.inputs.iter().cloned())
            .collect();

        let events: Vec<ChangeEvent> = declared
            .iter()
            .map(|path| {
                if self.graph.contains(&NodeKey::Input(path.clone())) {
                    ChangeEvent::modified(path)
                } else {
                    ChangeEvent::created(path)
                }
            })
            .collect();
        self.apply_events(&events)?;

        // Forget fingerprints of inputs no artifact declares any more.
        for path in self.fingerprints.paths() {
            if !declared.contains(&path) {
                self.fingerprints.remove(&path);
            }
        }

        tracing::debug!(
            "Scanned {} inputs, {} changed",
            declared.len(),
            self.changes.changed.len()
        );
        Ok(())
    }

    /// Apply one change event. Only valid between passes.
    pub fn apply_event(&mut self, event: &ChangeEvent) -> Result<()> {
        if event.kind != ChangeKind::Deleted
            && !self.graph.contains(&NodeKey::Input(event.path.clone()))
        {
            self.relink_input(&event.path)?;
        }
        InvalidationEngine::apply_event(
            &mut self.graph,
            &mut self.fingerprints,
            event,
            self.config.fingerprint,
            &mut self.changes,
        )
    }

    /// Apply events in order, stopping at the first error.
    pub fn apply_events(&mut self, events: &[ChangeEvent]) -> Result<()> {
        for event in events {
            self.apply_event(event)?;
        }
        Ok(())
    }

    // Re-add a declared input that was deleted, if it exists again.
    fn relink_input(&mut self, path: &Path) -> Result<()> {
        let owners: Vec<ArtifactId> = self
            .specs
            .values()
            .filter(|spec| spec.inputs.iter().any(|p| p == path))
            .map(|spec| spec.id.clone())
            .collect();
        if owners.is_empty() || !path.exists() {
            return Ok(());
        }

        tracing::debug!("Relinking input {} to {} artifacts", path.display(), owners.len());
        let key = self.graph.add_input(path);
        for id in owners {
            self.graph.add_edge(&key, &NodeKey::Artifact(id))?;
        }
        Ok(())
    }

    /// Whether the next pass has anything to do.
    pub fn has_pending_work(&self) -> bool {
        !self.changes.is_empty()
            || !self.pending.is_empty()
            || self
                .graph
                .artifacts()
                .iter()
                .any(|id| !self.lookup(id).is_hit())
    }

    // Fresh payload only if the entry was built from the artifact's current
    // direct dependencies.
    fn lookup(&self, id: &ArtifactId) -> Lookup {
        let sources = self.graph.dependencies(&NodeKey::Artifact(id.clone()));
        self.cache.get_with_sources(id, &self.fingerprints, &sources)
    }

    // Everything the next pass must rebuild, closed under dependents.
    fn collect_invalidated(&mut self) -> BTreeSet<ArtifactId> {
        let changes = std::mem::take(&mut self.changes);
        let mut invalidated = InvalidationEngine::compute_invalidated(&self.graph, &changes.changed);
        invalidated.extend(changes.invalidated);
        invalidated.extend(std::mem::take(&mut self.pending));

        for id in self.graph.artifacts() {
            if !self.lookup(&id).is_hit() {
                invalidated.insert(id);
            }
        }

        let dependents: Vec<ArtifactId> = invalidated
            .iter()
            .flat_map(|id| self.graph.transitive_dependents(&NodeKey::Artifact(id.clone())))
            .filter_map(|key| key.as_artifact().cloned())
            .collect();
        invalidated.extend(dependents);
        invalidated.retain(|id| self.graph.contains(&NodeKey::Artifact(id.clone())));
        invalidated
    }

    /// Run one build pass.
    ///
    /// Rebuilds every invalidated artifact, commits the outputs, and reports
    /// the result. Per-artifact failures are reported, not returned. Returns
    /// [`Error::Aborted`] if `abort` fires; nothing is committed and the
    /// invalidated set carries over to the next pass.
    pub fn run_pass(&mut self, abort: &AbortHandle) -> Result<PassReport> {
        let started = Instant::now();
        let invalidated = self.collect_invalidated();
        for id in &invalidated {
            self.cache.invalidate(id);
        }

        let batches = BuildScheduler::schedule(&self.graph, &invalidated);
        tracing::debug!(
            "Pass: {} invalidated artifacts in {} batches ({} compiler)",
            invalidated.len(),
            batches.len(),
            self.executor.compiler_name()
        );

        let resolve = |id: &ArtifactId| self.lookup(id).into_payload();
        let result = self
            .executor
            .execute(&batches, &resolve, abort, self.observer.as_deref());

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                tracing::info!("Pass stopped ({}), {} artifacts pending", e, invalidated.len());
                self.pending.extend(invalidated);
                return Err(e);
            }
        };

        let mut report = PassReport {
            cached: self
                .graph
                .artifacts()
                .into_iter()
                .filter(|id| !invalidated.contains(id))
                .collect(),
            corrupted: std::mem::take(&mut self.corrupted),
            ..PassReport::default()
        };

        for (id, outcome) in result.outcomes {
            match outcome {
                TaskOutcome::Built(payload) => match self.commit(&id, payload) {
                    Ok(()) => report.built.push(id),
                    Err(e) => {
                        self.pending.insert(id.clone());
                        report.failed.push((id, e.to_string()));
                    }
                },
                TaskOutcome::Failed(message) => {
                    self.pending.insert(id.clone());
                    report.failed.push((id, message));
                }
                TaskOutcome::TimedOut { elapsed_ms } => {
                    let error = Error::Timeout {
                        artifact: id.to_string(),
                        elapsed_ms,
                    };
                    self.pending.insert(id.clone());
                    report.failed.push((id, error.to_string()));
                }
                TaskOutcome::Blocked { .. } => {
                    self.pending.insert(id.clone());
                    report.blocked.push(id);
                }
                TaskOutcome::Cancelled => {
                    self.pending.insert(id);
                }
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            "Pass complete in {}ms: {} built, {} failed, {} blocked, {} cached",
            report.duration_ms,
            report.built.len(),
            report.failed.len(),
            report.blocked.len(),
            report.cached.len()
        );

        if let Some(observer) = &self.observer {
            observer.on_pass_complete(&report);
        }
        Ok(report)
    }

    fn commit(&self, id: &ArtifactId, payload: Payload) -> Result<()> {
        let inputs = self.graph.transitive_inputs(id);
        let snapshot = self.fingerprints.snapshot(inputs.iter().map(PathBuf::as_path))?;
        let sources = self.graph.dependencies(&NodeKey::Artifact(id.clone()));
        self.cache.put_with_sources(id.clone(), payload, snapshot, sources);
        Ok(())
    }

    /// Fresh payload of an artifact, or [`Lookup::Invalid`].
    pub fn artifact(&self, id: &ArtifactId) -> Lookup {
        self.lookup(id)
    }

    /// Last payload of an artifact regardless of validity.
    pub fn stale(&self, id: &ArtifactId) -> Option<Payload> {
        self.cache.stale(id)
    }

    /// Cache state of every defined artifact, sorted by id.
    pub fn artifact_states(&self) -> Vec<(ArtifactId, ArtifactState)> {
        self.graph
            .artifacts()
            .into_iter()
            .map(|id| {
                let state = if self.lookup(&id).is_hit() {
                    ArtifactState::Fresh
                } else if self.cache.stale(&id).is_some() {
                    ArtifactState::Stale
                } else {
                    ArtifactState::Missing
                };
                (id, state)
            })
            .collect()
    }

    /// Persist the fingerprint store and cache.
    ///
    /// Entries of artifacts that are no longer defined are dropped. No-op
    /// for an in-memory engine.
    pub fn save(&self) -> Result<()> {
        let Some(dirs) = &self.dirs else {
            return Ok(());
        };
        dirs.create()?;

        for id in self.cache.ids() {
            if !self.specs.contains_key(&id) {
                self.cache.remove(&id);
            }
        }

        self.fingerprints.save(&dirs.state_dir)?;
        let written = CachePersistence::new(&dirs.cache_dir).save(&self.cache)?;
        tracing::debug!("Saved {} cache entries to {}", written, dirs.cache_dir.display());
        Ok(())
    }

    /// Every declared input path, sorted.
    pub fn declared_inputs(&self) -> Vec<PathBuf> {
        self.specs
            .values()
            .flat_map(|spec| spec.inputs.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn fingerprints(&self) -> &FingerprintStore {
        &self.fingerprints
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn dirs(&self) -> Option<&ProjectDirs> {
        self.dirs.as_ref()
    }

    /// Artifacts left unbuilt by earlier passes.
    pub fn pending(&self) -> &BTreeSet<ArtifactId> {
        &self.pending
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.executor.workers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execute::ConcatCompiler;
    use std::fs;
    use tempfile::TempDir;

    fn engine() -> BuildEngine {
        let config = BuildConfig {
            workers: 2,
            ..BuildConfig::default()
        };
        BuildEngine::new(config, Arc::new(ConcatCompiler::default())).unwrap()
    }

    #[test]
    fn test_redefining_artifact_fails() {
        let mut engine = engine();
        engine.define_artifact(ArtifactSpec::new("x")).unwrap();
        assert!(matches!(
            engine.define_artifact(ArtifactSpec::new("x")),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_cycle_refuses_only_that_edge() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.js");
        fs::write(&a, "a").unwrap();

        let mut engine = engine();
        engine
            .define_artifact(ArtifactSpec::new("x").depends_on("y"))
            .unwrap();
        let err = engine
            .define_artifact(ArtifactSpec::new("y").input(&a).depends_on("x"))
            .unwrap_err();
        assert!(matches!(err, Error::CycleDetected { .. }));

        // The input edge of y is still in place.
        assert!(engine
            .graph()
            .dependents(&NodeKey::Input(a))
            .contains(&NodeKey::artifact("y")));
    }

    #[test]
    fn test_recreated_input_is_relinked() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.js");
        fs::write(&a, "v1").unwrap();

        let mut engine = engine();
        engine.define_artifact(ArtifactSpec::new("x").input(&a)).unwrap();
        engine.scan_inputs().unwrap();
        engine.run_pass(&AbortHandle::new()).unwrap();

        fs::remove_file(&a).unwrap();
        engine.apply_event(&ChangeEvent::deleted(&a)).unwrap();
        assert!(!engine.graph().contains(&NodeKey::Input(a.clone())));
        let report = engine.run_pass(&AbortHandle::new()).unwrap();
        assert_eq!(report.built, vec![ArtifactId::from("x")]);
        assert_eq!(engine.artifact(&ArtifactId::from("x")).into_payload(), Some(Payload::from("")));

        fs::write(&a, "v2").unwrap();
        engine.apply_event(&ChangeEvent::created(&a)).unwrap();
        assert!(engine.graph().contains(&NodeKey::Input(a.clone())));
        engine.run_pass(&AbortHandle::new()).unwrap();
        assert_eq!(
            engine.artifact(&ArtifactId::from("x")).into_payload(),
            Some(Payload::from("v2"))
        );
    }

    #[test]
    fn test_artifact_states() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.js");
        fs::write(&a, "v1").unwrap();

        let mut engine = engine();
        engine.define_artifact(ArtifactSpec::new("x").input(&a)).unwrap();
        engine.scan_inputs().unwrap();
        assert_eq!(engine.artifact_states(), vec![(ArtifactId::from("x"), ArtifactState::Missing)]);
        assert!(engine.has_pending_work());

        engine.run_pass(&AbortHandle::new()).unwrap();
        assert_eq!(engine.artifact_states(), vec![(ArtifactId::from("x"), ArtifactState::Fresh)]);
        assert!(!engine.has_pending_work());

        fs::write(&a, "v2").unwrap();
        engine.apply_event(&ChangeEvent::modified(&a)).unwrap();
        assert_eq!(engine.artifact_states(), vec![(ArtifactId::from("x"), ArtifactState::Stale)]);
    }
}
