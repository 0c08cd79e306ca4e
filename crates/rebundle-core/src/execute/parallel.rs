//! Parallel executor for build passes.
//!
//! Executes batches in order, and the tasks of one batch concurrently on a
//! bounded rayon pool.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use rayon::prelude::*;

use super::compiler::{CompileError, CompileRequest, Compiler};
use super::context::{AbortHandle, PassObserver};
use super::report::TaskOutcome;
use crate::cache::Payload;
use crate::error::{Error, Result};
use crate::graph::ArtifactId;
use crate::schedule::{Batch, BuildTask};

/// Staged results of one pass.
///
/// Nothing here is visible to cache readers until the engine commits it.
#[derive(Debug, Default)]
pub struct ExecutionResult {
    /// Outcome of every scheduled task, keyed by artifact.
    pub outcomes: BTreeMap<ArtifactId, TaskOutcome>,
}

/// Executor that runs the tasks of a batch concurrently.
///
/// Batches are processed sequentially; a batch starts only after every task
/// of the previous batch has finished. At most `workers` compiles run at
/// once.
pub struct ParallelExecutor {
    pool: rayon::ThreadPool,
    compiler: Arc<dyn Compiler>,
    task_timeout: Option<Duration>,
}

impl ParallelExecutor {
    /// Create an executor with a dedicated pool of `workers` threads.
    pub fn new(
        workers: usize,
        compiler: Arc<dyn Compiler>,
        task_timeout: Option<Duration>,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("rebundle-worker-{i}"))
            .build()
            .map_err(|e| Error::InvalidOperation(format!("failed to start worker pool: {e}")))?;

        Ok(Self {
            pool,
            compiler,
            task_timeout,
        })
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Name of the underlying compiler.
    pub fn compiler_name(&self) -> &str {
        self.compiler.name()
    }

    /// Run every batch.
    ///
    /// `resolve` supplies payloads of dependencies that are not rebuilt in
    /// this pass. Tasks whose invalidated dependency did not build are
    /// recorded as [`TaskOutcome::Blocked`] without running.
    ///
    /// Returns [`Error::Aborted`] if `abort` is set before the last batch
    /// completes; staged outputs are dropped in that case.
    pub fn execute(
        &self,
        batches: &[Batch],
        resolve: &(dyn Fn(&ArtifactId) -> Option<Payload> + Sync),
        abort: &AbortHandle,
        observer: Option<&dyn PassObserver>,
    ) -> Result<ExecutionResult> {
        let mut result = ExecutionResult::default();
        let mut unbuilt: BTreeSet<ArtifactId> = BTreeSet::new();

        for (batch_idx, batch) in batches.iter().enumerate() {
            if abort.is_aborted() {
                return Err(Error::Aborted);
            }
            if batch.is_empty() {
                continue;
            }

            if let Some(observer) = observer {
                observer.on_batch_started(batch_idx, batch.len());
            }
            tracing::debug!("Batch {}: {} tasks", batch_idx, batch.len());

            let mut runnable = Vec::with_capacity(batch.len());
            for task in &batch.tasks {
                match task.blocked_on.iter().find(|dep| unbuilt.contains(*dep)) {
                    Some(dep) => {
                        let outcome = TaskOutcome::Blocked { by: dep.clone() };
                        if let Some(observer) = observer {
                            observer.on_task_finished(&task.artifact, &outcome);
                        }
                        result.outcomes.insert(task.artifact.clone(), outcome);
                        unbuilt.insert(task.artifact.clone());
                    }
                    None => runnable.push(task),
                }
            }

            let staged = &result.outcomes;
            let outcomes: Vec<(ArtifactId, TaskOutcome)> = self.pool.install(|| {
                runnable
                    .par_iter()
                    .map(|task| {
                        let outcome = self.run_task(task, staged, resolve, abort);
                        if let Some(observer) = observer {
                            observer.on_task_finished(&task.artifact, &outcome);
                        }
                        (task.artifact.clone(), outcome)
                    })
                    .collect()
            });

            if abort.is_aborted() {
                return Err(Error::Aborted);
            }

            for (id, outcome) in outcomes {
                if outcome.blocks_dependents() {
                    unbuilt.insert(id.clone());
                }
                result.outcomes.insert(id, outcome);
            }
        }

        Ok(result)
    }

    fn run_task(
        &self,
        task: &BuildTask,
        staged: &BTreeMap<ArtifactId, TaskOutcome>,
        resolve: &(dyn Fn(&ArtifactId) -> Option<Payload> + Sync),
        abort: &AbortHandle,
    ) -> TaskOutcome {
        if abort.is_aborted() {
            return TaskOutcome::Cancelled;
        }

        let mut dependencies = Vec::with_capacity(task.dependencies.len());
        for dep in &task.dependencies {
            let payload = match staged.get(dep) {
                Some(TaskOutcome::Built(payload)) => Some(payload.clone()),
                _ => resolve(dep),
            };
            match payload {
                Some(payload) => dependencies.push((dep.clone(), payload)),
                None => {
                    return TaskOutcome::Failed(
                        CompileError::MissingDependency(dep.clone()).to_string(),
                    );
                }
            }
        }

        let started = Instant::now();
        let request = CompileRequest {
            artifact: task.artifact.clone(),
            inputs: task.inputs.clone(),
            dependencies,
            deadline: self.task_timeout.map(|timeout| started + timeout),
        };

        let outcome = match self.task_timeout {
            Some(timeout) => self.compile_with_timeout(request, timeout),
            None => compile_guarded(self.compiler.as_ref(), &request, started),
        };

        match &outcome {
            TaskOutcome::Built(payload) => tracing::debug!(
                "Built {} ({} bytes) in {:?}",
                task.artifact,
                payload.len(),
                started.elapsed()
            ),
            TaskOutcome::Failed(message) => {
                tracing::warn!("Build of {} failed: {}", task.artifact, message)
            }
            TaskOutcome::TimedOut { elapsed_ms } => {
                tracing::warn!("Build of {} timed out after {}ms", task.artifact, elapsed_ms)
            }
            TaskOutcome::Blocked { .. } | TaskOutcome::Cancelled => {}
        }
        outcome
    }

    /// Run the compile on its own thread and stop waiting after `timeout`.
    ///
    /// The request carries the matching deadline, so compilers that spawn
    /// processes stop them; a compile still running past it is detached and
    /// its result dropped.
    fn compile_with_timeout(&self, request: CompileRequest, timeout: Duration) -> TaskOutcome {
        let started = Instant::now();
        let (tx, rx) = mpsc::sync_channel(1);
        let compiler = Arc::clone(&self.compiler);
        let artifact = request.artifact.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("rebundle-compile-{artifact}"))
            .spawn(move || {
                let _ = tx.send(compile_guarded(compiler.as_ref(), &request, started));
            });
        if let Err(e) = spawned {
            return TaskOutcome::Failed(format!("failed to spawn compile thread: {e}"));
        }

        match rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => TaskOutcome::TimedOut {
                elapsed_ms: started.elapsed().as_millis() as u64,
            },
            Err(RecvTimeoutError::Disconnected) => {
                TaskOutcome::Failed(format!("compile thread for {artifact} exited without a result"))
            }
        }
    }
}

/// Compile, converting errors and panics into an outcome.
///
/// A compiler killed at the request deadline counts as a timeout.
fn compile_guarded(compiler: &dyn Compiler, request: &CompileRequest, started: Instant) -> TaskOutcome {
    match catch_unwind(AssertUnwindSafe(|| compiler.compile(request))) {
        Ok(Ok(payload)) => TaskOutcome::Built(payload),
        Ok(Err(CompileError::Killed { .. })) => TaskOutcome::TimedOut {
            elapsed_ms: started.elapsed().as_millis() as u64,
        },
        Ok(Err(source)) => TaskOutcome::Failed(
            Error::Compile {
                artifact: request.artifact.to_string(),
                source,
            }
            .to_string(),
        ),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            TaskOutcome::Failed(format!("compiler panicked: {message}"))
        }
    }
}
