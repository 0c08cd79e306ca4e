//! Cancellation and progress reporting for build passes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::report::{PassReport, TaskOutcome};
use crate::graph::ArtifactId;

/// Handle for cooperative cancellation of a build pass.
///
/// `AbortHandle` can be cloned and shared across threads; any clone can
/// trigger the abort, which is visible to all other clones. The executor
/// checks it before each task and after each batch.
///
/// # Example
///
/// ```
/// use rebundle_core::execute::AbortHandle;
///
/// let handle = AbortHandle::new();
/// let handle_clone = handle.clone();
///
/// assert!(!handle.is_aborted());
/// handle_clone.abort();
/// assert!(handle.is_aborted());
/// ```
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    /// Shared abort flag.
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Create a new abort handle.
    pub fn new() -> Self {
        Self {
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check if abort has been requested.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Request abort of the pass.
    ///
    /// Tasks already running finish, but their outputs are discarded.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }
}

/// Callback trait for pass progress reporting.
///
/// Called from worker threads; implementations must be cheap and must not
/// call back into the engine.
pub trait PassObserver: Send + Sync {
    /// Called when a batch starts executing.
    fn on_batch_started(&self, _batch: usize, _task_count: usize) {}

    /// Called once per task in the pass, including blocked ones.
    fn on_task_finished(&self, _artifact: &ArtifactId, _outcome: &TaskOutcome) {}

    /// Called after the pass has been committed.
    fn on_pass_complete(&self, _report: &PassReport) {}
}
