//! Task outcomes and pass reports.

use serde::Serialize;

use crate::cache::Payload;
use crate::graph::ArtifactId;

/// Result of one task in a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Compiled successfully. The payload is staged until the pass commits.
    Built(Payload),

    /// The compiler returned an error or panicked.
    Failed(String),

    /// The compiler ran longer than the per-task timeout.
    TimedOut { elapsed_ms: u64 },

    /// An invalidated dependency failed, so this task never ran.
    Blocked { by: ArtifactId },

    /// The pass was aborted before the task started.
    Cancelled,
}

impl TaskOutcome {
    pub fn is_built(&self) -> bool {
        matches!(self, TaskOutcome::Built(_))
    }

    /// Whether dependents of this task must be blocked.
    pub fn blocks_dependents(&self) -> bool {
        !self.is_built()
    }
}

/// Summary of a completed build pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Artifacts rebuilt and committed to the cache.
    pub built: Vec<ArtifactId>,

    /// Artifacts skipped because a dependency failed.
    pub blocked: Vec<ArtifactId>,

    /// Artifacts that failed or timed out, with the reason.
    pub failed: Vec<(ArtifactId, String)>,

    /// Artifacts served from the cache without rebuilding.
    pub cached: Vec<ArtifactId>,

    /// Persisted cache entries discarded as corrupt since the last pass.
    pub corrupted: usize,

    /// Wall time of the pass.
    pub duration_ms: u64,
}

impl PassReport {
    /// Whether every scheduled artifact was built.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.blocked.is_empty()
    }

    /// Whether the pass rebuilt nothing and nothing failed.
    pub fn is_noop(&self) -> bool {
        self.built.is_empty() && self.is_success()
    }
}
