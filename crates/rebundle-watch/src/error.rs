//! Error types for rebundle-watch.

/// Watch error type.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The file watcher could not be set up.
    #[error("File watch error: {0}")]
    Watch(String),

    /// rebundle core error.
    #[error("Core error: {0}")]
    Core(#[from] rebundle_core::Error),

    /// The blocking build worker panicked or was cancelled.
    #[error("Build worker failed: {0}")]
    Worker(String),
}

/// Result type for watch operations.
pub type WatchResult<T> = Result<T, WatchError>;
