//! Error types for rebundle-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::execute::CompileError;

/// Result type for rebundle-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in rebundle-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Query for an input that was never registered.
    #[error("unknown input: {}", .0.display())]
    UnknownInput(PathBuf),

    /// Query for an artifact that was never defined.
    #[error("unknown artifact: {0}")]
    UnknownArtifact(String),

    /// Adding an edge would close a cycle in the dependency graph.
    #[error("cyclic dependency detected: {from} -> {to}")]
    CycleDetected { from: String, to: String },

    /// A single artifact failed to build.
    #[error("compilation failed for artifact {artifact}: {source}")]
    Compile {
        artifact: String,
        #[source]
        source: CompileError,
    },

    /// A single artifact exceeded the per-task timeout.
    #[error("artifact {artifact} timed out after {elapsed_ms}ms")]
    Timeout { artifact: String, elapsed_ms: u64 },

    /// A persisted cache entry failed validation on load.
    #[error("corrupt cache entry at {}: {reason}", path.display())]
    CacheCorruption { path: PathBuf, reason: String },

    /// The fingerprint store could not be read. Fatal for the pass.
    #[error("fingerprint store failure at {}: {reason}", path.display())]
    FingerprintStore { path: PathBuf, reason: String },

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The pass was cancelled before completion.
    #[error("build pass aborted")]
    Aborted,

    /// Invalid operation (e.g., an edge into an input node).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl Error {
    /// Whether this error aborts the whole pass rather than a single artifact.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::FingerprintStore { .. } | Error::Io(_) | Error::Serialization(_)
        )
    }

    /// Render the error with a short recovery hint for terminal output.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Error::UnknownInput(_) => Some("register the input before querying it"),
            Error::UnknownArtifact(_) => Some("check the [[artifact]] ids in rebundle.toml"),
            Error::CycleDetected { .. } => Some("remove one of the depends_on entries forming the cycle"),
            Error::Timeout { .. } => Some("raise build.task_timeout_ms or speed up the compiler"),
            Error::CacheCorruption { .. } => Some("the entry is rebuilt automatically"),
            Error::FingerprintStore { .. } => Some("run `rebundle clean` to reset the cache directory"),
            Error::Config(_) => Some("see rebundle.toml"),
            _ => None,
        };
        match hint {
            Some(hint) => format!("{self}\n  hint: {hint}"),
            None => self.to_string(),
        }
    }
}
