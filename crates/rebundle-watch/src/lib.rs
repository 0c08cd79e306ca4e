//! File watching and rebuild coordination for rebundle.
//!
//! This crate provides:
//! - An input watcher backed by OS notifications or periodic polling
//! - A coordinator task that owns the build engine, runs passes on a
//!   blocking worker, and aborts a running pass when new changes arrive

pub mod coordinator;
pub mod error;
pub mod watcher;

pub use coordinator::{Coordinator, PassOutcome};
pub use error::{WatchError, WatchResult};
pub use watcher::InputWatcher;
