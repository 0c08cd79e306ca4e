//! Execution of build passes.
//!
//! # Architecture
//!
//! ```text
//! Vec<Batch> (from BuildScheduler)
//!     │
//!     └── ParallelExecutor (rayon pool, N workers)
//!             │
//!             ├── batch k: par_iter over runnable tasks
//!             │       └── Compiler::compile, optionally under a timeout
//!             │
//!             ├── dependents of failed tasks → Blocked
//!             │
//!             └── outputs staged per pass, committed by the engine
//! ```
//!
//! # Module Structure
//!
//! - `compiler` - Compiler trait and the built-in compilers
//! - `context` - Cancellation handle and pass observer
//! - `parallel` - ParallelExecutor for batched execution
//! - `report` - Task outcomes and pass reports

mod compiler;
mod context;
mod parallel;
mod report;

pub use compiler::{CommandCompiler, CompileError, CompileRequest, Compiler, ConcatCompiler};
pub use context::{AbortHandle, PassObserver};
pub use parallel::{ExecutionResult, ParallelExecutor};
pub use report::{PassReport, TaskOutcome};
