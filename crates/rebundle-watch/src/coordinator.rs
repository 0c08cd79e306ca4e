//! Rebuild coordination.
//!
//! A single task owns the [`BuildEngine`]. Events are queued while idle and
//! applied between passes. A pass runs on a blocking worker that takes the
//! engine and hands it back when done; an event arriving mid-pass aborts it,
//! and the next pass covers both the aborted work and the new changes.

use std::future::Future;

use rebundle_core::{AbortHandle, BuildEngine, ChangeEvent, Error, PassReport};
use tokio::sync::mpsc;

use crate::error::{WatchError, WatchResult};

/// How a coordinated pass ended.
#[derive(Debug)]
pub enum PassOutcome {
    /// The pass ran to completion (possibly with per-artifact failures).
    Completed(PassReport),
    /// New changes arrived and the pass was abandoned.
    Aborted,
    /// A non-fatal error stopped the pass.
    Failed(Error),
}

/// Owns the engine and drives passes from a stream of change events.
pub struct Coordinator {
    engine: BuildEngine,
    events: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl Coordinator {
    pub fn new(engine: BuildEngine, events: mpsc::UnboundedReceiver<ChangeEvent>) -> Self {
        Self { engine, events }
    }

    /// Run until `shutdown` resolves or the event channel closes.
    ///
    /// Runs an initial pass if anything is out of date. `on_pass` is called
    /// after every pass. A running pass is aborted on shutdown. The engine is
    /// saved and returned on exit; a fatal engine error ends the loop early.
    pub async fn run<S, F>(self, shutdown: S, mut on_pass: F) -> WatchResult<BuildEngine>
    where
        S: Future<Output = ()>,
        F: FnMut(&PassOutcome),
    {
        let Self {
            mut engine,
            mut events,
        } = self;
        tokio::pin!(shutdown);

        let mut queued: Vec<ChangeEvent> = Vec::new();
        let mut closed = false;
        let mut stopping = false;
        let mut run_now = engine.has_pending_work();

        while !stopping {
            if !run_now {
                if closed {
                    break;
                }
                tokio::select! {
                    _ = &mut shutdown => break,
                    event = events.recv() => match event {
                        Some(event) => queued.push(event),
                        None => {
                            closed = true;
                            continue;
                        }
                    },
                }
            }
            run_now = false;

            while let Ok(event) = events.try_recv() {
                queued.push(event);
            }
            apply_queued(&mut queued, |event| engine.apply_event(event))?;

            if !engine.has_pending_work() {
                continue;
            }

            let abort = AbortHandle::new();
            let pass_abort = abort.clone();
            let mut pass = tokio::task::spawn_blocking(move || {
                let result = engine.run_pass(&pass_abort);
                (engine, result)
            });

            let (returned, result) = loop {
                tokio::select! {
                    joined = &mut pass => {
                        break joined.map_err(|e| WatchError::Worker(e.to_string()))?;
                    }
                    event = events.recv(), if !closed => match event {
                        Some(event) => {
                            if !abort.is_aborted() {
                                tracing::debug!("Change during pass, aborting");
                            }
                            queued.push(event);
                            abort.abort();
                        }
                        None => closed = true,
                    },
                    _ = &mut shutdown, if !stopping => {
                        stopping = true;
                        abort.abort();
                    }
                }
            };
            engine = returned;

            let outcome = match result {
                Ok(report) => PassOutcome::Completed(report),
                Err(Error::Aborted) => PassOutcome::Aborted,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => PassOutcome::Failed(e),
            };
            on_pass(&outcome);

            // Rerun right away for changes queued during the pass.
            run_now = !queued.is_empty();
        }

        engine.save()?;
        Ok(engine)
    }
}

/// Apply and drain queued events in order. A non-fatal failure skips only
/// its own event; a fatal one stops and is returned.
fn apply_queued<F>(queued: &mut Vec<ChangeEvent>, mut apply: F) -> Result<(), Error>
where
    F: FnMut(&ChangeEvent) -> Result<(), Error>,
{
    for event in queued.drain(..) {
        match apply(&event) {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => tracing::warn!("Failed to apply change to {}: {}", event.path.display(), e),
        }
    }
    Ok(())
}
