//! Input watcher.
//!
//! Watches the directories containing declared inputs and turns debounced
//! notifications for those inputs into [`ChangeEvent`]s.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify_debouncer_mini::notify::{self, PollWatcher, RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{Config, DebounceEventResult, Debouncer, new_debouncer, new_debouncer_opt};
use rebundle_core::{ChangeEvent, ChangeKind, WatchConfig, WatchMode};
use rustc_hash::FxHashSet;
use tokio::sync::mpsc;

use crate::error::{WatchError, WatchResult};

// Debouncer handle; dropping it stops the watcher.
enum Backend {
    Event(Debouncer<RecommendedWatcher>),
    Poll(Debouncer<PollWatcher>),
}

impl Backend {
    fn watch(&mut self, dir: &Path) -> notify::Result<()> {
        match self {
            Backend::Event(d) => d.watcher().watch(dir, RecursiveMode::NonRecursive),
            Backend::Poll(d) => d.watcher().watch(dir, RecursiveMode::NonRecursive),
        }
    }
}

/// File watcher handle.
///
/// Events are sent on the channel passed to [`InputWatcher::new`] until the
/// handle is dropped.
pub struct InputWatcher {
    _backend: Backend,
    watched_dirs: Vec<PathBuf>,
    mode: WatchMode,
}

impl InputWatcher {
    /// Watch `inputs` and report their changes on `tx`.
    ///
    /// Only the listed paths are reported; other files in the same
    /// directories are ignored. Directories that do not exist are skipped.
    pub fn new(
        inputs: &[PathBuf],
        config: &WatchConfig,
        tx: mpsc::UnboundedSender<ChangeEvent>,
    ) -> WatchResult<Self> {
        let tracked: FxHashSet<PathBuf> = inputs.iter().cloned().collect();
        let present: FxHashSet<PathBuf> = inputs.iter().filter(|p| p.exists()).cloned().collect();
        let handler = event_handler(tracked, present, tx);

        let mut backend = match config.mode {
            WatchMode::Event => Backend::Event(
                new_debouncer(config.debounce(), handler).map_err(|e| WatchError::Watch(e.to_string()))?,
            ),
            WatchMode::Poll => {
                let notify_config = notify::Config::default()
                    .with_poll_interval(config.poll_interval())
                    .with_compare_contents(true);
                let debouncer_config = Config::default()
                    .with_timeout(config.debounce())
                    .with_notify_config(notify_config);
                Backend::Poll(
                    new_debouncer_opt::<_, PollWatcher>(debouncer_config, handler)
                        .map_err(|e| WatchError::Watch(e.to_string()))?,
                )
            }
        };

        let dirs: BTreeSet<PathBuf> = inputs
            .iter()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .collect();

        let mut watched_dirs = Vec::with_capacity(dirs.len());
        for dir in dirs {
            if !dir.is_dir() {
                tracing::warn!("Not watching missing directory {}", dir.display());
                continue;
            }
            backend
                .watch(&dir)
                .map_err(|e| WatchError::Watch(format!("{}: {e}", dir.display())))?;
            watched_dirs.push(dir);
        }

        tracing::debug!(
            "Watching {} inputs in {} directories ({:?} mode)",
            inputs.len(),
            watched_dirs.len(),
            config.mode
        );

        Ok(Self {
            _backend: backend,
            watched_dirs,
            mode: config.mode,
        })
    }

    /// Directories being watched, sorted.
    pub fn watched_dirs(&self) -> &[PathBuf] {
        &self.watched_dirs
    }

    pub fn mode(&self) -> WatchMode {
        self.mode
    }
}

/// Build the debouncer callback.
///
/// `present` tracks which inputs currently exist, to tell creations from
/// modifications.
fn event_handler(
    tracked: FxHashSet<PathBuf>,
    mut present: FxHashSet<PathBuf>,
    tx: mpsc::UnboundedSender<ChangeEvent>,
) -> impl FnMut(DebounceEventResult) + Send + 'static {
    move |result: DebounceEventResult| {
        let events = match result {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!("File watch error: {}", e);
                return;
            }
        };

        for event in events {
            if !tracked.contains(&event.path) {
                continue;
            }
            let kind = classify(&mut present, &event.path);
            tracing::debug!("{:?}: {}", kind, event.path.display());
            // The receiver is gone once the coordinator stops.
            let _ = tx.send(ChangeEvent::new(event.path, kind));
        }
    }
}

fn classify(present: &mut FxHashSet<PathBuf>, path: &Path) -> ChangeKind {
    if path.exists() {
        if present.insert(path.to_path_buf()) {
            ChangeKind::Created
        } else {
            ChangeKind::Modified
        }
    } else {
        present.remove(path);
        ChangeKind::Deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use tokio::time::timeout;

    fn poll_config() -> WatchConfig {
        WatchConfig {
            mode: WatchMode::Poll,
            debounce_ms: 50,
            poll_interval_ms: 50,
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ChangeEvent>) -> ChangeEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event within 5s")
            .expect("channel closed")
    }

    #[test]
    fn test_classify() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.js");
        let mut present = FxHashSet::default();

        fs::write(&file, "a").unwrap();
        assert_eq!(classify(&mut present, &file), ChangeKind::Created);
        assert_eq!(classify(&mut present, &file), ChangeKind::Modified);
        fs::remove_file(&file).unwrap();
        assert_eq!(classify(&mut present, &file), ChangeKind::Deleted);
        assert!(present.is_empty());
    }

    #[tokio::test]
    async fn test_watcher_creation() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("a.js");
        fs::write(&input, "a").unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let watcher = InputWatcher::new(&[input], &WatchConfig::default(), tx).unwrap();
        assert_eq!(watcher.watched_dirs(), &[temp.path().to_path_buf()]);
        assert_eq!(watcher.mode(), WatchMode::Event);
    }

    #[tokio::test]
    async fn test_missing_directory_is_skipped() {
        let temp = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let watcher =
            InputWatcher::new(&[temp.path().join("nope/a.js")], &poll_config(), tx).unwrap();
        assert!(watcher.watched_dirs().is_empty());
    }

    #[tokio::test]
    async fn test_poll_mode_reports_tracked_changes_only() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().canonicalize().unwrap();
        let input = dir.join("a.js");
        fs::write(&input, "v1").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watcher = InputWatcher::new(&[input.clone()], &poll_config(), tx).unwrap();

        // Let the poller take its initial snapshot.
        tokio::time::sleep(Duration::from_millis(200)).await;
        fs::write(dir.join("untracked.js"), "x").unwrap();
        fs::write(&input, "v2").unwrap();

        let event = next_event(&mut rx).await;
        assert_eq!(event, ChangeEvent::modified(&input));

        fs::remove_file(&input).unwrap();
        let event = next_event(&mut rx).await;
        assert_eq!(event, ChangeEvent::deleted(&input));
    }
}
