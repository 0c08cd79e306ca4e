//! Watcher and coordinator wired together against a real directory.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use rebundle_core::{
    ArtifactId, ArtifactSpec, BuildConfig, BuildEngine, ConcatCompiler, Payload, WatchConfig,
    WatchMode,
};
use rebundle_watch::{Coordinator, InputWatcher, PassOutcome};
use tempfile::TempDir;
use tokio::sync::{mpsc, oneshot};

#[tokio::test]
async fn test_file_edit_rebuilds_dependents() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().canonicalize().unwrap();
    let a = dir.join("a.js");
    let b = dir.join("b.js");
    fs::write(&a, "A;").unwrap();
    fs::write(&b, "B;").unwrap();

    let config = BuildConfig {
        workers: 2,
        ..BuildConfig::default()
    };
    let mut engine = BuildEngine::new(config, Arc::new(ConcatCompiler::default())).unwrap();
    engine.define_artifact(ArtifactSpec::new("x").input(&a)).unwrap();
    engine.define_artifact(ArtifactSpec::new("y").input(&b)).unwrap();
    engine
        .define_artifact(ArtifactSpec::new("z").depends_on("x").depends_on("y"))
        .unwrap();
    engine.scan_inputs().unwrap();

    let watch_config = WatchConfig {
        mode: WatchMode::Poll,
        debounce_ms: 50,
        poll_interval_ms: 50,
    };
    let (tx, rx) = mpsc::unbounded_channel();
    let _watcher = InputWatcher::new(&engine.declared_inputs(), &watch_config, tx).unwrap();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut stop_tx = Some(stop_tx);
    let mut reports = Vec::new();
    let edit_path = a.clone();

    let run = Coordinator::new(engine, rx).run(
        async {
            let _ = stop_rx.await;
        },
        |outcome| {
            let PassOutcome::Completed(report) = outcome else {
                return;
            };
            reports.push(report.clone());
            if reports.len() == 1 {
                // Give the poller time to snapshot before editing.
                std::thread::sleep(Duration::from_millis(200));
                fs::write(&edit_path, "A2;").unwrap();
            } else if let Some(stop) = stop_tx.take() {
                let _ = stop.send(());
            }
        },
    );

    let engine = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("coordinator did not stop")
        .unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].built.len(), 3);
    assert_eq!(
        reports[1].built,
        vec![ArtifactId::from("x"), ArtifactId::from("z")]
    );
    assert_eq!(reports[1].cached, vec![ArtifactId::from("y")]);
    assert_eq!(
        engine.artifact(&ArtifactId::from("z")).into_payload(),
        Some(Payload::from("A2;B;"))
    );
}
