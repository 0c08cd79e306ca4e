//! Watch command implementation for rebundle CLI.
//!
//! Watches every declared input and rebuilds on changes.

use std::path::Path;

use rebundle_core::{BuildEngine, ProjectConfig, WatchMode};
use rebundle_watch::{Coordinator, InputWatcher, PassOutcome};
use tokio::sync::mpsc;

use crate::build::{CliResult, TaskPrinter, print_summary};
use crate::colors;

/// Execute the watch command.
pub async fn execute(config_path: &Path, poll: bool) -> CliResult {
    let project = ProjectConfig::load(config_path)?;
    let mut watch_config = project.watch.clone();
    if poll {
        watch_config.mode = WatchMode::Poll;
    }

    let mut engine = BuildEngine::from_project(&project)?;
    engine.set_observer(TaskPrinter);

    let (tx, rx) = mpsc::unbounded_channel();
    let watcher = InputWatcher::new(&engine.declared_inputs(), &watch_config, tx)
        .map_err(|e| anyhow::anyhow!("Failed to create file watcher: {}", e))?;

    // Print header
    println!(
        "\n{}rebundle watch{} - {}{}{}",
        colors::BOLD,
        colors::RESET,
        colors::CYAN,
        project.root.display(),
        colors::RESET
    );
    println!("{}", "─".repeat(50));
    println!(
        "{}Watching {} directories ({:?} mode)... (Ctrl+C to stop){}",
        colors::DIM,
        watcher.watched_dirs().len(),
        watcher.mode(),
        colors::RESET
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let engine = Coordinator::new(engine, rx)
        .run(shutdown, |outcome| match outcome {
            PassOutcome::Completed(report) => {
                print_summary(report);
                println!(
                    "\n{}Watching for changes... (Ctrl+C to stop){}",
                    colors::DIM,
                    colors::RESET
                );
            }
            PassOutcome::Aborted => println!(
                "\n{}Inputs changed, restarting pass...{}",
                colors::YELLOW,
                colors::RESET
            ),
            PassOutcome::Failed(e) => {
                eprintln!("{}Error:{} {}", colors::RED, colors::RESET, e.with_hint())
            }
        })
        .await?;

    drop(watcher);
    println!(
        "\n{}Stopped.{} Cache saved for {} artifacts.",
        colors::DIM,
        colors::RESET,
        engine.cache().len()
    );
    Ok(())
}
