//! Build command implementation for rebundle CLI.
//!
//! Runs a single pass over the project and persists the cache.

use std::path::Path;

use rebundle_core::{AbortHandle, ArtifactId, BuildEngine, PassObserver, PassReport, ProjectConfig, TaskOutcome};

use crate::colors;

/// Result type for CLI operations.
pub type CliResult = anyhow::Result<()>;

/// Prints one line per finished task.
pub struct TaskPrinter;

impl PassObserver for TaskPrinter {
    fn on_task_finished(&self, artifact: &ArtifactId, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Built(payload) => println!(
                "  {}✓{} {} {}({} bytes){}",
                colors::GREEN,
                colors::RESET,
                artifact,
                colors::DIM,
                payload.len(),
                colors::RESET
            ),
            TaskOutcome::Failed(message) => {
                println!("  {}✗{} {}: {}", colors::RED, colors::RESET, artifact, message)
            }
            TaskOutcome::TimedOut { elapsed_ms } => println!(
                "  {}✗{} {}: timed out after {}ms",
                colors::RED,
                colors::RESET,
                artifact,
                elapsed_ms
            ),
            TaskOutcome::Blocked { by } => println!(
                "  {}-{} {} {}(blocked by {}){}",
                colors::YELLOW,
                colors::RESET,
                artifact,
                colors::DIM,
                by,
                colors::RESET
            ),
            TaskOutcome::Cancelled => {}
        }
        colors::flush_stdout();
    }
}

/// Run one pass.
///
/// Exits with an error if any artifact failed or was blocked; the cache is
/// saved either way.
pub fn execute(config_path: &Path, json: bool) -> CliResult {
    let project = ProjectConfig::load(config_path)?;
    let mut engine = BuildEngine::from_project(&project)?;

    if !json {
        println!(
            "\n{}rebundle{} - Building {}{}{} ({} artifacts, {} workers)\n",
            colors::BOLD,
            colors::RESET,
            colors::CYAN,
            project.root.display(),
            colors::RESET,
            project.artifacts.len(),
            engine.workers()
        );
        engine.set_observer(TaskPrinter);
    }

    let report = engine.run_pass(&AbortHandle::new())?;
    engine.save()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }

    if !report.is_success() {
        anyhow::bail!(
            "{} failed, {} blocked",
            report.failed.len(),
            report.blocked.len()
        );
    }
    Ok(())
}

/// Print the one-line pass summary.
pub fn print_summary(report: &PassReport) {
    if report.corrupted > 0 {
        println!(
            "{}Warning:{} discarded {} corrupt cache entries",
            colors::YELLOW,
            colors::RESET,
            report.corrupted
        );
    }

    let color = if report.is_success() {
        colors::GREEN
    } else {
        colors::RED
    };
    println!(
        "\n{}{}{} {} built, {} failed, {} blocked, {} cached in {:.2}s",
        color,
        if report.is_success() { "Completed" } else { "Finished with errors" },
        colors::RESET,
        report.built.len(),
        report.failed.len(),
        report.blocked.len(),
        report.cached.len(),
        report.duration_ms as f64 / 1000.0
    );
}
