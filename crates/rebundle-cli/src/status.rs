//! Status command implementation for rebundle CLI.

use std::path::Path;

use rebundle_core::{ArtifactState, BuildEngine, ProjectConfig};

use crate::build::CliResult;
use crate::colors;

/// Show the cache state of every artifact without building anything.
pub fn execute(config_path: &Path, json: bool) -> CliResult {
    let project = ProjectConfig::load(config_path)?;
    let engine = BuildEngine::from_project(&project)?;
    let states = engine.artifact_states();

    if json {
        let map: serde_json::Map<String, serde_json::Value> = states
            .iter()
            .map(|(id, state)| (id.to_string(), serde_json::Value::from(label(*state))))
            .collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
        return Ok(());
    }

    let width = states
        .iter()
        .map(|(id, _)| id.as_str().len())
        .max()
        .unwrap_or(0);
    for (id, state) in &states {
        let color = match state {
            ArtifactState::Fresh => colors::GREEN,
            ArtifactState::Stale => colors::YELLOW,
            ArtifactState::Missing => colors::RED,
        };
        println!(
            "{:width$}  {}{}{}",
            id.as_str(),
            color,
            label(*state),
            colors::RESET
        );
    }

    let fresh = states
        .iter()
        .filter(|(_, s)| *s == ArtifactState::Fresh)
        .count();
    let stats = engine.cache().stats(engine.fingerprints());
    println!(
        "\n{}{} of {} artifacts fresh ({} cached entries, {} bytes){}",
        colors::DIM,
        fresh,
        states.len(),
        stats.entries,
        stats.bytes,
        colors::RESET
    );
    Ok(())
}

fn label(state: ArtifactState) -> &'static str {
    match state {
        ArtifactState::Fresh => "fresh",
        ArtifactState::Stale => "stale",
        ArtifactState::Missing => "missing",
    }
}
