//! Clean command implementation for rebundle CLI.

use std::path::Path;

use rebundle_core::{ProjectConfig, ProjectDirs};

use crate::build::CliResult;
use crate::colors;

/// Remove the persisted cache and fingerprint store.
pub fn execute(config_path: &Path) -> CliResult {
    let project = ProjectConfig::load(config_path)?;
    let dirs = ProjectDirs::from_config(&project);

    if dirs.clean()? {
        println!(
            "{}Removed{} {}",
            colors::GREEN,
            colors::RESET,
            dirs.base_dir.display()
        );
    } else {
        println!("{}Nothing to clean{}", colors::DIM, colors::RESET);
    }
    Ok(())
}
