//! Project directory management.
//!
//! Provides a consistent directory layout for rebundle state, so the CLI
//! and the watcher read and write the same files.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ProjectConfig;
use crate::error::Result;

/// Default name of the state directory next to `rebundle.toml`.
pub const DEFAULT_DIR: &str = ".rebundle";

/// Directory structure for a rebundle project.
///
/// ```text
/// rebundle.toml
/// .rebundle/
/// ├── cache/      # Persisted artifact entries
/// │   └── entries/
/// └── state/      # Fingerprint store
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDirs {
    /// The `.rebundle` directory itself (or `build.cache_dir`).
    pub base_dir: PathBuf,

    /// Artifact cache directory.
    pub cache_dir: PathBuf,

    /// Fingerprint store directory.
    pub state_dir: PathBuf,
}

impl ProjectDirs {
    /// Layout rooted at `base_dir`. Nothing is created on disk.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            cache_dir: base_dir.join("cache"),
            state_dir: base_dir.join("state"),
            base_dir,
        }
    }

    /// Layout for `config`: `build.cache_dir` if set, else `.rebundle` in
    /// the project root.
    pub fn from_config(config: &ProjectConfig) -> Self {
        match &config.build.cache_dir {
            Some(dir) => Self::new(dir),
            None => Self::from_project_root(&config.root),
        }
    }

    /// Default layout under `root`.
    pub fn from_project_root(root: &Path) -> Self {
        Self::new(root.join(DEFAULT_DIR))
    }

    /// Create all directories if they don't exist.
    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.cache_dir)?;
        fs::create_dir_all(&self.state_dir)?;
        Ok(())
    }

    /// Whether any state has been written.
    pub fn exists(&self) -> bool {
        self.cache_dir.exists() || self.state_dir.exists()
    }

    /// Remove the cache and state directories.
    ///
    /// Only rebundle's own subdirectories are deleted, so a `build.cache_dir`
    /// shared with other files (or the project root itself) keeps its other
    /// contents. `base_dir` is removed only if that leaves it empty. Returns
    /// `false` if there was nothing to remove.
    pub fn clean(&self) -> Result<bool> {
        let mut removed = false;
        for dir in [&self.cache_dir, &self.state_dir] {
            if dir.exists() {
                fs::remove_dir_all(dir)?;
                removed = true;
            }
        }
        if removed {
            // Fails harmlessly when other files remain.
            let _ = fs::remove_dir(&self.base_dir);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_project_root() {
        let temp = TempDir::new().unwrap();
        let dirs = ProjectDirs::from_project_root(temp.path());

        assert!(dirs.base_dir.ends_with(DEFAULT_DIR));
        assert!(!dirs.exists());

        dirs.create().unwrap();
        assert!(dirs.cache_dir.exists());
        assert!(dirs.state_dir.exists());
    }

    #[test]
    fn test_cache_dir_override() {
        let mut config = ProjectConfig::default();
        config.root = PathBuf::from("/project");
        config.build.cache_dir = Some(PathBuf::from("/tmp/rebundle-cache"));

        let dirs = ProjectDirs::from_config(&config);
        assert_eq!(dirs.cache_dir, PathBuf::from("/tmp/rebundle-cache/cache"));
    }

    #[test]
    fn test_clean() {
        let temp = TempDir::new().unwrap();
        let dirs = ProjectDirs::from_project_root(temp.path());
        dirs.create().unwrap();
        fs::write(dirs.cache_dir.join("entry.bin"), "x").unwrap();

        assert!(dirs.clean().unwrap());
        assert!(!dirs.exists());
        assert!(!dirs.clean().unwrap());
    }

    #[test]
    fn test_clean_keeps_unrelated_files() {
        let temp = TempDir::new().unwrap();
        let shared = temp.path().join("out");
        fs::create_dir_all(&shared).unwrap();
        fs::write(shared.join("bundle.js"), "keep").unwrap();

        let dirs = ProjectDirs::new(&shared);
        dirs.create().unwrap();
        assert!(dirs.clean().unwrap());

        assert!(!dirs.cache_dir.exists());
        assert!(!dirs.state_dir.exists());
        assert_eq!(fs::read_to_string(shared.join("bundle.js")).unwrap(), "keep");
    }

    #[test]
    fn test_clean_with_project_root_as_cache_dir() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("rebundle.toml"), "[build]\n").unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();

        let mut config = ProjectConfig::default();
        config.root = temp.path().to_path_buf();
        config.build.cache_dir = Some(temp.path().to_path_buf());
        let dirs = ProjectDirs::from_config(&config);
        dirs.create().unwrap();

        assert!(dirs.clean().unwrap());
        assert!(temp.path().join("rebundle.toml").exists());
        assert!(temp.path().join("src").is_dir());
        assert!(!dirs.exists());
        assert!(!dirs.clean().unwrap());
    }
}
