//! Project configuration (`rebundle.toml`).
//!
//! ```toml
//! [build]
//! workers = 4
//! task_timeout_ms = 30000
//! fingerprint = "content"
//!
//! [watch]
//! mode = "event"
//! debounce_ms = 200
//!
//! [compiler]
//! kind = "concat"
//! banner = true
//!
//! [[artifact]]
//! id = "vendor"
//! inputs = ["src/lib/a.js", "src/lib/b.js"]
//!
//! [[artifact]]
//! id = "main"
//! inputs = ["src/main.js"]
//! depends_on = ["vendor"]
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::execute::{CommandCompiler, Compiler, ConcatCompiler};
use crate::fingerprint::FingerprintMode;
use crate::graph::ArtifactId;

/// Name of the configuration file looked up in the project root.
pub const CONFIG_FILE: &str = "rebundle.toml";

/// `[build]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Parallel compile workers; 0 means one per available CPU.
    pub workers: usize,

    /// Cache directory; defaults to `.rebundle` next to the config file.
    pub cache_dir: Option<PathBuf>,

    /// Per-task timeout; unset means no limit.
    pub task_timeout_ms: Option<u64>,

    /// How inputs are fingerprinted.
    pub fingerprint: FingerprintMode,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            cache_dir: None,
            task_timeout_ms: None,
            fingerprint: FingerprintMode::Content,
        }
    }
}

impl BuildConfig {
    /// Effective worker count.
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(Duration::from_millis)
    }
}

/// How the watcher detects changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// OS file notifications.
    #[default]
    Event,
    /// Periodic scans, for filesystems without notifications.
    Poll,
}

/// `[watch]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    pub mode: WatchMode,

    /// Quiet period before a burst of events is delivered.
    pub debounce_ms: u64,

    /// Scan interval in poll mode.
    pub poll_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            mode: WatchMode::Event,
            debounce_ms: 200,
            poll_interval_ms: 1000,
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// `[compiler]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CompilerConfig {
    Concat {
        #[serde(default)]
        banner: bool,
    },
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig::Concat { banner: false }
    }
}

impl CompilerConfig {
    /// Instantiate the configured compiler. Commands run from `root`.
    pub fn build(&self, root: &Path) -> Arc<dyn Compiler> {
        match self {
            CompilerConfig::Concat { banner } => Arc::new(ConcatCompiler::new(*banner)),
            CompilerConfig::Command { program, args } => {
                Arc::new(CommandCompiler::new(program.clone(), args.clone()).working_dir(root))
            }
        }
    }
}

/// One `[[artifact]]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactSpec {
    pub id: ArtifactId,

    #[serde(default)]
    pub inputs: Vec<PathBuf>,

    #[serde(default)]
    pub depends_on: Vec<ArtifactId>,
}

impl ArtifactSpec {
    pub fn new(id: impl Into<ArtifactId>) -> Self {
        Self {
            id: id.into(),
            inputs: Vec::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.inputs.push(path.into());
        self
    }

    pub fn depends_on(mut self, id: impl Into<ArtifactId>) -> Self {
        self.depends_on.push(id.into());
        self
    }
}

/// Parsed `rebundle.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    /// Directory relative paths resolve against.
    #[serde(skip)]
    pub root: PathBuf,

    pub build: BuildConfig,

    pub watch: WatchConfig,

    pub compiler: CompilerConfig,

    #[serde(rename = "artifact")]
    pub artifacts: Vec<ArtifactSpec>,
}

impl ProjectConfig {
    /// Load `rebundle.toml` from `path`, which may be the file or its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let file = if path.is_dir() {
            path.join(CONFIG_FILE)
        } else {
            path.to_path_buf()
        };
        let content = std::fs::read_to_string(&file)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", file.display())))?;

        let root = file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());

        let config = Self::from_toml_str(&content, &root)?;
        tracing::debug!(
            "Loaded {} with {} artifacts",
            file.display(),
            config.artifacts.len()
        );
        Ok(config)
    }

    /// Parse and validate configuration text, resolving paths against `root`.
    pub fn from_toml_str(content: &str, root: &Path) -> Result<Self> {
        let mut config: ProjectConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.root = root.to_path_buf();
        config.resolve_paths();
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self) {
        let root = self.root.clone();
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = root.join(&*p);
            }
        };
        if let Some(dir) = self.build.cache_dir.as_mut() {
            resolve(dir);
        }
        for spec in &mut self.artifacts {
            spec.inputs.iter_mut().for_each(resolve);
        }
    }

    fn validate(&self) -> Result<()> {
        let mut ids = BTreeSet::new();
        for spec in &self.artifacts {
            if spec.id.as_str().is_empty() {
                return Err(Error::Config("artifact id must not be empty".to_string()));
            }
            if !ids.insert(&spec.id) {
                return Err(Error::Config(format!("duplicate artifact id: {}", spec.id)));
            }
        }
        for spec in &self.artifacts {
            if let Some(dep) = spec.depends_on.iter().find(|d| !ids.contains(d)) {
                return Err(Error::Config(format!(
                    "artifact {} depends on undefined artifact {}",
                    spec.id, dep
                )));
            }
        }
        if let CompilerConfig::Command { program, .. } = &self.compiler
            && program.is_empty()
        {
            return Err(Error::Config("compiler.program must not be empty".to_string()));
        }
        Ok(())
    }

    /// Every declared input path, sorted and deduplicated.
    pub fn input_paths(&self) -> Vec<PathBuf> {
        self.artifacts
            .iter()
            .flat_map(|spec| spec.inputs.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
[[artifact]]
id = "main"
inputs = ["src/main.js"]
"#;
        let config = ProjectConfig::from_toml_str(toml, Path::new("/project")).unwrap();
        assert_eq!(config.build, BuildConfig::default());
        assert_eq!(config.watch.mode, WatchMode::Event);
        assert_eq!(config.compiler, CompilerConfig::Concat { banner: false });
        assert_eq!(config.artifacts.len(), 1);
        assert_eq!(
            config.artifacts[0].inputs,
            vec![PathBuf::from("/project/src/main.js")]
        );
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[build]
workers = 3
cache_dir = "out/cache"
task_timeout_ms = 1500
fingerprint = "stamp"

[watch]
mode = "poll"
debounce_ms = 50
poll_interval_ms = 250

[compiler]
kind = "command"
program = "esbuild"
args = ["--bundle"]

[[artifact]]
id = "vendor"
inputs = ["lib/a.js", "/abs/b.js"]

[[artifact]]
id = "main"
inputs = ["main.js"]
depends_on = ["vendor"]
"#;
        let config = ProjectConfig::from_toml_str(toml, Path::new("/project")).unwrap();
        assert_eq!(config.build.worker_count(), 3);
        assert_eq!(config.build.cache_dir, Some(PathBuf::from("/project/out/cache")));
        assert_eq!(config.build.task_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.build.fingerprint, FingerprintMode::Stamp);
        assert_eq!(config.watch.mode, WatchMode::Poll);
        assert_eq!(config.watch.poll_interval(), Duration::from_millis(250));
        assert_eq!(
            config.compiler,
            CompilerConfig::Command {
                program: "esbuild".into(),
                args: vec!["--bundle".into()],
            }
        );
        assert_eq!(
            config.input_paths(),
            vec![
                PathBuf::from("/abs/b.js"),
                PathBuf::from("/project/lib/a.js"),
                PathBuf::from("/project/main.js"),
            ]
        );
        assert_eq!(config.artifacts[1].depends_on, vec![ArtifactId::from("vendor")]);
    }

    #[test]
    fn test_undefined_dependency_is_rejected() {
        let toml = r#"
[[artifact]]
id = "main"
depends_on = ["ghost"]
"#;
        let err = ProjectConfig::from_toml_str(toml, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let toml = r#"
[[artifact]]
id = "main"

[[artifact]]
id = "main"
"#;
        assert!(matches!(
            ProjectConfig::from_toml_str(toml, Path::new(".")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let toml = r#"
[build]
wrokers = 2
"#;
        assert!(ProjectConfig::from_toml_str(toml, Path::new(".")).is_err());
    }

    #[test]
    fn test_load_from_directory() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(CONFIG_FILE),
            "[[artifact]]\nid = \"a\"\ninputs = [\"a.js\"]\n",
        )
        .unwrap();

        let config = ProjectConfig::load(temp.path()).unwrap();
        let root = temp.path().canonicalize().unwrap();
        assert_eq!(config.root, root);
        assert_eq!(config.artifacts[0].inputs, vec![root.join("a.js")]);
    }
}
