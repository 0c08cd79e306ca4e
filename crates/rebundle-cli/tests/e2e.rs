//! End-to-end tests for rebundle CLI commands.
//!
//! These tests run the binary against a scratch project and check its
//! output and on-disk state.

#![allow(deprecated)] // Allow deprecated Command::cargo_bin for tests

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// A temporary project with a rebundle.toml and three inputs.
///
/// `x <- a.js`, `y <- b.js`, `z <- x + y`.
struct TestProject {
    temp_dir: TempDir,
}

impl TestProject {
    fn new() -> Self {
        Self::with_compiler("")
    }

    fn with_compiler(compiler: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let src = temp_dir.path().join("src");
        fs::create_dir_all(&src).expect("Failed to create src");
        fs::write(src.join("a.js"), "export const a = 1;\n").expect("Failed to write a.js");
        fs::write(src.join("b.js"), "export const b = 2;\n").expect("Failed to write b.js");

        let config = format!(
            r#"[build]
workers = 2

{compiler}

[[artifact]]
id = "x"
inputs = ["src/a.js"]

[[artifact]]
id = "y"
inputs = ["src/b.js"]

[[artifact]]
id = "z"
depends_on = ["x", "y"]
"#
        );
        fs::write(temp_dir.path().join("rebundle.toml"), config).expect("Failed to write config");

        Self { temp_dir }
    }

    fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    fn input(&self, name: &str) -> PathBuf {
        self.root().join("src").join(name)
    }

    fn state_dir(&self) -> PathBuf {
        self.root().join(".rebundle")
    }

    fn rebundle(&self, args: &[&str]) -> Command {
        let mut cmd = Command::cargo_bin("rebundle").expect("Failed to find rebundle binary");
        cmd.arg("--config").arg(self.root()).args(args);
        cmd
    }

    fn build_report(&self) -> serde_json::Value {
        let output = self
            .rebundle(&["build", "--json"])
            .output()
            .expect("Failed to execute command");
        serde_json::from_slice(&output.stdout).expect("Failed to parse report")
    }
}

fn ids(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .expect("expected an array")
        .iter()
        .map(|v| v.as_str().expect("expected a string").to_string())
        .collect()
}

// =============================================================================
// rebundle build Tests
// =============================================================================

#[test]
fn test_build_missing_config() {
    let temp = TempDir::new().unwrap();
    Command::cargo_bin("rebundle")
        .expect("Failed to find rebundle binary")
        .arg("--config")
        .arg(temp.path())
        .arg("build")
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration error"))
        .stderr(predicate::str::contains("hint:"));
}

#[test]
fn test_build_invalid_config() {
    let project = TestProject::new();
    fs::write(
        project.root().join("rebundle.toml"),
        "[[artifact]]\nid = \"x\"\ndepends_on = [\"nope\"]\n",
    )
    .unwrap();

    project
        .rebundle(&["build"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("undefined artifact nope"));
}

#[test]
fn test_build_all_artifacts() {
    let project = TestProject::new();

    project
        .rebundle(&["build"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Completed"))
        .stdout(predicate::str::contains("3 built"));

    assert!(project.state_dir().join("cache").join("entries").is_dir());
    assert!(project.state_dir().join("state").is_dir());
}

#[test]
fn test_second_build_is_cached() {
    let project = TestProject::new();
    project.rebundle(&["build"]).assert().success();

    let report = project.build_report();
    assert!(ids(&report["built"]).is_empty());
    assert_eq!(ids(&report["cached"]), vec!["x", "y", "z"]);
}

#[test]
fn test_changed_input_rebuilds_dependents_only() {
    let project = TestProject::new();
    project.rebundle(&["build"]).assert().success();

    fs::write(project.input("a.js"), "export const a = 10;\n").unwrap();

    let report = project.build_report();
    assert_eq!(ids(&report["built"]), vec!["x", "z"]);
    assert_eq!(ids(&report["cached"]), vec!["y"]);
    assert_eq!(report["corrupted"], 0);
}

#[test]
fn test_corrupt_entry_is_rebuilt() {
    let project = TestProject::new();
    project.rebundle(&["build"]).assert().success();

    let entries = project.state_dir().join("cache").join("entries");
    let entry = fs::read_dir(&entries)
        .unwrap()
        .next()
        .expect("no cache entries")
        .unwrap()
        .path();
    fs::write(&entry, b"garbage").unwrap();

    let report = project.build_report();
    assert_eq!(report["corrupted"], 1);
    assert!(!ids(&report["built"]).is_empty());
}

#[cfg(unix)]
#[test]
fn test_failed_compile_exits_nonzero() {
    let project = TestProject::with_compiler(
        "[compiler]\nkind = \"command\"\nprogram = \"sh\"\nargs = [\"-c\", \"echo broken >&2; exit 3\", \"sh\"]",
    );

    project
        .rebundle(&["build"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("blocked by"))
        .stderr(predicate::str::contains("2 failed, 1 blocked"));
}

// =============================================================================
// rebundle status Tests
// =============================================================================

#[test]
fn test_status_before_and_after_build() {
    let project = TestProject::new();

    project
        .rebundle(&["status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("missing"))
        .stdout(predicate::str::contains("0 of 3 artifacts fresh"));

    project.rebundle(&["build"]).assert().success();

    project
        .rebundle(&["status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 of 3 artifacts fresh"));
}

#[test]
fn test_status_json_reports_stale_after_change() {
    let project = TestProject::new();
    project.rebundle(&["build"]).assert().success();
    fs::write(project.input("b.js"), "export const b = 20;\n").unwrap();

    let output = project
        .rebundle(&["status", "--json"])
        .output()
        .expect("Failed to execute command");
    let states: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();

    assert_eq!(states["x"], "fresh");
    assert_eq!(states["y"], "stale");
    assert_eq!(states["z"], "stale");
}

// =============================================================================
// rebundle clean Tests
// =============================================================================

#[test]
fn test_clean_removes_state() {
    let project = TestProject::new();
    project.rebundle(&["build"]).assert().success();
    assert!(project.state_dir().exists());

    project
        .rebundle(&["clean"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed"));
    assert!(!project.state_dir().exists());

    project
        .rebundle(&["clean"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to clean"));
}

#[test]
fn test_build_after_clean_rebuilds_everything() {
    let project = TestProject::new();
    project.rebundle(&["build"]).assert().success();
    project.rebundle(&["clean"]).assert().success();

    let report = project.build_report();
    assert_eq!(ids(&report["built"]), vec!["x", "y", "z"]);
}
