//! Integration tests for the `compound` binary.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

#[allow(deprecated)]
fn compound_cmd() -> Command {
    Command::cargo_bin("compound").expect("Failed to find compound binary")
}

/// A workspace with a config file pointing the worker at `program`.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new(program: &str) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let config = format!(
            "[worker]\nprogram = \"{program}\"\ntimeout_secs = 30\n\n\
             [review]\nperiod = 0\n\n\
             [breaker]\nthreshold = 2\n\n\
             [evidence]\nenabled = false\n"
        );
        fs::write(dir.path().join("settings.toml"), config).expect("write config");
        Self { dir }
    }

    fn state_path(&self) -> PathBuf {
        self.dir.path().join(".compound").join("tasks.json")
    }

    fn cmd(&self) -> Command {
        let mut cmd = compound_cmd();
        cmd.current_dir(self.dir.path())
            .env_remove("RUST_LOG")
            .arg("--config")
            .arg(self.dir.path().join("settings.toml"))
            .arg("--state")
            .arg(self.state_path());
        cmd
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }
}

#[test]
fn test_help_lists_subcommands() {
    compound_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("init"))
        .stdout(predicate::str::contains("reset-breaker"));
}

#[test]
fn test_init_writes_state_and_refuses_overwrite() {
    let ws = Workspace::new("true");

    ws.cmd()
        .args(["init", "--chapters", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("with 3 chapter(s)"));
    assert!(ws.state_path().exists());

    ws.cmd()
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    ws.cmd().args(["init", "--force"]).assert().success();
}

#[test]
fn test_step_without_state_points_at_init() {
    let ws = Workspace::new("true");

    ws.cmd()
        .arg("step")
        .assert()
        .failure()
        .stderr(predicate::str::contains("compound init"));
}

#[test]
fn test_step_completes_draft() {
    let ws = Workspace::new("true");
    ws.cmd().arg("init").assert().success();

    ws.cmd()
        .arg("step")
        .assert()
        .success()
        .stdout(predicate::str::contains("iteration 1: ch01-draft complete"));

    ws.cmd()
        .arg("dump")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"ch01-code_written\""))
        .stdout(predicate::str::contains("\"complete\""));
}

#[test]
fn test_run_until_idle_finishes_chapter() {
    let ws = Workspace::new("true");
    ws.cmd().arg("init").assert().success();

    ws.cmd()
        .args(["run", "-n", "20", "--until-idle"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ch01-final complete"))
        .stdout(predicate::str::contains("iteration 7: idle (no eligible work)"));
}

#[test]
fn test_failing_worker_opens_breaker() {
    let ws = Workspace::new("false");
    ws.cmd().args(["init", "--chapters", "3"]).assert().success();

    ws.cmd()
        .args(["run", "-n", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("failed: exit 1"))
        .stdout(predicate::str::contains("[circuit breaker opened]"))
        .stdout(predicate::str::contains("idle (blocked by circuit breaker)"));

    ws.cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Circuit Breaker: Open"));

    ws.cmd()
        .arg("reset-breaker")
        .assert()
        .success()
        .stdout(predicate::str::contains("circuit breaker reset"));

    ws.cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Circuit Breaker: Stable"));
}

#[test]
fn test_single_failure_shows_degraded_breaker() {
    let ws = Workspace::new("false");
    ws.cmd().arg("init").assert().success();
    ws.cmd().arg("step").assert().success();

    ws.cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Circuit Breaker: Degraded (1/2)"));
}

#[test]
fn test_status_json_is_machine_readable() {
    let ws = Workspace::new("true");
    ws.cmd().args(["init", "--chapters", "2"]).assert().success();
    ws.cmd().arg("step").assert().success();

    let output = ws.cmd().args(["status", "--json"]).output().expect("status");
    assert!(output.status.success());
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).expect("status json");
    assert_eq!(summary["iteration_count"], 1);
    assert_eq!(summary["breaker"]["state"], "stable");
    assert!(summary["iterations_until_sweep"].is_null());
}

#[test]
fn test_add_requeue_and_remove() {
    let ws = Workspace::new("false");
    ws.cmd().arg("init").assert().success();

    ws.cmd()
        .args([
            "add",
            "--id",
            "glossary",
            "--title",
            "Write glossary",
            "--depends-on",
            "ch01-draft",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("added glossary"));

    ws.cmd()
        .args(["add", "--id", "glossary"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("glossary"));

    ws.cmd().arg("step").assert().success();
    ws.cmd()
        .args(["requeue", "ch01-draft"])
        .assert()
        .success()
        .stdout(predicate::str::contains("requeued ch01-draft"));

    ws.cmd()
        .args(["remove", "glossary"])
        .assert()
        .success()
        .stdout(predicate::str::contains("removed glossary"));

    let state = fs::read_to_string(ws.state_path()).expect("state");
    assert!(!state.contains("\"glossary\""));
    assert!(ws.path().join(".compound").is_dir());
}

#[test]
fn test_add_with_severity_creates_remediation() {
    let ws = Workspace::new("true");
    ws.cmd().arg("init").assert().success();

    ws.cmd()
        .args(["add", "--id", "fix-typo", "--severity", "high"])
        .assert()
        .success();

    ws.cmd()
        .arg("step")
        .assert()
        .success()
        .stdout(predicate::str::contains("fix-typo complete"));
}

#[test]
fn test_config_prints_effective_settings() {
    let ws = Workspace::new("true");

    ws.cmd()
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("[breaker]"))
        .stdout(predicate::str::contains("threshold = 2"))
        .stdout(predicate::str::contains("program = \"true\""));
}

#[test]
fn test_env_overrides_config_file() {
    let ws = Workspace::new("true");

    ws.cmd()
        .env("COMPOUND__BREAKER__THRESHOLD", "9")
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("threshold = 9"));
}
