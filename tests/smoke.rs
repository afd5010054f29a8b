//! Smoke tests -- verify the binary runs and the one-shot commands work.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

fn write_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("healops.toml");
    let content = format!(
        r#"
[executor]
action_latency_ms = 0
health_check_latency_ms = 0

[verifier]
latency_ms = 0

[memory]
db_path = "{}"

[logging]
level = "warn"
audit_log_path = "{}"
"#,
        dir.join("healops.db").display(),
        dir.join("audit.jsonl").display(),
    );
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_cli_help() {
    Command::cargo_bin("healops")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("Self-healing incident orchestration"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("healops")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("healops"));
}

#[test]
fn test_subcommands_exist() {
    for sub in ["serve", "run", "tail-log", "config"] {
        Command::cargo_bin("healops")
            .unwrap()
            .args([sub, "--help"])
            .assert()
            .success();
    }
}

#[test]
fn test_config_prints_effective_toml() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(dir.path());

    Command::cargo_bin("healops")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .arg("config")
        .assert()
        .success()
        .stdout(predicates::str::contains("[orchestrator]"))
        .stdout(predicates::str::contains("max_attempts = 2"))
        .stdout(predicates::str::contains("action_latency_ms = 0"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[orchestrator]\nmax_attempts = 0\n").unwrap();

    Command::cargo_bin("healops")
        .unwrap()
        .arg("--config")
        .arg(&path)
        .arg("config")
        .assert()
        .failure()
        .stderr(predicates::str::contains("max_attempts"));
}

#[test]
fn test_run_service_down_resolves_and_is_audited() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(dir.path());

    Command::cargo_bin("healops")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["run", "--type", "service.down", "--payload", r#"{"service":"payments-api"}"#])
        .assert()
        .success()
        .stdout(predicates::str::contains(r#""status": "resolved""#))
        .stdout(predicates::str::contains("restart_service"))
        .stdout(predicates::str::contains("Resolution verified."));

    Command::cargo_bin("healops")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["tail-log", "-n", "10"])
        .assert()
        .success()
        .stdout(predicates::str::contains(r#""stage":"incident_opened""#))
        .stdout(predicates::str::contains(r#""stage":"resolved""#));
}

#[test]
fn test_run_rejects_unknown_event_type() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(dir.path());

    Command::cargo_bin("healops")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["run", "--type", "meteor.strike"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("unknown event type"));
}

#[test]
fn test_tail_log_without_log_file_is_empty() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(dir.path());

    Command::cargo_bin("healops")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .arg("tail-log")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}
