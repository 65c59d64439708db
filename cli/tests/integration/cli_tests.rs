//! Integration tests for argument parsing and configuration validation.

#![allow(clippy::expect_used)]

use assert_cmd::Command;
use predicates::prelude::*;

fn shipyard(home: &tempfile::TempDir) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("shipyard"));
    cmd.env("NO_COLOR", "1")
        .env("HOME", home.path())
        .env("SHIPYARD_CONFIG", home.path().join("config.yaml"));
    cmd
}

fn home() -> tempfile::TempDir {
    tempfile::tempdir().expect("tempdir")
}

// --- Help and version tests ---

#[test]
fn test_cli_no_args_shows_help() {
    let home = home();
    shipyard(&home).assert().code(2).stderr(predicate::str::contains(
        "Provision container hosts",
    ));
}

#[test]
fn test_cli_help_lists_commands() {
    let home = home();
    shipyard(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("provision"))
        .stdout(predicate::str::contains("bootstrap"))
        .stdout(predicate::str::contains("destroy"));
}

#[test]
fn test_version_command_shows_version() {
    let home = home();
    shipyard(&home)
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("shipyard 0.1.0"));
}

#[test]
fn test_version_command_json_outputs_valid_json() {
    let home = home();
    let output = shipyard(&home)
        .args(["version", "--json"])
        .output()
        .expect("run shipyard");
    assert!(output.status.success());
    let value: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("version --json is JSON");
    assert_eq!(value["version"], "0.1.0");
}

// --- Argument validation ---

#[test]
fn test_provision_rejects_zero_count() {
    let home = home();
    shipyard(&home)
        .args(["provision", "--count", "0"])
        .assert()
        .code(2);
}

#[test]
fn test_bootstrap_requires_machine_name() {
    let home = home();
    shipyard(&home).arg("bootstrap").assert().code(2);
}

#[test]
fn test_unknown_log_level_rejected() {
    let home = home();
    shipyard(&home)
        .args(["--log-level", "loud", "version"])
        .assert()
        .code(2);
}

// --- Configuration validation (fails before the backend is opened) ---

#[test]
fn test_invalid_installation_name_fails() {
    let home = home();
    shipyard(&home)
        .args(["--name", "Bad_Name", "provision"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid installation name 'Bad_Name'"));
}

#[test]
fn test_invalid_name_from_config_file_fails() {
    let home = home();
    std::fs::write(home.path().join("config.yaml"), "name: -leading-dash\n")
        .expect("write config");
    shipyard(&home)
        .args(["bootstrap", "shipyard-1"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid installation name"));
}

#[test]
fn test_empty_driver_fails() {
    let home = home();
    shipyard(&home)
        .args(["--driver", "", "destroy", "--yes"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Driver name must not be empty"));
}

#[test]
fn test_malformed_driver_option_fails() {
    let home = home();
    shipyard(&home)
        .args(["provision", "-o", "cpus"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "Invalid driver option 'cpus': expected KEY=VALUE",
        ));
}

#[test]
fn test_unparseable_config_file_fails() {
    let home = home();
    std::fs::write(home.path().join("config.yaml"), "name: [unclosed\n").expect("write config");
    shipyard(&home)
        .arg("provision")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("cannot parse"));
}

#[test]
fn test_explicit_config_flag_wins_over_env() {
    let home = home();
    let explicit = home.path().join("explicit.yaml");
    std::fs::write(&explicit, "name: Not_Valid\n").expect("write config");
    shipyard(&home)
        .arg("--config")
        .arg(&explicit)
        .arg("provision")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Not_Valid"));
}
