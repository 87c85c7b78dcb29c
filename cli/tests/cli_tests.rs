//! Smoke tests over the geodist binary.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help_lists_roles() {
    Command::cargo_bin("geodist")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("coordinator"))
        .stdout(predicate::str::contains("worker"))
        .stdout(predicate::str::contains("evaluator"));
}

#[test]
fn test_no_arguments_shows_help() {
    Command::cargo_bin("geodist")
        .unwrap()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_missing_config_fails_cleanly() {
    Command::cargo_bin("geodist")
        .unwrap()
        .args(["coordinator", "--config", "/nonexistent/sim.conf"])
        .env("GEODIST_SECRET", "test")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn test_completions_generate() {
    Command::cargo_bin("geodist")
        .unwrap()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("geodist"));
}
