//! CLI smoke tests.
//!
//! The conversion pipeline itself is covered by unit tests in `src/`, plus
//! end-to-end tests marked `#[ignore]` that need poppler-utils and tesseract
//! installed. These tests only check that the binary starts and advertises
//! its interface.

use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;

/// Create a new `Command` with our binary.
fn cmd() -> Command {
    Command::cargo_bin("textpress").unwrap()
}

#[test]
fn test_help() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("--staging-dir"))
        .stdout(contains("--artifact-ttl-secs"));
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}
