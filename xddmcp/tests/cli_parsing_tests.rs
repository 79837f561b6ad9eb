//! CLI argument parsing smoke tests.
//!
//! These exercise clap's parsing and exit-code handling without spawning
//! the `xdd` mover, mirroring the always-available "does the CLI even
//! come up" coverage kept alongside the heavier chaos/remote suites.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_runs() {
    Command::cargo_bin("xddmcp").unwrap().arg("--help").assert().success();
}

#[test]
fn version_runs() {
    Command::cargo_bin("xddmcp").unwrap().arg("--version").assert().success();
}

#[test]
fn protocol_version_prints_json_and_exits_zero() {
    Command::cargo_bin("xddmcp")
        .unwrap()
        .arg("--protocol-version")
        .assert()
        .success()
        .stdout(predicate::str::contains("{"));
}

#[test]
fn missing_positional_args_exit_nonzero() {
    Command::cargo_bin("xddmcp").unwrap().assert().failure();
}

#[test]
fn malformed_spec_is_rejected_before_any_transfer_starts() {
    Command::cargo_bin("xddmcp")
        .unwrap()
        .args(["source:extra:path", "/tmp/dest"])
        .assert()
        .failure();
}

#[test]
fn direct_io_side_flag_rejects_unknown_letter() {
    Command::cargo_bin("xddmcp")
        .unwrap()
        .args(["-d", "x", "/tmp/a", "/tmp/b"])
        .assert()
        .failure();
}
