#![allow(clippy::unwrap_used)]
// CLI surface tests: argument parsing and help output only -- nothing
// here touches the network or spawns collectors.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_subcommands() {
    Command::cargo_bin("netradar")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("snapshot"))
        .stdout(predicate::str::contains("interfaces"))
        .stdout(predicate::str::contains("completions"));
}

#[test]
fn version_flag_works() {
    Command::cargo_bin("netradar")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("netradar"));
}

#[test]
fn completions_generate_for_bash() {
    Command::cargo_bin("netradar")
        .unwrap()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("netradar"));
}

#[test]
fn unknown_subcommand_fails() {
    Command::cargo_bin("netradar")
        .unwrap()
        .arg("definitely-not-a-command")
        .assert()
        .failure();
}
