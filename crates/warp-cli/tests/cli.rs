use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_subcommands() {
    Command::cargo_bin("warp")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("open").and(predicate::str::contains("connect")));
}

#[test]
fn connect_requires_a_warp_id() {
    Command::cargo_bin("warp")
        .unwrap()
        .arg("connect")
        .assert()
        .failure()
        .stderr(predicate::str::contains("ID"));
}

#[test]
fn unknown_subcommand_is_rejected() {
    Command::cargo_bin("warp")
        .unwrap()
        .arg("teleport")
        .assert()
        .failure();
}
