use assert_cmd::Command as AssertCommand;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

const VALID_CONFIG: &str = "\
profiles:
  source: src-profile
  target: dst-profile
aws_region: us-east-1
datasync_role_name: DataSyncS3MigrationRole
iam_policy_name: DataSyncS3MigrationPolicy
migrations:
  - source_bucket: legacy-data
    destination_bucket: new-data
    options:
      TransferMode: ALL
      TaskMode: ENHANCED
";

fn config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("failed to create temp config");
    file.write_all(content.as_bytes())
        .expect("failed to write temp config");
    file
}

#[test]
fn help_lists_subcommands() {
    let out = Command::new(env!("CARGO_BIN_EXE_datasync-migration"))
        .arg("--help")
        .output()
        .expect("failed to run --help");
    let s = String::from_utf8_lossy(&out.stdout);
    assert!(s.contains("setup"), "help was: {}", s);
    assert!(s.contains("validate"), "help was: {}", s);
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn setup_help_mentions_dry_run() {
    AssertCommand::cargo_bin("datasync-migration")
        .expect("binary should be built")
        .args(["setup", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dry-run"));
}

#[test]
fn test_validate_accepts_valid_config() {
    let file = config_file(VALID_CONFIG);
    let output = Command::new(env!("CARGO_BIN_EXE_datasync-migration"))
        .args(["validate", "--config"])
        .arg(file.path())
        .output()
        .expect("failed to run validate");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(
        stdout.contains("s3://legacy-data -> s3://new-data"),
        "stdout was: {}",
        stdout
    );
}

#[test]
fn test_validate_missing_file_fails() {
    let output = Command::new(env!("CARGO_BIN_EXE_datasync-migration"))
        .args(["validate", "--config", "/definitely/not/here.yaml"])
        .output()
        .expect("failed to run validate");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.code(), Some(1));
    assert!(
        stderr.contains("Invalid configuration file"),
        "stderr was: {}",
        stderr
    );
}

#[test]
fn test_validate_rejects_unknown_option_key() {
    let file = config_file(&VALID_CONFIG.replace("TransferMode: ALL", "TransferMod: ALL"));
    let output = Command::new(env!("CARGO_BIN_EXE_datasync-migration"))
        .args(["validate", "--config"])
        .arg(file.path())
        .output()
        .expect("failed to run validate");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr.contains("TransferMod"), "stderr was: {}", stderr);
}

#[test]
fn test_validate_reports_every_problem() {
    let broken = VALID_CONFIG
        .replace("new-data", "legacy-data")
        .replace("aws_region: us-east-1", "aws_region: \"\"");
    let file = config_file(&broken);
    let output = Command::new(env!("CARGO_BIN_EXE_datasync-migration"))
        .args(["validate", "--config"])
        .arg(file.path())
        .output()
        .expect("failed to run validate");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr.contains("aws_region must not be empty"), "stderr was: {}", stderr);
    assert!(
        stderr.contains("as both source and destination"),
        "stderr was: {}",
        stderr
    );
}

#[test]
fn test_setup_requires_config() {
    let output = Command::new(env!("CARGO_BIN_EXE_datasync-migration"))
        .arg("setup")
        .output()
        .expect("failed to run setup");
    // clap usage error
    assert_eq!(output.status.code(), Some(2));
}
