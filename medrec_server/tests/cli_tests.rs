//! Integration tests for the medrec binary.
//!
//! These tests verify:
//! - Help output
//! - Fail-fast startup without a signing secret
//! - Maintenance commands against a scratch database

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

/// Helper to create a scratch directory for config and database
fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Binary with a clean environment pointing at `dir`
fn cli(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("medrec"));
    cmd.env_remove("SECRET_KEY")
        .env_remove("MEDREC_BIND")
        .env("DATABASE_URL", format!("sqlite://{}", dir.join("cli.db").display()))
        .arg("--config")
        .arg(dir.join("absent.toml"));
    cmd
}

#[test]
fn test_cli_help() {
    let dir = setup_test_dir();
    cli(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Healthcare records API server"))
        .stdout(predicate::str::contains("backfill-ids"));
}

#[test]
fn test_serve_without_secret_fails_fast() {
    let dir = setup_test_dir();
    cli(dir.path())
        .arg("serve")
        .assert()
        .failure()
        .stderr(predicate::str::contains("SECRET_KEY"));

    // Nothing was opened
    assert!(!dir.path().join("cli.db").exists());
}

#[test]
fn test_default_command_is_serve() {
    let dir = setup_test_dir();
    cli(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("SECRET_KEY"));
}

#[test]
fn test_inspect_empty_database() {
    let dir = setup_test_dir();
    cli(dir.path())
        .arg("inspect")
        .assert()
        .success()
        .stdout(predicate::str::contains("users: 0"))
        .stdout(predicate::str::contains("patients: 0"))
        .stdout(predicate::str::contains("Users (0):"));
}

#[test]
fn test_backfill_ids_on_empty_database() {
    let dir = setup_test_dir();
    cli(dir.path())
        .arg("backfill-ids")
        .assert()
        .success()
        .stdout(predicate::str::contains("Fixed 0 patients"))
        .stdout(predicate::str::contains("Patient ID index is in place"));
}

#[test]
fn test_config_file_database_url() {
    let dir = setup_test_dir();
    let config_path = dir.path().join("medrec.toml");
    let db_path = dir.path().join("from-file.db");
    std::fs::write(
        &config_path,
        format!("[database]\nurl = \"sqlite://{}\"\n", db_path.display()),
    )
    .unwrap();

    Command::new(assert_cmd::cargo::cargo_bin!("medrec"))
        .env_remove("DATABASE_URL")
        .env_remove("SECRET_KEY")
        .arg("--config")
        .arg(&config_path)
        .arg("inspect")
        .assert()
        .success();

    assert!(db_path.exists());
}
