#![allow(deprecated)] // cargo_bin is deprecated but still functional

use assert_cmd::Command;
use predicates::str::contains;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Write a config with a catalog and two filesystem repositories under `temp`.
fn write_config(temp: &TempDir) -> PathBuf {
    let root = temp.path().display();
    let config = format!(
        r#"
[catalog]
type = "sqlite"
path = "{root}/catalog.db"

[[repositories]]
name = "flatiron"
kind = "local-mirror"

[repositories.storage]
type = "filesystem"
path = "{root}/flatiron"

[[repositories]]
name = "aws"
kind = "cloud-bucket"

[repositories.storage]
type = "filesystem"
path = "{root}/aws"
"#
    );
    let path = temp.path().join("alyxsync.toml");
    fs::write(&path, config).unwrap();
    path
}

fn alyxsync(config: &PathBuf) -> Command {
    let mut cmd = Command::cargo_bin("alyxsync").unwrap();
    cmd.env_remove("ALYXSYNC_CONFIG")
        .env_remove("ALYXSYNC_HOSTNAME")
        .env("RUST_LOG", "warn")
        .arg("--config")
        .arg(config);
    cmd
}

#[test]
fn help_lists_subcommands() {
    Command::cargo_bin("alyxsync")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("sync"))
        .stdout(contains("audit"))
        .stdout(contains("watermarks"));
}

#[test]
fn missing_config_file_fails() {
    let temp = TempDir::new().unwrap();
    alyxsync(&temp.path().join("absent.toml"))
        .arg("plan")
        .assert()
        .failure()
        .stderr(contains("configuration file not found"));
}

#[test]
fn plan_on_empty_catalog_has_nothing_to_do() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp);
    alyxsync(&config)
        .args(["plan", "--hours", "24"])
        .assert()
        .success()
        .stdout(contains("Nothing to do"));
}

#[test]
fn dry_run_sync_reports_json_and_records_no_watermark() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp);
    alyxsync(&config)
        .args(["--json", "sync", "--destination", "aws", "--dryrun"])
        .assert()
        .success()
        .stdout(contains("\"dry_run\": true"))
        .stdout(contains("\"channel\": \"sync:aws\""));

    alyxsync(&config)
        .args(["watermarks", "sync:aws"])
        .assert()
        .success()
        .stdout(contains("No watermarks recorded"));
}

#[test]
fn sync_appends_a_watermark() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp);
    alyxsync(&config)
        .args(["sync", "--destination-kind", "cloud-bucket"])
        .assert()
        .success()
        .stdout(contains("sessions succeeded: 0, failed: 0"));

    alyxsync(&config)
        .args(["--json", "watermarks", "sync:cloud-bucket"])
        .assert()
        .success()
        .stdout(contains("\"started_at\""));
}

#[test]
fn unknown_destination_fails() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp);
    alyxsync(&config)
        .args(["sync", "--destination", "nowhere"])
        .assert()
        .failure()
        .stderr(contains("unknown repository: nowhere"));
}

#[test]
fn audit_of_empty_catalog_is_clean() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp);
    alyxsync(&config)
        .args(["audit", "--scan-files", "flatiron"])
        .assert()
        .success()
        .stdout(contains("No findings."));
}
