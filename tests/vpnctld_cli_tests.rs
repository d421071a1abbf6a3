//! Integration tests for vpnctld
//!
//! These tests verify the command-line surface that does not need a
//! long-running daemon

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a test vpnctld command
fn vpnctld() -> Command {
    Command::cargo_bin("vpnctld").unwrap()
}

#[test]
fn test_help_command() {
    vpnctld()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("VPN Controller Daemon"))
        .stdout(predicate::str::contains("--check-config"));
}

#[test]
fn test_version_command() {
    vpnctld()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_check_config_defaults() {
    vpnctld()
        .arg("--check-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("activation_grace_ms = 1000"))
        .stdout(predicate::str::contains("deactivation_grace_ms = 1500"))
        .stdout(predicate::str::contains("loopback-1"));
}

#[test]
fn test_check_config_from_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("vpnctl.toml");
    fs::write(
        &config_path,
        r#"
[settings]
captive_portal_alert = true

[location]
country_code = "se"
city = "Malmo"

[[servers]]
hostname = "se-1"
country_code = "se"
city = "Malmo"
ipv4_addr_in = "192.0.2.10"
port = 51820
weight = 1
"#,
    )
    .unwrap();

    vpnctld()
        .arg("--config")
        .arg(&config_path)
        .arg("--check-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("captive_portal_alert = true"))
        .stdout(predicate::str::contains("se-1"))
        .stdout(predicate::str::contains("loopback-1").not());
}

#[test]
fn test_missing_config_file() {
    let temp_dir = TempDir::new().unwrap();

    vpnctld()
        .arg("--config")
        .arg(temp_dir.path().join("missing.toml"))
        .arg("--check-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}

#[test]
fn test_invalid_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("broken.toml");
    fs::write(&config_path, "[timers\nactivation_grace_ms = ").unwrap();

    vpnctld()
        .arg("--config")
        .arg(&config_path)
        .arg("--check-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse config"));
}
