//! End-to-end CLI tests using `assert_cmd`.
//!
//! These invoke the actual compiled `ordsweep` binary and check exit codes
//! and output. None of them require a live LLM provider or network access:
//! `init` only writes a config file, and `run` against a roster with a
//! valid provider configured still completes without a real provider
//! reachable because the stand-in `SearchEngine` always reports zero
//! results, short-circuiting every county before any LLM call happens.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn cmd() -> Command {
    Command::cargo_bin("ordsweep").unwrap()
}

// ─── Help / version ─────────────────────────────────────────────────────

#[test]
fn test_help_shows_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("init"))
        .stdout(predicate::str::contains("run"));
}

#[test]
fn test_version_shows_semver() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ordsweep"));
}

// ─── init ────────────────────────────────────────────────────────────────

#[test]
fn test_init_writes_config_with_placeholder_keys() {
    let dir = tempdir().unwrap();
    cmd()
        .env("XDG_CONFIG_HOME", dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created configuration"));

    let config_path = dir.path().join("ordsweep").join("config.toml");
    assert!(config_path.exists());
    let contents = fs::read_to_string(&config_path).unwrap();
    assert!(contents.contains("ANTHROPIC_API_KEY"));
}

#[test]
fn test_init_refuses_to_overwrite_without_force() {
    let dir = tempdir().unwrap();
    cmd().env("XDG_CONFIG_HOME", dir.path()).arg("init").assert().success();

    cmd()
        .env("XDG_CONFIG_HOME", dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
}

#[test]
fn test_init_force_overwrites() {
    let dir = tempdir().unwrap();
    cmd().env("XDG_CONFIG_HOME", dir.path()).arg("init").assert().success();

    cmd()
        .env("XDG_CONFIG_HOME", dir.path())
        .args(["init", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created configuration"));
}

#[test]
fn test_init_help() {
    cmd()
        .args(["init", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--force"));
}

// ─── run ─────────────────────────────────────────────────────────────────

#[test]
fn test_run_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--county-fp"));
}

#[test]
fn test_run_requires_county_roster() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    let out_dir = dir.path().join("out");
    fs::write(
        &config_path,
        format!(
            "out_dir = \"{}\"\n\n[providers.anthropic]\napi_key = \"test-key\"\n",
            out_dir.display()
        ),
    )
    .unwrap();

    cmd()
        .args(["run", "--config", config_path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no county roster configured"));
}

#[test]
fn test_run_rejects_missing_config_file() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("does-not-exist.toml");

    cmd()
        .args(["run", "--config", missing.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load configuration"));
}

#[test]
fn test_run_completes_and_writes_empty_table_with_stub_collaborators() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    let roster_path = dir.path().join("counties.csv");
    let out_dir = dir.path().join("out");

    fs::write(&roster_path, "County,State\nEl Paso,Colorado\n").unwrap();
    fs::write(
        &config_path,
        format!(
            "out_dir = \"{}\"\ncounty_fp = \"{}\"\n\n[providers.anthropic]\napi_key = \"test-key\"\n",
            out_dir.display(),
            roster_path.display()
        ),
    )
    .unwrap();

    cmd()
        .args(["run", "--config", config_path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Extracted 0 ordinance rows"));

    let csv_path = out_dir.join("wind_db.csv");
    assert!(csv_path.exists());
    let usage_path = out_dir.join("usage.json");
    assert!(usage_path.exists());
    let usage_contents = fs::read_to_string(&usage_path).unwrap();
    assert!(usage_contents.contains("total_time_seconds"));
}

#[test]
fn test_run_county_fp_flag_overrides_config() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    let roster_path = dir.path().join("counties.csv");
    let out_dir = dir.path().join("out");

    fs::write(&roster_path, "County,State\nOrleans,Louisiana\n").unwrap();
    fs::write(
        &config_path,
        format!(
            "out_dir = \"{}\"\n\n[providers.anthropic]\napi_key = \"test-key\"\n",
            out_dir.display()
        ),
    )
    .unwrap();

    cmd()
        .args([
            "run",
            "--config",
            config_path.to_str().unwrap(),
            "--county-fp",
            roster_path.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Counties to process: 1"));
}
