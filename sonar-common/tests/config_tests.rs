//! Tests for config file resolution and TOML loading
//!
//! Tests that touch SONAR_CONFIG are marked #[serial] so they never race
//! on the process environment.

use serde::Deserialize;
use serial_test::serial;
use sonar_common::config::{load_toml, resolve_config_file, LoggingConfig, CONFIG_ENV_VAR};
use sonar_common::Error;
use std::env;
use std::path::Path;
use tempfile::TempDir;

#[test]
#[serial]
fn test_cli_argument_wins_over_env() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/from-env.toml");

    let resolved = resolve_config_file(
        Some(Path::new("/tmp/from-cli.toml")),
        CONFIG_ENV_VAR,
        "session.toml",
    )
    .unwrap();
    assert_eq!(resolved, Path::new("/tmp/from-cli.toml"));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_env_var_used_without_cli_argument() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/from-env.toml");

    let resolved = resolve_config_file(None, CONFIG_ENV_VAR, "session.toml").unwrap();
    assert_eq!(resolved, Path::new("/tmp/from-env.toml"));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_missing_fallback_is_config_error() {
    env::remove_var(CONFIG_ENV_VAR);

    // File name chosen so it cannot exist in a real config dir
    let result = resolve_config_file(None, CONFIG_ENV_VAR, "no-such-session-7f3a.toml");
    assert!(matches!(result, Err(Error::Config(_))));
}

#[derive(Debug, Deserialize)]
struct Sample {
    name: String,
    #[serde(default)]
    logging: LoggingConfig,
}

#[test]
fn test_load_toml_reads_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sample.toml");
    std::fs::write(&path, "name = \"demo\"\n[logging]\nlevel = \"warn\"\n").unwrap();

    let sample: Sample = load_toml(&path).unwrap();
    assert_eq!(sample.name, "demo");
    assert_eq!(sample.logging.level, "warn");
}

#[test]
fn test_load_toml_missing_file() {
    let dir = TempDir::new().unwrap();
    let result: Result<Sample, _> = load_toml(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_load_toml_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "name = [unterminated").unwrap();

    let result: Result<Sample, _> = load_toml(&path);
    assert!(matches!(result, Err(Error::Toml(_))));
}
