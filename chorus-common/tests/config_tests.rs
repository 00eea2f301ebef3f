//! Unit tests for configuration and graceful degradation
//!
//! Tests that manipulate CHORUS_ROOT_FOLDER are marked with #[serial]
//! so they never race each other on the process environment.

use chorus_common::config::{
    load_toml_config, write_toml_config, LoggingConfig, RootFolderInitializer,
    RootFolderResolver, DATABASE_FILE_NAME, ROOT_FOLDER_ENV,
};
use serde::{Deserialize, Serialize};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct SampleConfig {
    #[serde(default)]
    root_folder: Option<PathBuf>,
    #[serde(default)]
    logging: LoggingConfig,
}

#[test]
#[serial]
fn test_cli_argument_wins_over_environment() {
    env::set_var(ROOT_FOLDER_ENV, "/from/env");

    let resolved = RootFolderResolver::new("test-module")
        .with_cli_arg(Some(PathBuf::from("/from/cli")))
        .with_toml_root(Some(PathBuf::from("/from/toml")))
        .resolve();

    env::remove_var(ROOT_FOLDER_ENV);
    assert_eq!(resolved, PathBuf::from("/from/cli"));
}

#[test]
#[serial]
fn test_environment_wins_over_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/from/env");

    let resolved = RootFolderResolver::new("test-module")
        .with_toml_root(Some(PathBuf::from("/from/toml")))
        .resolve();

    env::remove_var(ROOT_FOLDER_ENV);
    assert_eq!(resolved, PathBuf::from("/from/env"));
}

#[test]
#[serial]
fn test_toml_used_when_no_cli_or_env() {
    env::remove_var(ROOT_FOLDER_ENV);

    let resolved = RootFolderResolver::new("test-module")
        .with_toml_root(Some(PathBuf::from("/from/toml")))
        .resolve();

    assert_eq!(resolved, PathBuf::from("/from/toml"));
}

#[test]
#[serial]
fn test_compiled_default_is_non_empty() {
    env::remove_var(ROOT_FOLDER_ENV);

    let resolved = RootFolderResolver::new("test-module").resolve();
    assert!(!resolved.as_os_str().is_empty());
}

#[test]
fn test_initializer_creates_directory_and_database_path() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("nested").join("root");

    let initializer = RootFolderInitializer::new(root.clone());
    initializer.ensure_directory_exists().unwrap();

    assert!(root.is_dir());
    assert_eq!(initializer.database_path(), root.join(DATABASE_FILE_NAME));
}

#[test]
fn test_missing_toml_yields_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config: SampleConfig = load_toml_config(&temp_dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, SampleConfig::default());
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_malformed_toml_is_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    std::fs::write(&path, "root_folder = [unterminated").unwrap();

    let result: chorus_common::Result<SampleConfig> = load_toml_config(&path);
    assert!(result.is_err());
}

#[test]
fn test_write_then_load_preserves_fields() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("cfg").join("chorus-va.toml");

    let config = SampleConfig {
        root_folder: Some(PathBuf::from("/srv/chorus")),
        logging: LoggingConfig {
            level: "debug".to_string(),
            log_file: None,
        },
    };
    write_toml_config(&config, &path).unwrap();

    let loaded: SampleConfig = load_toml_config(&path).unwrap();
    assert_eq!(loaded, config);
}
