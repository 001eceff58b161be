//! Integration tests for the CLI config command
//!
//! Tests file I/O operations for the `reqmon config` subcommand. Verifies
//! template generation, file writing, and loading the result back.

use reqmon::cli::generate_config_template;
use reqmon::config::Config;
use std::fs;
use tempfile::TempDir;

/// Helper to create temporary directory for file operations
fn create_temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

#[test]
fn test_generated_template_creates_valid_config_file() {
    let temp_dir = create_temp_dir();
    let config_path = temp_dir.path().join("config.toml");

    let template = generate_config_template();
    fs::write(&config_path, template).expect("Failed to write template");

    let config =
        Config::from_file(&config_path).expect("Generated template should load as valid Config");
    config.validate().expect("Generated template should validate");

    assert_eq!(config.monitor.metric_path, "/metrics");
    assert_eq!(config.monitor.exclude_paths, vec!["/metrics".to_string()]);
    assert_eq!(config.filter.expected_items, 100_000);
}

#[test]
fn test_template_file_content_matches_generation() {
    let temp_dir = create_temp_dir();
    let config_path = temp_dir.path().join("config.toml");

    let template = generate_config_template();
    fs::write(&config_path, template).expect("Failed to write template");

    let content = fs::read_to_string(&config_path).expect("Failed to read back");
    assert_eq!(content, template);
}

#[test]
fn test_loading_missing_config_file_fails_with_context() {
    let temp_dir = create_temp_dir();
    let missing = temp_dir.path().join("does-not-exist.toml");

    let err = Config::from_file(&missing).expect_err("missing file should fail");
    assert!(
        err.to_string().contains("failed to read"),
        "error should carry read context, got: {err}"
    );
}
