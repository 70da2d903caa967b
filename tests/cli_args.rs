//! Integration tests for the pitchcache binary
//!
//! Runs the CLI against a throwaway database in a temp directory.

use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

/// Helper to run the CLI with given args and capture output
fn run_cli(db: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_pitchcache"))
        .arg("--db")
        .arg(db)
        .args(args)
        .env_remove("PITCHCACHE_API_KEY")
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to execute pitchcache")
}

#[test]
fn test_help_flag_exits_successfully() {
    let output = Command::new(env!("CARGO_BIN_EXE_pitchcache"))
        .arg("--help")
        .output()
        .expect("Failed to execute pitchcache");
    assert!(output.status.success(), "Expected --help to exit successfully");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("pitchcache"), "Help should mention pitchcache");
    assert!(stdout.contains("sweep"), "Help should list the sweep command");
    assert!(stdout.contains("preload"), "Help should list the preload command");
}

#[test]
fn test_size_on_new_database_is_zero() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let db = temp_dir.path().join("cache.sqlite3");

    let output = run_cli(&db, &["size"]);

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "0");
    assert!(db.exists(), "Database file should be created");
}

#[test]
fn test_stats_on_new_database_is_empty_list() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let db = temp_dir.path().join("cache.sqlite3");

    let output = run_cli(&db, &["stats"]);

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "[]");
}

#[test]
fn test_sweep_and_clear_report_counts() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let db = temp_dir.path().join("cache.sqlite3");

    let sweep = run_cli(&db, &["sweep"]);
    assert!(sweep.status.success());
    assert!(String::from_utf8_lossy(&sweep.stdout).contains("Removed 0 expired entries"));

    let clear = run_cli(&db, &["clear", "odds"]);
    assert!(clear.status.success());
    assert!(String::from_utf8_lossy(&clear.stdout).contains("Removed 0 entries for 'odds'"));
}

#[test]
fn test_invalid_param_prints_error_and_exits() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let db = temp_dir.path().join("cache.sqlite3");

    let output = run_cli(&db, &["fetch", "fixtures", "-p", "league"]);

    assert!(!output.status.success(), "Expected malformed param to fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Invalid parameter"),
        "Should print error message about the parameter: {}",
        stderr
    );
}

#[test]
fn test_fetch_with_unreachable_provider_and_empty_cache_fails() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let db = temp_dir.path().join("cache.sqlite3");

    let output = run_cli(
        &db,
        &["--api-url", "http://127.0.0.1:9", "fetch", "fixtures", "-p", "live=all"],
    );

    assert!(!output.status.success(), "No cache and no provider should fail");
    assert!(output.stdout.is_empty());
}

#[cfg(test)]
mod unit_tests {
    //! Unit tests for CLI parsing that don't require running the binary

    use clap::Parser;
    use pitchcache::cli::{parse_param, Cli, Command};

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["pitchcache"]).is_err());
    }

    #[test]
    fn test_cli_clear_resource() {
        let cli = Cli::parse_from(["pitchcache", "clear", "fixtures/statistics"]);
        assert_eq!(
            cli.command,
            Command::Clear {
                resource: "fixtures/statistics".to_string()
            }
        );
    }

    #[test]
    fn test_parse_param_returns_pair() {
        let result = parse_param("fixture=42");
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), ("fixture".to_string(), "42".to_string()));
    }

    #[test]
    fn test_parse_param_invalid_returns_error() {
        assert!(parse_param("fixture").is_err());
    }
}
