//! Command-line interface parsing for pitchcache
//!
//! This module handles parsing of CLI arguments using clap, including
//! `NAME=VALUE` request parameters and resolution of the database path.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use thiserror::Error;

use crate::cache::{CacheStore, ParamSet};
use crate::remote::DEFAULT_BASE_URL;

/// Error types for CLI argument handling
#[derive(Debug, Error)]
pub enum CliError {
    /// A request parameter was not in `NAME=VALUE` form
    #[error("Invalid parameter: '{0}'. Expected NAME=VALUE")]
    InvalidParam(String),

    /// No `--db` given and no XDG cache directory available
    #[error("Could not determine a cache location; pass --db or set PITCHCACHE_DB")]
    NoCachePath,
}

/// pitchcache - Inspect and warm the football data response cache
#[derive(Parser, Debug)]
#[command(name = "pitchcache")]
#[command(about = "Football data response cache maintenance")]
#[command(version)]
pub struct Cli {
    /// Path to the cache database
    #[arg(long, env = "PITCHCACHE_DB", global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Base URL of the sports-data provider
    #[arg(long, env = "PITCHCACHE_API_URL", global = true, default_value = DEFAULT_BASE_URL)]
    pub api_url: String,

    /// Provider API key
    #[arg(long, env = "PITCHCACHE_API_KEY", global = true, hide_env_values = true)]
    pub api_key: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Show per-resource entry and access counts
    Stats,
    /// Print the total number of cached rows
    Size,
    /// Delete expired rows
    Sweep {
        /// Keep running and sweep every SECS seconds until interrupted
        #[arg(long, value_name = "SECS")]
        every: Option<u64>,
    },
    /// Delete every row for a resource name
    Clear {
        resource: String,
    },
    /// Fetch a resource through the cache
    ///
    /// Examples:
    ///   pitchcache fetch fixtures -p date=2024-05-01 -p league=39
    ///   pitchcache fetch odds -p fixture=42 --refresh
    Fetch {
        resource: String,
        /// Request parameter, may be repeated
        #[arg(short = 'p', long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
        params: Vec<(String, String)>,
        /// Bypass the cache and overwrite the entry
        #[arg(long)]
        refresh: bool,
    },
    /// Warm the cache with the high-value resources for a day
    Preload {
        /// Day to preload (defaults to today, UTC)
        #[arg(long, value_name = "YYYY-MM-DD")]
        date: Option<NaiveDate>,
    },
}

/// Parses a `NAME=VALUE` argument
///
/// The value may itself contain `=`; only the first one splits.
pub fn parse_param(s: &str) -> Result<(String, String), CliError> {
    match s.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(CliError::InvalidParam(s.to_string())),
    }
}

/// Settings derived from CLI arguments and environment
#[derive(Debug, Clone)]
pub struct Settings {
    pub db_path: PathBuf,
    pub api_url: String,
    pub api_key: Option<String>,
}

impl Settings {
    /// Creates Settings from parsed CLI arguments
    ///
    /// Falls back to the XDG cache directory when `--db` is not given.
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let db_path = match &cli.db {
            Some(path) => path.clone(),
            None => CacheStore::default_path().ok_or(CliError::NoCachePath)?,
        };

        Ok(Self {
            db_path,
            api_url: cli.api_url.clone(),
            api_key: cli.api_key.clone(),
        })
    }
}

/// Resources warmed by `pitchcache preload`
pub fn preload_targets(date: NaiveDate) -> Vec<(&'static str, ParamSet)> {
    let day = date.format("%Y-%m-%d").to_string();
    vec![
        ("fixtures", ParamSet::new().with("date", day.clone())),
        ("fixtures", ParamSet::new().with("live", "all")),
        ("leagues", ParamSet::new().with("current", "true")),
        ("odds", ParamSet::new().with("date", day)),
    ]
}
