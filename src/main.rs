//! pitchcache - maintenance CLI for the football data response cache
//!
//! Exposes the operational surface of the cache: stats, size, sweeping,
//! clearing a resource, fetching (optionally forced) and preloading.

use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pitchcache::cache::{CacheStore, ParamSet, TtlPolicy};
use pitchcache::cli::{preload_targets, Cli, Command, Settings};
use pitchcache::fetch::{CachedFetcher, PreloadJob};
use pitchcache::refresh::{SweepConfig, SweepHandle, SweepMessage};
use pitchcache::remote::ApiClient;

/// Logs go to stderr so stdout stays parseable
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing();

    let settings = Settings::from_cli(&cli)?;
    let store = CacheStore::open(&settings.db_path, TtlPolicy::default())?;
    tracing::debug!(path = %settings.db_path.display(), "opened cache");

    let client = ApiClient::new(settings.api_key.clone()).with_base_url(settings.api_url.clone());
    let result = run(cli.command, store.clone(), client).await;

    store.close()?;
    result
}

async fn run(
    command: Command,
    store: CacheStore,
    client: ApiClient,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Stats => {
            let stats = store.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Size => {
            println!("{}", store.size().await?);
        }
        Command::Sweep { every: None } => {
            let removed = store.sweep().await?;
            println!("Removed {} expired entries", removed);
        }
        Command::Sweep { every: Some(secs) } => {
            run_sweeper(store, Duration::from_secs(secs.max(1))).await;
        }
        Command::Clear { resource } => {
            let removed = store.clear_resource(&resource).await?;
            println!("Removed {} entries for '{}'", removed, resource);
        }
        Command::Fetch {
            resource,
            params,
            refresh,
        } => {
            let params: ParamSet = params.into_iter().collect();
            let fetcher = CachedFetcher::new(store);
            let fetched = fetcher
                .execute(&resource, &params, refresh, || client.fetch(&resource, &params))
                .await?;

            if let Some(ref error) = fetched.fallback_error {
                tracing::warn!(%error, "provider unavailable, showing cached data");
            }
            tracing::info!(
                origin = ?fetched.origin,
                last_updated = %fetched.last_updated,
                elapsed_ms = fetched.elapsed.as_millis() as u64,
                "fetched {}",
                resource
            );
            println!("{}", serde_json::to_string_pretty(&fetched.data)?);
        }
        Command::Preload { date } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let jobs = preload_targets(date)
                .into_iter()
                .map(|(resource, params)| {
                    let client = client.clone();
                    let query = params.clone();
                    PreloadJob::new(resource, params, async move {
                        client.fetch(resource, &query).await
                    })
                })
                .collect();

            let fetcher = CachedFetcher::new(store);
            let report = fetcher.preload(jobs).await;
            for failure in report.failed() {
                if let Err(ref error) = failure.result {
                    eprintln!("Failed to preload {}: {}", failure.resource_name, error);
                }
            }
            println!(
                "Preloaded {}/{} resources",
                report.succeeded(),
                report.outcomes.len()
            );
        }
    }

    Ok(())
}

/// Runs the periodic sweeper until Ctrl-C
async fn run_sweeper(store: CacheStore, interval: Duration) {
    let mut handle = SweepHandle::spawn(
        store,
        SweepConfig {
            interval,
            enabled: true,
        },
    );
    tracing::info!(interval_secs = interval.as_secs(), "sweeping expired entries");

    loop {
        tokio::select! {
            message = handle.receiver.recv() => match message {
                Some(SweepMessage::Swept(removed)) => println!("Removed {} expired entries", removed),
                Some(SweepMessage::SweepFailed(error)) => eprintln!("Sweep failed: {}", error),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown().await;
}
