//! Cache-first wrapper around remote calls
//!
//! `CachedFetcher::execute` serves a fresh cache entry when one exists,
//! otherwise calls the remote source and writes the result through. When the
//! remote call fails it falls back to whatever the cache last held, expired
//! or not, and only surfaces the remote error when there is nothing to serve.
//!
//! Two concurrent misses for the same key both call the remote source and
//! both write; the last write wins.

use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::cache::{CacheStore, ParamSet};

/// Where a result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Origin {
    /// Fresh cache entry
    Cache,
    /// Remote source, now written to the cache
    Remote,
    /// Cached entry served because the remote call failed
    StaleFallback,
}

/// Payload envelope written by the fetcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stamped<T> {
    pub data: T,
    /// When the data was fetched from the remote source
    pub last_updated: DateTime<Utc>,
}

/// Result of a cached remote call
#[derive(Debug)]
pub struct Fetched<T, E> {
    pub data: T,
    pub last_updated: DateTime<Utc>,
    pub origin: Origin,
    /// Wall time spent in `execute`
    pub elapsed: Duration,
    /// The remote error that caused a stale fallback
    pub fallback_error: Option<E>,
}

impl<T, E> Fetched<T, E> {
    pub fn is_fallback(&self) -> bool {
        self.origin == Origin::StaleFallback
    }
}

/// One resource to warm during `CachedFetcher::preload`
pub struct PreloadJob<T, E> {
    pub resource_name: String,
    pub params: ParamSet,
    fetch: BoxFuture<'static, Result<T, E>>,
}

impl<T, E> PreloadJob<T, E> {
    /// The future is only polled if the cache has no fresh entry
    pub fn new(
        resource_name: impl Into<String>,
        params: ParamSet,
        fetch: impl Future<Output = Result<T, E>> + Send + 'static,
    ) -> Self {
        Self {
            resource_name: resource_name.into(),
            params,
            fetch: Box::pin(fetch),
        }
    }
}

/// Outcome of one preload job
#[derive(Debug, Clone, PartialEq)]
pub struct PreloadOutcome {
    pub resource_name: String,
    pub params: ParamSet,
    /// Where the data came from, or the remote error message
    pub result: Result<Origin, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreloadReport {
    pub outcomes: Vec<PreloadOutcome>,
}

impl PreloadReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &PreloadOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }
}

/// Adds cache-first, force-refresh and stale-fallback behavior to remote calls
#[derive(Debug, Clone)]
pub struct CachedFetcher {
    store: CacheStore,
}

impl CachedFetcher {
    pub fn new(store: CacheStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Fetches a resource through the cache
    ///
    /// # Arguments
    /// * `resource_name` - Logical name, also used for TTL lookup
    /// * `param_set` - Parameters that distinguish this call
    /// * `force_refresh` - Skip the cache read and always call `remote_fetch`
    /// * `remote_fetch` - Produces the authoritative value; only called on a miss
    ///
    /// # Returns
    /// * `Ok(Fetched)` from the cache, the remote source, or a stale fallback
    /// * `Err(E)` - The remote error, unchanged, when no cached entry exists
    ///
    /// Cache read and write failures are logged and never returned.
    pub async fn execute<T, E, F, Fut>(
        &self,
        resource_name: &str,
        param_set: &ParamSet,
        force_refresh: bool,
        remote_fetch: F,
    ) -> Result<Fetched<T, E>, E>
    where
        T: Serialize + DeserializeOwned,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();

        if !force_refresh {
            match self.store.get::<Stamped<T>>(resource_name, param_set).await {
                Ok(Some(hit)) => {
                    tracing::debug!(resource = resource_name, "cache hit");
                    return Ok(Fetched {
                        data: hit.data,
                        last_updated: hit.last_updated,
                        origin: Origin::Cache,
                        elapsed: started.elapsed(),
                        fallback_error: None,
                    });
                }
                Ok(None) => tracing::debug!(resource = resource_name, "cache miss"),
                Err(e) => tracing::warn!(
                    resource = resource_name,
                    error = %e,
                    "cache read failed, fetching from remote"
                ),
            }
        }

        match remote_fetch().await {
            Ok(data) => {
                let stamped = Stamped {
                    data,
                    last_updated: self.store.clock().now(),
                };
                if let Err(e) = self.store.set(resource_name, param_set, &stamped).await {
                    tracing::warn!(resource = resource_name, error = %e, "cache write failed");
                }
                Ok(Fetched {
                    data: stamped.data,
                    last_updated: stamped.last_updated,
                    origin: Origin::Remote,
                    elapsed: started.elapsed(),
                    fallback_error: None,
                })
            }
            Err(remote_error) => {
                match self
                    .store
                    .get_stale::<Stamped<T>>(resource_name, param_set)
                    .await
                {
                    Ok(Some(stale)) => {
                        tracing::warn!(
                            resource = resource_name,
                            error = %remote_error,
                            cached_at = %stale.created_at,
                            "remote fetch failed, serving cached data"
                        );
                        Ok(Fetched {
                            data: stale.data.data,
                            last_updated: stale.data.last_updated,
                            origin: Origin::StaleFallback,
                            elapsed: started.elapsed(),
                            fallback_error: Some(remote_error),
                        })
                    }
                    Ok(None) => Err(remote_error),
                    Err(e) => {
                        tracing::warn!(
                            resource = resource_name,
                            error = %e,
                            "stale cache read failed"
                        );
                        Err(remote_error)
                    }
                }
            }
        }
    }

    /// Calls the remote source and overwrites the cache entry
    pub async fn refresh_now<T, E, F, Fut>(
        &self,
        resource_name: &str,
        param_set: &ParamSet,
        remote_fetch: F,
    ) -> Result<Fetched<T, E>, E>
    where
        T: Serialize + DeserializeOwned,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute(resource_name, param_set, true, remote_fetch)
            .await
    }

    /// Warms the cache for every job concurrently
    ///
    /// A failing job is recorded in the report and does not affect the others.
    pub async fn preload<T, E>(&self, jobs: Vec<PreloadJob<T, E>>) -> PreloadReport
    where
        T: Serialize + DeserializeOwned,
        E: Display,
    {
        let runs = jobs.into_iter().map(|job| async move {
            let PreloadJob {
                resource_name,
                params,
                fetch,
            } = job;
            let result = self
                .execute(&resource_name, &params, false, move || fetch)
                .await
                .map(|fetched| fetched.origin)
                .map_err(|e| e.to_string());
            PreloadOutcome {
                resource_name,
                params,
                result,
            }
        });

        let report = PreloadReport {
            outcomes: join_all(runs).await,
        };
        tracing::info!(
            succeeded = report.succeeded(),
            failed = report.outcomes.len() - report.succeeded(),
            "preload finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Clock, ManualClock, TtlPolicy};
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use thiserror::Error;

    #[derive(Debug, Error, PartialEq)]
    #[error("provider unavailable")]
    struct Unavailable;

    fn create_test_fetcher() -> (CachedFetcher, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 18, 0, 0).unwrap(),
        ));
        let store = CacheStore::open_in_memory(TtlPolicy::default())
            .expect("Failed to open in-memory store")
            .with_clock(clock.clone());
        (CachedFetcher::new(store), clock)
    }

    #[tokio::test]
    async fn test_miss_fetches_and_writes_through() {
        let (fetcher, clock) = create_test_fetcher();
        let params = ParamSet::new().with("league", "39");

        let result = fetcher
            .execute("standings", &params, false, || async {
                Ok::<_, Unavailable>(vec![1, 2, 3])
            })
            .await
            .unwrap();

        assert_eq!(result.origin, Origin::Remote);
        assert_eq!(result.data, vec![1, 2, 3]);
        assert_eq!(result.last_updated, clock.now());
        assert!(result.fallback_error.is_none());
        assert_eq!(fetcher.store().size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_hit_skips_remote() {
        let (fetcher, _clock) = create_test_fetcher();
        let params = ParamSet::new().with("team", "33");
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let result = fetcher
                .execute("teams", &params, false, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Unavailable>("Manchester United".to_string())
                })
                .await
                .unwrap();
            assert_eq!(result.data, "Manchester United");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let entry = fetcher.store().entry("teams", &params).await.unwrap();
        assert_eq!(entry.access_count, 2);
    }

    #[tokio::test]
    async fn test_cache_hit_reports_original_timestamp() {
        let (fetcher, clock) = create_test_fetcher();
        let params = ParamSet::new();
        let fetched_at = clock.now();

        fetcher
            .execute("leagues", &params, false, || async { Ok::<_, Unavailable>(1) })
            .await
            .unwrap();
        clock.advance(ChronoDuration::hours(1));

        let result = fetcher
            .execute("leagues", &params, false, || async { Ok::<_, Unavailable>(2) })
            .await
            .unwrap();
        assert_eq!(result.origin, Origin::Cache);
        assert_eq!(result.data, 1);
        assert_eq!(result.last_updated, fetched_at);
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_fresh_entry() {
        let (fetcher, _clock) = create_test_fetcher();
        let params = ParamSet::new().with("fixture", "42");

        fetcher
            .execute("predictions", &params, false, || async {
                Ok::<_, Unavailable>("home".to_string())
            })
            .await
            .unwrap();

        let refreshed = fetcher
            .refresh_now("predictions", &params, || async {
                Ok::<_, Unavailable>("away".to_string())
            })
            .await
            .unwrap();
        assert_eq!(refreshed.origin, Origin::Remote);
        assert_eq!(refreshed.data, "away");

        let cached: Option<Stamped<String>> =
            fetcher.store().get("predictions", &params).await.unwrap();
        assert_eq!(cached.unwrap().data, "away");
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_expired_entry() {
        let (fetcher, clock) = create_test_fetcher();
        let params = ParamSet::new().with("fixture", "42");

        fetcher
            .execute("odds", &params, false, || async { Ok::<_, Unavailable>(1.5) })
            .await
            .unwrap();
        clock.advance(ChronoDuration::minutes(30));

        let result = fetcher
            .execute("odds", &params, false, || async {
                Err::<f64, _>(Unavailable)
            })
            .await
            .unwrap();

        assert!(result.is_fallback());
        assert_eq!(result.data, 1.5);
        assert_eq!(result.fallback_error, Some(Unavailable));
    }

    #[tokio::test]
    async fn test_forced_failure_falls_back_to_fresh_entry() {
        let (fetcher, _clock) = create_test_fetcher();
        let params = ParamSet::new();

        fetcher
            .execute("leagues", &params, false, || async { Ok::<_, Unavailable>(7) })
            .await
            .unwrap();

        let result = fetcher
            .refresh_now("leagues", &params, || async { Err::<i32, _>(Unavailable) })
            .await
            .unwrap();
        assert_eq!(result.origin, Origin::StaleFallback);
        assert_eq!(result.data, 7);
    }

    #[tokio::test]
    async fn test_failure_without_entry_propagates_error() {
        let (fetcher, _clock) = create_test_fetcher();

        let result = fetcher
            .execute("injuries", &ParamSet::new(), false, || async {
                Err::<i32, _>(Unavailable)
            })
            .await;

        assert_eq!(result.unwrap_err(), Unavailable);
        assert_eq!(fetcher.store().size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_entry_is_treated_as_miss() {
        let (fetcher, _clock) = create_test_fetcher();
        let params = ParamSet::new();
        // Written without the Stamped envelope
        fetcher.store().set("teams", &params, &42).await.unwrap();

        let result = fetcher
            .execute("teams", &params, false, || async { Ok::<_, Unavailable>(43) })
            .await
            .unwrap();
        assert_eq!(result.origin, Origin::Remote);
        assert_eq!(result.data, 43);

        let entry = fetcher.store().entry("teams", &params).await.unwrap();
        assert_eq!(entry.access_count, 0, "Failed decode must not count as a hit");
        assert!(entry.payload.contains("43"));
    }

    #[tokio::test]
    async fn test_failed_write_still_returns_remote_data() {
        let (fetcher, _clock) = create_test_fetcher();
        let params = ParamSet::new().with("fixture", "42");
        // JSON objects need string keys, so this payload cannot be stored
        let lineups: HashMap<(i32, i32), i32> = HashMap::from([((1, 2), 3)]);

        let result = fetcher
            .execute("fixtures/lineups", &params, false, || async {
                Ok::<_, Unavailable>(lineups.clone())
            })
            .await
            .unwrap();

        assert_eq!(result.origin, Origin::Remote);
        assert_eq!(result.data, lineups);
        assert!(result.fallback_error.is_none());
        assert_eq!(fetcher.store().size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_preload_collects_failures_without_aborting() {
        let (fetcher, _clock) = create_test_fetcher();

        let jobs = vec![
            PreloadJob::new("leagues", ParamSet::new(), async { Ok::<_, Unavailable>(1) }),
            PreloadJob::new(
                "fixtures",
                ParamSet::new().with("live", "all"),
                async { Err::<i32, _>(Unavailable) },
            ),
            PreloadJob::new(
                "odds",
                ParamSet::new().with("date", "2024-05-01"),
                async { Ok::<_, Unavailable>(3) },
            ),
        ];

        let report = fetcher.preload(jobs).await;

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.succeeded(), 2);
        let failed: Vec<_> = report.failed().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].resource_name, "fixtures");
        assert_eq!(failed[0].result, Err("provider unavailable".to_string()));
        assert_eq!(fetcher.store().size().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_preload_does_not_poll_fetch_on_hit() {
        let (fetcher, _clock) = create_test_fetcher();
        fetcher
            .execute("leagues", &ParamSet::new(), false, || async {
                Ok::<_, Unavailable>(1)
            })
            .await
            .unwrap();

        let polled = Arc::new(AtomicUsize::new(0));
        let counter = polled.clone();
        let jobs = vec![PreloadJob::new("leagues", ParamSet::new(), async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Unavailable>(2)
        })];

        let report = fetcher.preload(jobs).await;
        assert_eq!(report.outcomes[0].result, Ok(Origin::Cache));
        assert_eq!(polled.load(Ordering::SeqCst), 0);
    }
}
