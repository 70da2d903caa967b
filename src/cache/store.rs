//! SQLite-backed cache store
//!
//! Provides a `CacheStore` that persists serialized payloads keyed by
//! resource name and parameters, with per-resource expiry and access counts.

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::clock::{Clock, SystemClock};
use super::error::CacheError;
use super::key::{derive_key, ParamSet};
use super::ttl::{Lifetime, TtlPolicy};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS cache (
    key           TEXT PRIMARY KEY,
    resource_name TEXT NOT NULL,
    params        TEXT,
    payload       TEXT NOT NULL,
    created_at    INTEGER NOT NULL,
    expires_at    INTEGER,
    last_accessed INTEGER NOT NULL,
    access_count  INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_cache_resource_name ON cache (resource_name);
CREATE INDEX IF NOT EXISTS idx_cache_expires_at ON cache (expires_at);
";

const ENTRY_COLUMNS: &str =
    "key, resource_name, params, payload, created_at, expires_at, last_accessed, access_count";

/// A row of the cache table
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub resource_name: String,
    pub params: ParamSet,
    /// Serialized JSON payload
    pub payload: String,
    pub created_at: DateTime<Utc>,
    /// `None` means the entry never expires
    pub expires_at: Option<DateTime<Utc>>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at < now)
    }
}

/// Result of reading an entry while ignoring its expiry
#[derive(Debug)]
pub struct StaleEntry<T> {
    /// The cached data
    pub data: T,
    /// When the data was written
    pub created_at: DateTime<Utc>,
    /// Whether the entry had expired at read time
    pub is_expired: bool,
}

/// Usage summary for one resource name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceStats {
    pub resource_name: String,
    pub total_entries: u64,
    pub total_accesses: u64,
    pub avg_accesses: f64,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

/// Persistent, expiry-aware cache table
///
/// The store owns one SQLite connection behind a mutex. Every operation runs
/// on tokio's blocking pool, so callers suspend rather than block the runtime.
/// Cloning is cheap and every clone shares the same connection.
#[derive(Debug, Clone)]
pub struct CacheStore {
    conn: Arc<Mutex<Connection>>,
    policy: Arc<TtlPolicy>,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    /// Opens (or creates) a cache database at the given path
    ///
    /// Parent directories are created if missing.
    pub fn open(path: &Path, policy: TtlPolicy) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::with_connection(conn, policy)
    }

    /// Opens a store that lives only as long as this handle and its clones
    pub fn open_in_memory(policy: TtlPolicy) -> Result<Self, CacheError> {
        Self::with_connection(Connection::open_in_memory()?, policy)
    }

    fn with_connection(conn: Connection, policy: TtlPolicy) -> Result<Self, CacheError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            policy: Arc::new(policy),
            clock: Arc::new(SystemClock),
        })
    }

    /// Replaces the time source used for expiry and accounting
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Default database location in the XDG cache directory
    ///
    /// Uses `~/.cache/pitchcache/cache.sqlite3` on Linux. Returns `None` if
    /// no home directory can be determined.
    pub fn default_path() -> Option<PathBuf> {
        let project_dirs = ProjectDirs::from("", "", "pitchcache")?;
        Some(project_dirs.cache_dir().join("cache.sqlite3"))
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    /// Closes the connection
    ///
    /// If other clones of this store are still alive the connection stays
    /// open until the last one is dropped.
    pub fn close(self) -> Result<(), CacheError> {
        let Ok(mutex) = Arc::try_unwrap(self.conn) else {
            return Ok(());
        };
        let conn = mutex.into_inner().map_err(|_| CacheError::LockPoisoned)?;
        conn.close().map_err(|(_, e)| CacheError::Database(e))
    }

    /// Runs a closure against the connection on the blocking pool
    async fn with_conn<R, F>(&self, f: F) -> Result<R, CacheError>
    where
        F: FnOnce(&Connection) -> Result<R, CacheError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| CacheError::LockPoisoned)?;
            f(&guard)
        })
        .await?
    }

    /// Reads a fresh entry and records the hit
    ///
    /// Returns `Ok(None)` if no row exists or the row has expired. Expired
    /// rows are left in place for `sweep` and do not count as hits. A payload
    /// that fails to decode as `T` returns an error and is not counted either.
    pub async fn get<T: DeserializeOwned>(
        &self,
        resource_name: &str,
        param_set: &ParamSet,
    ) -> Result<Option<T>, CacheError> {
        let key = derive_key(resource_name, param_set);
        let now = self.clock.now().timestamp_millis();

        let Some(payload) = self.read_fresh(key.clone(), now).await? else {
            return Ok(None);
        };
        let value = serde_json::from_str(&payload)?;
        self.record_hit(key, now).await?;
        Ok(Some(value))
    }

    async fn read_fresh(&self, key: String, now: i64) -> Result<Option<String>, CacheError> {
        self.with_conn(move |conn| {
            let row: Option<(String, Option<i64>)> = conn
                .query_row(
                    "SELECT payload, expires_at FROM cache WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            Ok(row.and_then(|(payload, expires_at)| match expires_at {
                Some(expires_at) if expires_at < now => None,
                _ => Some(payload),
            }))
        })
        .await
    }

    async fn record_hit(&self, key: String, now: i64) -> Result<(), CacheError> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE cache SET access_count = access_count + 1, last_accessed = ?2 WHERE key = ?1",
                params![key, now],
            )?;
            Ok(())
        })
        .await
    }

    /// Reads an entry regardless of expiry, without recording a hit
    pub async fn get_stale<T: DeserializeOwned>(
        &self,
        resource_name: &str,
        param_set: &ParamSet,
    ) -> Result<Option<StaleEntry<T>>, CacheError> {
        let key = derive_key(resource_name, param_set);
        let entry = self.load_entry(key).await?;
        let Some(entry) = entry else {
            return Ok(None);
        };

        let is_expired = entry.is_expired_at(self.clock.now());
        Ok(Some(StaleEntry {
            data: serde_json::from_str(&entry.payload)?,
            created_at: entry.created_at,
            is_expired,
        }))
    }

    /// Returns the full row for a resource and parameters
    pub async fn entry(
        &self,
        resource_name: &str,
        param_set: &ParamSet,
    ) -> Result<CacheEntry, CacheError> {
        let key = derive_key(resource_name, param_set);
        self.load_entry(key.clone())
            .await?
            .ok_or(CacheError::NotFound { key })
    }

    async fn load_entry(&self, key: String) -> Result<Option<CacheEntry>, CacheError> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM cache WHERE key = ?1");
        let raw = self
            .with_conn(move |conn| Ok(conn.query_row(&sql, params![key], RawEntry::from_row).optional()?))
            .await?;
        raw.map(RawEntry::into_entry).transpose()
    }

    /// Writes a payload, replacing any existing entry for the same key
    ///
    /// `created_at` and `expires_at` are reset from the TTL policy. The
    /// access count carries over from the previous entry.
    ///
    /// # Returns
    /// The derived cache key
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        resource_name: &str,
        param_set: &ParamSet,
        payload: &T,
    ) -> Result<String, CacheError> {
        let payload = serde_json::to_string(payload)?;
        let key = derive_key(resource_name, param_set);
        let params_json = param_set.to_json()?;

        let now = self.clock.now();
        let expires_at = match self.policy.resolve(resource_name) {
            Lifetime::Expires(ttl) => Some((now + ttl).timestamp_millis()),
            Lifetime::Forever => None,
        };
        let now = now.timestamp_millis();
        let resource_name = resource_name.to_string();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO cache
                    (key, resource_name, params, payload, created_at, expires_at, last_accessed, access_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?5, 0)
                 ON CONFLICT(key) DO UPDATE SET
                    resource_name = excluded.resource_name,
                    params = excluded.params,
                    payload = excluded.payload,
                    created_at = excluded.created_at,
                    expires_at = excluded.expires_at",
                params![key, resource_name, params_json, payload, now, expires_at],
            )?;
            Ok(key)
        })
        .await
    }

    /// Deletes every entry whose expiry has passed
    ///
    /// # Returns
    /// The number of rows removed
    pub async fn sweep(&self) -> Result<u64, CacheError> {
        let now = self.clock.now().timestamp_millis();
        let removed = self
            .with_conn(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM cache WHERE expires_at IS NOT NULL AND expires_at < ?1",
                    params![now],
                )?)
            })
            .await?;

        tracing::debug!(removed, "swept expired cache entries");
        Ok(removed as u64)
    }

    /// Deletes every entry for a resource name
    pub async fn clear_resource(&self, resource_name: &str) -> Result<u64, CacheError> {
        let resource_name = resource_name.to_string();
        let removed = self
            .with_conn(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM cache WHERE resource_name = ?1",
                    params![resource_name],
                )?)
            })
            .await?;
        Ok(removed as u64)
    }

    /// Per-resource usage summary, ordered by resource name
    pub async fn stats(&self) -> Result<Vec<ResourceStats>, CacheError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT resource_name,
                        COUNT(*),
                        COALESCE(SUM(access_count), 0),
                        COALESCE(AVG(access_count), 0.0),
                        MAX(last_accessed)
                 FROM cache
                 GROUP BY resource_name
                 ORDER BY resource_name",
            )?;

            let rows = stmt.query_map([], |row| {
                let total_entries: i64 = row.get(1)?;
                let total_accesses: i64 = row.get(2)?;
                let last_accessed: Option<i64> = row.get(4)?;
                Ok(ResourceStats {
                    resource_name: row.get(0)?,
                    total_entries: total_entries.max(0) as u64,
                    total_accesses: total_accesses.max(0) as u64,
                    avg_accesses: row.get(3)?,
                    last_accessed_at: last_accessed.map(from_millis),
                })
            })?;

            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// Total number of rows, expired or not
    pub async fn size(&self) -> Result<u64, CacheError> {
        let count: i64 = self
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM cache", [], |row| row.get(0))?))
            .await?;
        Ok(count.max(0) as u64)
    }
}

/// Column values before timestamp and parameter decoding
struct RawEntry {
    key: String,
    resource_name: String,
    params: Option<String>,
    payload: String,
    created_at: i64,
    expires_at: Option<i64>,
    last_accessed: i64,
    access_count: i64,
}

impl RawEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            resource_name: row.get(1)?,
            params: row.get(2)?,
            payload: row.get(3)?,
            created_at: row.get(4)?,
            expires_at: row.get(5)?,
            last_accessed: row.get(6)?,
            access_count: row.get(7)?,
        })
    }

    fn into_entry(self) -> Result<CacheEntry, CacheError> {
        let params = match self.params.as_deref() {
            Some(json) => serde_json::from_str(json)?,
            None => ParamSet::new(),
        };

        Ok(CacheEntry {
            key: self.key,
            resource_name: self.resource_name,
            params,
            payload: self.payload,
            created_at: from_millis(self.created_at),
            expires_at: self.expires_at.map(from_millis),
            last_accessed_at: from_millis(self.last_accessed),
            access_count: self.access_count.max(0) as u64,
        })
    }
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}
