//! pitchcache
//!
//! Persistent response cache for a football data provider. Every outbound
//! call goes through `fetch::CachedFetcher`, which serves fresh entries from
//! the SQLite-backed `cache::CacheStore`, writes remote results through, and
//! falls back to stale entries when the provider fails.

pub mod cache;
pub mod cli;
pub mod fetch;
pub mod refresh;
pub mod remote;
