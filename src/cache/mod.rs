//! Cache module for storing provider responses in SQLite
//!
//! Every outbound call to the sports-data provider passes through this cache.
//! Entries are keyed by resource name plus name-sorted parameters, expire
//! according to an ordered TTL policy, and count how often they are served.
//! Expired rows stay readable through `CacheStore::get_stale` so callers can
//! fall back to old data when the provider is down.

mod clock;
mod error;
mod key;
mod store;
mod ttl;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::CacheError;
pub use key::{derive_key, ParamSet};
pub use store::{CacheEntry, CacheStore, ResourceStats, StaleEntry};
pub use ttl::{Lifetime, TtlPolicy, TtlRule};
