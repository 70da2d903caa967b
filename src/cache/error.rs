use thiserror::Error;

/// Errors that can occur when reading or writing the cache table
#[derive(Debug, Error)]
pub enum CacheError {
    /// SQLite read or write failed
    #[error("Cache database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Payload or parameter set could not be (de)serialized
    #[error("Failed to serialize cache payload: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Could not create the cache directory
    #[error("Cache directory error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking database task panicked or was cancelled
    #[error("Cache task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Another thread panicked while holding the connection
    #[error("Cache connection lock poisoned")]
    LockPoisoned,

    /// No row exists for the key
    #[error("No cache entry for key '{key}'")]
    NotFound { key: String },
}
