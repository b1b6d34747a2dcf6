//! Storage layer error types.

use thiserror::Error;

/// Errors that can occur in the storage layer.
///
/// Every variant means the store itself is unavailable or corrupt; callers
/// treat them as fatal for the current invocation.
#[derive(Error, Debug)]
pub enum StorageError {
    /// RocksDB operation failed
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// PostgreSQL operation failed
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// Column family not found
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Another process holds the RocksDB lock
    #[error("Queue store at {0} is held by another process")]
    Locked(String),

    /// Backend misconfigured
    #[error("Configuration error: {0}")]
    Config(String),

    /// A writer panicked while holding the queue lock
    #[error("Queue lock poisoned")]
    LockPoisoned,
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<sync_types::SyncError> for StorageError {
    fn from(err: sync_types::SyncError) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
