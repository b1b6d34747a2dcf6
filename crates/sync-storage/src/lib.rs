//! Queue store for the offer synchronization pipeline.
//!
//! Provides:
//! - Deduplicated ordered queues with atomic pop-many
//! - The indexed-offer set and per-offer index snapshots
//! - In-flight tokens for provider workers
//! - A RocksDB backend for a single daemon process and a PostgreSQL
//!   backend shared between processes

pub mod column_families;
pub mod error;
pub mod keys;
pub mod postgres;
pub mod queues;
pub mod rocks;
pub mod store;

use std::sync::Arc;

use sync_types::{QueueBackend, QueueStoreSettings};

pub use error::StorageError;
pub use postgres::PgStore;
pub use queues::{QueueStats, SyncQueues};
pub use rocks::RocksStore;
pub use store::{InFlightStore, QueueName, QueueStore, SetName, SnapshotStore, SyncStore};

/// Connection pool size for the PostgreSQL queue store
const PG_STORE_CONNECTIONS: u32 = 5;

/// Open the configured backend.
///
/// `rocksdb_path` is the already expanded directory for the RocksDB backend.
pub async fn open_store(
    settings: &QueueStoreSettings,
    rocksdb_path: &std::path::Path,
) -> Result<Arc<dyn SyncStore>, StorageError> {
    match settings.backend {
        QueueBackend::Rocksdb => {
            std::fs::create_dir_all(rocksdb_path)?;
            Ok(Arc::new(RocksStore::open(rocksdb_path)?))
        }
        QueueBackend::Postgres => {
            let url = settings.database_url.as_deref().ok_or_else(|| {
                StorageError::Config("queue_store.database_url is not set".to_string())
            })?;
            Ok(Arc::new(PgStore::connect(url, PG_STORE_CONNECTIONS).await?))
        }
    }
}
