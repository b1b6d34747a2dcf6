//! Error types for the synchronization pipeline.

use sync_catalog::CatalogError;
use sync_storage::StorageError;
use thiserror::Error;

use crate::runner::RunnerError;
use crate::search_index::SearchIndexError;

/// Errors that can occur while synchronizing the index
#[derive(Error, Debug)]
pub enum IndexingError {
    /// Queue store operation failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Catalog query failed
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Search index call failed after its own retries
    #[error("Search index error: {0}")]
    SearchIndex(#[from] SearchIndexError),

    /// Worker could not be started
    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    /// A worker panicked
    #[error("Worker panicked: {0}")]
    Panicked(String),
}

impl IndexingError {
    /// Store and catalog failures end the current invocation. Everything
    /// else is handled at the batch or job boundary.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IndexingError::Storage(_) | IndexingError::Catalog(_))
    }
}
