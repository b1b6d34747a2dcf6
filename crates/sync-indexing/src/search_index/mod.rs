//! Search index service trait and implementations.

mod http;
mod mock;

pub use http::HttpSearchIndex;
pub use mock::{MockSearchIndex, SearchIndexCall};

use async_trait::async_trait;
use sync_types::{EntityId, IndexDocument};
use thiserror::Error;

/// Error type for search index calls.
#[derive(Debug, Error)]
pub enum SearchIndexError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Index rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Bulk operations on the hosted index.
///
/// Adds replace existing documents with the same id and deletes of unknown
/// ids succeed, so every call can be repeated safely.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Add or replace documents
    async fn add_objects(&self, documents: &[IndexDocument]) -> Result<(), SearchIndexError>;

    /// Remove documents by id
    async fn delete_objects(&self, ids: &[EntityId]) -> Result<(), SearchIndexError>;

    /// Remove every document
    async fn clear_index(&self) -> Result<(), SearchIndexError>;
}
