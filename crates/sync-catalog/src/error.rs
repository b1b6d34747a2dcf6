//! Catalog error types.

use thiserror::Error;

/// Errors reading the catalog. All of them are fatal to the current run.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Query failed or the database is unreachable
    #[error("Catalog database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Page offset does not fit a query
    #[error("Page {page} of size {page_size} is out of range")]
    PageOutOfRange { page: usize, page_size: usize },

    /// Catalog cannot serve the request
    #[error("Catalog unavailable: {0}")]
    Unavailable(String),
}
