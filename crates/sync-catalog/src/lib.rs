//! Read-only access to the offer catalog.
//!
//! The synchronization pipeline never writes to the catalog. It needs
//! offers by id, and stable id-ordered pages of offer ids selected by
//! activity, venue, venue and provider, or booking deadline.

pub mod error;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sync_types::{EntityId, Offer, ProviderId, VenueId};

pub use error::CatalogError;
pub use memory::InMemoryCatalog;
pub use postgres::PgCatalog;

/// Paginated catalog queries. Pages are zero-based and ordered by offer id.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Offers with their stocks. Unknown ids are absent from the result.
    async fn get_by_ids(&self, ids: &[EntityId]) -> Result<Vec<Offer>, CatalogError>;

    async fn page_of_active_ids(
        &self,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<EntityId>, CatalogError>;

    async fn page_of_ids_by_venue(
        &self,
        venue_id: VenueId,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<EntityId>, CatalogError>;

    async fn page_of_ids_by_venue_and_provider(
        &self,
        venue_id: VenueId,
        provider_id: ProviderId,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<EntityId>, CatalogError>;

    /// Offers with a stock whose booking deadline is in `[from, to)`
    async fn page_of_ids_by_booking_deadline(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<EntityId>, CatalogError>;
}
