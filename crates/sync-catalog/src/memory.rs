//! In-memory catalog for tests and local runs.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sync_types::{EntityId, Offer, ProviderId, VenueId};

use crate::error::CatalogError;
use crate::Catalog;

/// Catalog held in a map, ordered by offer id.
///
/// Can be switched unavailable as a whole, or for single venues, to
/// exercise failure handling.
#[derive(Default)]
pub struct InMemoryCatalog {
    offers: RwLock<BTreeMap<EntityId, Offer>>,
    failing_venues: RwLock<HashSet<VenueId>>,
    unavailable: AtomicBool,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_offers(offers: impl IntoIterator<Item = Offer>) -> Self {
        let catalog = Self::new();
        for offer in offers {
            catalog.upsert(offer);
        }
        catalog
    }

    /// Queries touching this venue fail
    pub fn with_failing_venue(self, venue_id: VenueId) -> Self {
        if let Ok(mut venues) = self.failing_venues.write() {
            venues.insert(venue_id);
        }
        self
    }

    pub fn upsert(&self, offer: Offer) {
        if let Ok(mut offers) = self.offers.write() {
            offers.insert(offer.id, offer);
        }
    }

    pub fn remove(&self, id: EntityId) -> Option<Offer> {
        self.offers.write().ok()?.remove(&id)
    }

    /// Make every query fail until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), CatalogError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CatalogError::Unavailable("catalog switched off".to_string()));
        }
        Ok(())
    }

    fn check_venue(&self, venue_id: VenueId) -> Result<(), CatalogError> {
        let failing = self
            .failing_venues
            .read()
            .map_err(|_| CatalogError::Unavailable("lock poisoned".to_string()))?;
        if failing.contains(&venue_id) {
            return Err(CatalogError::Unavailable(format!("venue {} failing", venue_id)));
        }
        Ok(())
    }

    fn page_where(
        &self,
        page: usize,
        page_size: usize,
        predicate: impl Fn(&Offer) -> bool,
    ) -> Result<Vec<EntityId>, CatalogError> {
        self.check_available()?;
        let offers = self
            .offers
            .read()
            .map_err(|_| CatalogError::Unavailable("lock poisoned".to_string()))?;
        Ok(offers
            .values()
            .filter(|offer| predicate(offer))
            .skip(page.saturating_mul(page_size))
            .take(page_size)
            .map(|offer| offer.id)
            .collect())
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn get_by_ids(&self, ids: &[EntityId]) -> Result<Vec<Offer>, CatalogError> {
        self.check_available()?;
        let offers = self
            .offers
            .read()
            .map_err(|_| CatalogError::Unavailable("lock poisoned".to_string()))?;
        Ok(ids.iter().filter_map(|id| offers.get(id).cloned()).collect())
    }

    async fn page_of_active_ids(
        &self,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<EntityId>, CatalogError> {
        self.page_where(page, page_size, |offer| offer.is_active)
    }

    async fn page_of_ids_by_venue(
        &self,
        venue_id: VenueId,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<EntityId>, CatalogError> {
        self.check_venue(venue_id)?;
        self.page_where(page, page_size, |offer| offer.venue_id == venue_id)
    }

    async fn page_of_ids_by_venue_and_provider(
        &self,
        venue_id: VenueId,
        provider_id: ProviderId,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<EntityId>, CatalogError> {
        self.check_venue(venue_id)?;
        self.page_where(page, page_size, |offer| {
            offer.venue_id == venue_id && offer.last_provider_id == Some(provider_id)
        })
    }

    async fn page_of_ids_by_booking_deadline(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<EntityId>, CatalogError> {
        self.page_where(page, page_size, |offer| {
            offer
                .stocks
                .iter()
                .filter_map(|s| s.booking_limit_datetime)
                .any(|limit| limit >= from && limit < to)
        })
    }
}
