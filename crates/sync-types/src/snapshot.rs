//! Indexed projections of an offer.
//!
//! [`IndexSnapshot`] is the minimal state remembered after a successful
//! add; comparing it with a fresh projection tells whether a provider update
//! changed anything the index shows. [`IndexDocument`] is the payload sent
//! to the search index service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::offer::Offer;
use crate::EntityId;

/// Last indexed state of an offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub name: String,

    /// Event start timestamps of bookable stocks, epoch seconds, ascending
    pub dates: Vec<i64>,

    /// Prices of bookable stocks, ascending
    pub prices: Vec<f64>,
}

impl IndexSnapshot {
    /// Project an offer as it would be indexed at `now`.
    ///
    /// Returns `None` when the offer is not bookable and therefore must not
    /// be in the index at all.
    pub fn from_offer(offer: &Offer, now: DateTime<Utc>) -> Option<Self> {
        if !offer.is_bookable(now) {
            return None;
        }

        let mut dates: Vec<i64> = if offer.is_event {
            offer
                .bookable_stocks(now)
                .filter_map(|s| s.beginning_datetime)
                .map(|d| d.timestamp())
                .collect()
        } else {
            Vec::new()
        };
        dates.sort_unstable();

        let mut prices: Vec<f64> = offer.bookable_stocks(now).map(|s| s.price).collect();
        prices.sort_by(|a, b| a.total_cmp(b));

        Some(Self {
            name: offer.name.clone(),
            dates,
            prices,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        serde_json::to_vec(self).map_err(SyncError::from)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        serde_json::from_slice(bytes).map_err(SyncError::from)
    }
}

/// Document pushed to the search index service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDocument {
    #[serde(rename = "objectID")]
    pub id: EntityId,
    pub name: String,
    pub bookable: bool,
    pub event_dates: Vec<i64>,
    pub prices: Vec<f64>,
}

impl IndexDocument {
    /// Build the document for an offer from its current projection.
    pub fn new(id: EntityId, snapshot: &IndexSnapshot) -> Self {
        Self {
            id,
            name: snapshot.name.clone(),
            bookable: true,
            event_dates: snapshot.dates.clone(),
            prices: snapshot.prices.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offer::Stock;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_unbookable_offer_has_no_snapshot() {
        let offer = Offer::new(1, "Sold out").with_stock(Stock::new(1, 5.0).with_quantity(1, 1));
        assert!(IndexSnapshot::from_offer(&offer, Utc::now()).is_none());
    }

    #[test]
    fn test_snapshot_uses_bookable_stocks_sorted() {
        let now = Utc::now();
        let offer = Offer::new(1, "Concert")
            .as_event()
            .with_stock(Stock::new(1, 30.0).with_beginning(now + Duration::days(3)))
            .with_stock(Stock::new(2, 10.0).with_beginning(now + Duration::days(1)))
            .with_stock(Stock::new(3, 1.0).with_beginning(now + Duration::days(2)).soft_deleted());

        let snapshot = IndexSnapshot::from_offer(&offer, now).unwrap();
        assert_eq!(snapshot.name, "Concert");
        assert_eq!(snapshot.prices, vec![10.0, 30.0]);
        assert_eq!(
            snapshot.dates,
            vec![
                (now + Duration::days(1)).timestamp(),
                (now + Duration::days(3)).timestamp()
            ]
        );
    }

    #[test]
    fn test_non_event_offer_has_no_dates() {
        let start = Utc.with_ymd_and_hms(2099, 1, 1, 20, 0, 0).unwrap();
        let offer = Offer::new(1, "Book").with_stock(Stock::new(1, 8.0).with_beginning(start));
        let snapshot = IndexSnapshot::from_offer(&offer, Utc::now()).unwrap();
        assert!(snapshot.dates.is_empty());
    }

    #[test]
    fn test_price_change_changes_snapshot() {
        let now = Utc::now();
        let before = Offer::new(42, "Show").with_stock(Stock::new(1, 10.0));
        let after = Offer::new(42, "Show").with_stock(Stock::new(1, 12.0));
        assert_ne!(
            IndexSnapshot::from_offer(&before, now),
            IndexSnapshot::from_offer(&after, now)
        );
    }

    #[test]
    fn test_document_wire_names() {
        let snapshot = IndexSnapshot {
            name: "Show".to_string(),
            dates: vec![1_700_000_000],
            prices: vec![12.0],
        };
        let json = serde_json::to_value(IndexDocument::new(42, &snapshot)).unwrap();
        assert_eq!(json["objectID"], 42);
        assert_eq!(json["eventDates"][0], 1_700_000_000_i64);
        assert_eq!(json["bookable"], true);
    }
}
