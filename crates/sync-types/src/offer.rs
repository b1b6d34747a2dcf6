//! Catalog view of a sellable offer.
//!
//! Offers are read from the catalog on demand and never persisted by the
//! pipeline. Bookability is evaluated against an explicit `now` so that a
//! whole batch is judged at a single instant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EntityId, ProviderId, VenueId};

/// A stock line of an offer: one price, optionally one event occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stock {
    /// Stock identifier in the catalog
    pub id: i64,

    /// Unit price
    pub price: f64,

    /// Total quantity, `None` for unlimited stock
    pub quantity: Option<i64>,

    /// Quantity already booked
    #[serde(default)]
    pub booked_quantity: i64,

    /// Event occurrence start, for event offers
    pub beginning_datetime: Option<DateTime<Utc>>,

    /// Booking deadline
    pub booking_limit_datetime: Option<DateTime<Utc>>,

    /// Soft-deleted stocks are kept for history but never bookable
    #[serde(default)]
    pub is_soft_deleted: bool,
}

impl Stock {
    /// Create an unlimited, undated stock at the given price.
    pub fn new(id: i64, price: f64) -> Self {
        Self {
            id,
            price,
            quantity: None,
            booked_quantity: 0,
            beginning_datetime: None,
            booking_limit_datetime: None,
            is_soft_deleted: false,
        }
    }

    /// Set a limited quantity and how much of it is already booked.
    pub fn with_quantity(mut self, quantity: i64, booked: i64) -> Self {
        self.quantity = Some(quantity);
        self.booked_quantity = booked;
        self
    }

    /// Set the event occurrence start.
    pub fn with_beginning(mut self, beginning: DateTime<Utc>) -> Self {
        self.beginning_datetime = Some(beginning);
        self
    }

    /// Set the booking deadline.
    pub fn with_booking_limit(mut self, limit: DateTime<Utc>) -> Self {
        self.booking_limit_datetime = Some(limit);
        self
    }

    /// Mark the stock as soft-deleted.
    pub fn soft_deleted(mut self) -> Self {
        self.is_soft_deleted = true;
        self
    }

    /// Units still available, `None` when the stock is unlimited.
    pub fn remaining_quantity(&self) -> Option<i64> {
        self.quantity.map(|q| q - self.booked_quantity)
    }

    /// Whether this stock can still be booked at `now`.
    pub fn is_bookable(&self, now: DateTime<Utc>) -> bool {
        if self.is_soft_deleted {
            return false;
        }
        if self.booking_limit_datetime.is_some_and(|limit| limit <= now) {
            return false;
        }
        if self.beginning_datetime.is_some_and(|beginning| beginning <= now) {
            return false;
        }
        self.remaining_quantity().map_or(true, |remaining| remaining > 0)
    }
}

/// A sellable offer as seen by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    /// Entity identifier
    pub id: EntityId,

    /// Display name
    pub name: String,

    /// Inactive offers are never bookable
    pub is_active: bool,

    /// Event offers carry dated stocks
    #[serde(default)]
    pub is_event: bool,

    /// Owning venue
    pub venue_id: VenueId,

    /// Provider that last synchronized this offer, if any
    pub last_provider_id: Option<ProviderId>,

    /// Stock lines
    #[serde(default)]
    pub stocks: Vec<Stock>,
}

impl Offer {
    /// Create an active, stockless offer.
    pub fn new(id: EntityId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            is_active: true,
            is_event: false,
            venue_id: 0,
            last_provider_id: None,
            stocks: Vec::new(),
        }
    }

    /// Set the owning venue.
    pub fn with_venue(mut self, venue_id: VenueId) -> Self {
        self.venue_id = venue_id;
        self
    }

    /// Set the provider that last synchronized the offer.
    pub fn with_provider(mut self, provider_id: ProviderId) -> Self {
        self.last_provider_id = Some(provider_id);
        self
    }

    /// Mark the offer as an event.
    pub fn as_event(mut self) -> Self {
        self.is_event = true;
        self
    }

    /// Set the active flag.
    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    /// Append a stock line.
    pub fn with_stock(mut self, stock: Stock) -> Self {
        self.stocks.push(stock);
        self
    }

    /// Stocks that can still be booked at `now`.
    pub fn bookable_stocks(&self, now: DateTime<Utc>) -> impl Iterator<Item = &Stock> {
        self.stocks.iter().filter(move |s| s.is_bookable(now))
    }

    /// An offer is bookable when it is active and has at least one bookable stock.
    pub fn is_bookable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.bookable_stocks(now).next().is_some()
    }

    /// Earliest booking deadline across all stocks.
    pub fn booking_deadline(&self) -> Option<DateTime<Utc>> {
        self.stocks
            .iter()
            .filter_map(|s| s.booking_limit_datetime)
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_unlimited_stock_is_bookable() {
        let now = Utc::now();
        assert!(Stock::new(1, 10.0).is_bookable(now));
    }

    #[test]
    fn test_sold_out_stock_is_not_bookable() {
        let now = Utc::now();
        assert!(!Stock::new(1, 10.0).with_quantity(5, 5).is_bookable(now));
        assert!(Stock::new(1, 10.0).with_quantity(5, 4).is_bookable(now));
    }

    #[test]
    fn test_past_dates_make_stock_unbookable() {
        let now = Utc::now();
        let yesterday = now - Duration::days(1);
        let tomorrow = now + Duration::days(1);

        assert!(!Stock::new(1, 10.0).with_booking_limit(yesterday).is_bookable(now));
        assert!(!Stock::new(1, 10.0).with_beginning(yesterday).is_bookable(now));
        assert!(Stock::new(1, 10.0)
            .with_beginning(tomorrow)
            .with_booking_limit(tomorrow)
            .is_bookable(now));
    }

    #[test]
    fn test_soft_deleted_stock_is_not_bookable() {
        assert!(!Stock::new(1, 10.0).soft_deleted().is_bookable(Utc::now()));
    }

    #[test]
    fn test_offer_bookability() {
        let now = Utc::now();

        let stockless = Offer::new(1, "Book");
        assert!(!stockless.is_bookable(now));

        let offer = Offer::new(2, "Book").with_stock(Stock::new(1, 12.5));
        assert!(offer.is_bookable(now));

        let inactive = offer.clone().with_active(false);
        assert!(!inactive.is_bookable(now));
    }

    #[test]
    fn test_booking_deadline_is_earliest() {
        let now = Utc::now();
        let offer = Offer::new(1, "Show")
            .with_stock(Stock::new(1, 5.0).with_booking_limit(now + Duration::days(3)))
            .with_stock(Stock::new(2, 5.0).with_booking_limit(now + Duration::days(1)))
            .with_stock(Stock::new(3, 5.0));

        assert_eq!(offer.booking_deadline(), Some(now + Duration::days(1)));
    }
}
