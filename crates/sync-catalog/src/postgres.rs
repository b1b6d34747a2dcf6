//! PostgreSQL catalog.
//!
//! Expects the catalog's `offer` and `stock` tables:
//!
//! ```text
//! offer(id BIGINT, name TEXT, is_active BOOLEAN, is_event BOOLEAN,
//!       venue_id BIGINT, last_provider_id BIGINT NULL)
//! stock(id BIGINT, offer_id BIGINT, price NUMERIC, quantity INTEGER NULL,
//!       booked_quantity INTEGER, beginning_datetime TIMESTAMPTZ NULL,
//!       booking_limit_datetime TIMESTAMPTZ NULL, is_soft_deleted BOOLEAN)
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use sync_types::{CatalogSettings, EntityId, Offer, ProviderId, Stock, VenueId};
use tracing::debug;

use crate::error::CatalogError;
use crate::Catalog;

#[derive(Debug, Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(settings: &CatalogSettings) -> Result<Self, CatalogError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(&settings.database_url)
            .await?;
        Ok(Self::new(pool))
    }

    fn offer_from_row(row: &PgRow) -> Result<Offer, CatalogError> {
        Ok(Offer {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            is_active: row.try_get("is_active")?,
            is_event: row.try_get("is_event")?,
            venue_id: row.try_get("venue_id")?,
            last_provider_id: row.try_get("last_provider_id")?,
            stocks: Vec::new(),
        })
    }

    fn stock_from_row(row: &PgRow) -> Result<(EntityId, Stock), CatalogError> {
        let offer_id: i64 = row.try_get("offer_id")?;
        let stock = Stock {
            id: row.try_get("id")?,
            price: row.try_get("price")?,
            quantity: row.try_get("quantity")?,
            booked_quantity: row.try_get("booked_quantity")?,
            beginning_datetime: row.try_get("beginning_datetime")?,
            booking_limit_datetime: row.try_get("booking_limit_datetime")?,
            is_soft_deleted: row.try_get("is_soft_deleted")?,
        };
        Ok((offer_id, stock))
    }

    fn ids_from_rows(rows: Vec<PgRow>) -> Result<Vec<EntityId>, CatalogError> {
        rows.iter()
            .map(|row| row.try_get("id").map_err(CatalogError::from))
            .collect()
    }
}

/// `LIMIT` and `OFFSET` for a page, rejecting pages past what Postgres can address
fn page_bounds(page: usize, page_size: usize) -> Result<(i64, i64), CatalogError> {
    let out_of_range = || CatalogError::PageOutOfRange { page, page_size };
    let limit = i64::try_from(page_size).map_err(|_| out_of_range())?;
    let offset = page
        .checked_mul(page_size)
        .and_then(|n| i64::try_from(n).ok())
        .ok_or_else(out_of_range)?;
    Ok((limit, offset))
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn get_by_ids(&self, ids: &[EntityId]) -> Result<Vec<Offer>, CatalogError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let offer_rows = sqlx::query(
            r#"
            SELECT id, name, is_active, is_event, venue_id, last_provider_id
            FROM offer
            WHERE id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let stock_rows = sqlx::query(
            r#"
            SELECT id, offer_id, price::float8 AS price, quantity::bigint AS quantity,
                   booked_quantity::bigint AS booked_quantity, beginning_datetime,
                   booking_limit_datetime, is_soft_deleted
            FROM stock
            WHERE offer_id = ANY($1)
            ORDER BY offer_id, id
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut stocks: HashMap<EntityId, Vec<Stock>> = HashMap::new();
        for row in &stock_rows {
            let (offer_id, stock) = Self::stock_from_row(row)?;
            stocks.entry(offer_id).or_default().push(stock);
        }

        let mut offers = Vec::with_capacity(offer_rows.len());
        for row in &offer_rows {
            let mut offer = Self::offer_from_row(row)?;
            offer.stocks = stocks.remove(&offer.id).unwrap_or_default();
            offers.push(offer);
        }
        debug!(requested = ids.len(), found = offers.len(), "Loaded offers");
        Ok(offers)
    }

    async fn page_of_active_ids(
        &self,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<EntityId>, CatalogError> {
        let (limit, offset) = page_bounds(page, page_size)?;
        let rows = sqlx::query(
            "SELECT id FROM offer WHERE is_active ORDER BY id LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Self::ids_from_rows(rows)
    }

    async fn page_of_ids_by_venue(
        &self,
        venue_id: VenueId,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<EntityId>, CatalogError> {
        let (limit, offset) = page_bounds(page, page_size)?;
        let rows = sqlx::query(
            "SELECT id FROM offer WHERE venue_id = $1 ORDER BY id LIMIT $2 OFFSET $3",
        )
        .bind(venue_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Self::ids_from_rows(rows)
    }

    async fn page_of_ids_by_venue_and_provider(
        &self,
        venue_id: VenueId,
        provider_id: ProviderId,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<EntityId>, CatalogError> {
        let (limit, offset) = page_bounds(page, page_size)?;
        let rows = sqlx::query(
            r#"
            SELECT id FROM offer
            WHERE venue_id = $1 AND last_provider_id = $2
            ORDER BY id
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(venue_id)
        .bind(provider_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Self::ids_from_rows(rows)
    }

    async fn page_of_ids_by_booking_deadline(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<EntityId>, CatalogError> {
        let (limit, offset) = page_bounds(page, page_size)?;
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT o.id
            FROM offer o
            JOIN stock s ON s.offer_id = o.id
            WHERE s.booking_limit_datetime >= $1
              AND s.booking_limit_datetime < $2
            ORDER BY o.id
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Self::ids_from_rows(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_bounds() {
        assert_eq!(page_bounds(0, 100).unwrap(), (100, 0));
        assert_eq!(page_bounds(3, 100).unwrap(), (100, 300));
    }

    #[test]
    fn test_page_bounds_rejects_overflowing_pages() {
        assert!(matches!(
            page_bounds(usize::MAX, 2),
            Err(CatalogError::PageOutOfRange { page: usize::MAX, page_size: 2 })
        ));
        assert!(page_bounds(usize::MAX / 2, 4).is_err());
        assert!(page_bounds(0, usize::MAX).is_err());
    }

    #[tokio::test]
    #[ignore = "requires OFFER_SYNC_TEST_DATABASE_URL with a seeded catalog"]
    async fn test_pg_catalog_pages_are_id_ordered() {
        let Ok(url) = std::env::var("OFFER_SYNC_TEST_DATABASE_URL") else {
            return;
        };
        let settings = CatalogSettings {
            database_url: url,
            max_connections: 2,
        };
        let catalog = PgCatalog::connect(&settings).await.unwrap();
        let ids = catalog.page_of_active_ids(0, 50).await.unwrap();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);

        let offers = catalog.get_by_ids(&ids).await.unwrap();
        assert!(offers.iter().all(|o| o.is_active));
    }
}
