//! PostgreSQL backend.
//!
//! Shared between the daemon and any worker processes it spawns. Pop-many
//! claims rows with `FOR UPDATE SKIP LOCKED` and deletes them in the same
//! statement, so concurrent poppers never see the same item.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use sync_types::{EntityId, InFlightToken, IndexSnapshot};
use tracing::{debug, info};

use crate::error::StorageError;
use crate::store::{InFlightStore, QueueName, QueueStore, SetName, SnapshotStore};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sync_queue_items (
        seq BIGSERIAL PRIMARY KEY,
        queue TEXT NOT NULL,
        item TEXT NOT NULL,
        enqueued_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (queue, item)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS sync_queue_items_queue_seq
        ON sync_queue_items (queue, seq)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_set_members (
        set_name TEXT NOT NULL,
        member TEXT NOT NULL,
        PRIMARY KEY (set_name, member)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_snapshots (
        entity_id BIGINT PRIMARY KEY,
        payload JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_in_flight (
        job_id BIGINT PRIMARY KEY,
        handle TEXT,
        dispatched_at TIMESTAMPTZ NOT NULL
    )
    "#,
];

/// Queue store on PostgreSQL tables
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the tables exist
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Create the store tables if they are missing
    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Queue store schema ready");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn dedup_in_order(items: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter(|item| seen.insert(item.as_str()))
        .cloned()
        .collect()
}

/// SQL `LIMIT` for a requested count, saturating instead of wrapping
fn limit(max: usize) -> i64 {
    i64::try_from(max).unwrap_or(i64::MAX)
}

#[async_trait]
impl QueueStore for PgStore {
    async fn pop_many(&self, queue: QueueName, max: usize) -> Result<Vec<String>, StorageError> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            DELETE FROM sync_queue_items
            WHERE seq IN (
                SELECT seq
                FROM sync_queue_items
                WHERE queue = $1
                ORDER BY seq
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING seq, item
            "#,
        )
        .bind(queue.as_str())
        .bind(limit(max))
        .fetch_all(&self.pool)
        .await?;

        let mut popped = Vec::with_capacity(rows.len());
        for row in rows {
            let seq: i64 = row.try_get("seq")?;
            let item: String = row.try_get("item")?;
            popped.push((seq, item));
        }
        popped.sort_by_key(|(seq, _)| *seq);

        if !popped.is_empty() {
            debug!(queue = %queue, count = popped.len(), "Popped items");
        }
        Ok(popped.into_iter().map(|(_, item)| item).collect())
    }

    async fn push_all(&self, queue: QueueName, items: &[String]) -> Result<usize, StorageError> {
        if items.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            INSERT INTO sync_queue_items (queue, item)
            SELECT $1, t.item
            FROM UNNEST($2::text[]) WITH ORDINALITY AS t(item, ord)
            ORDER BY t.ord
            ON CONFLICT (queue, item) DO NOTHING
            "#,
        )
        .bind(queue.as_str())
        .bind(dedup_in_order(items))
        .execute(&self.pool)
        .await?;

        let pushed = result.rows_affected() as usize;
        debug!(queue = %queue, pushed, "Pushed items");
        Ok(pushed)
    }

    async fn peek(&self, queue: QueueName, max: usize) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query(
            "SELECT item FROM sync_queue_items WHERE queue = $1 ORDER BY seq LIMIT $2",
        )
        .bind(queue.as_str())
        .bind(limit(max))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get("item").map_err(StorageError::from))
            .collect()
    }

    async fn remove(&self, queue: QueueName, items: &[String]) -> Result<usize, StorageError> {
        let result =
            sqlx::query("DELETE FROM sync_queue_items WHERE queue = $1 AND item = ANY($2)")
                .bind(queue.as_str())
                .bind(items)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn clear(&self, queue: QueueName) -> Result<usize, StorageError> {
        let result = sqlx::query("DELETE FROM sync_queue_items WHERE queue = $1")
            .bind(queue.as_str())
            .execute(&self.pool)
            .await?;
        info!(queue = %queue, cleared = result.rows_affected(), "Cleared queue");
        Ok(result.rows_affected() as usize)
    }

    async fn len(&self, queue: QueueName) -> Result<usize, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM sync_queue_items WHERE queue = $1")
            .bind(queue.as_str())
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as usize)
    }

    async fn add_to_set(&self, set: SetName, members: &[String]) -> Result<(), StorageError> {
        if members.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO sync_set_members (set_name, member)
            SELECT $1, UNNEST($2::text[])
            ON CONFLICT (set_name, member) DO NOTHING
            "#,
        )
        .bind(set.as_str())
        .bind(dedup_in_order(members))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_from_set(
        &self,
        set: SetName,
        members: &[String],
    ) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM sync_set_members WHERE set_name = $1 AND member = ANY($2)")
            .bind(set.as_str())
            .bind(members)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_contains(&self, set: SetName, member: &str) -> Result<bool, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM sync_set_members WHERE set_name = $1 AND member = $2
            ) AS found
            "#,
        )
        .bind(set.as_str())
        .bind(member)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("found")?)
    }

    async fn set_contains_many(
        &self,
        set: SetName,
        members: &[String],
    ) -> Result<Vec<bool>, StorageError> {
        let rows = sqlx::query(
            "SELECT member FROM sync_set_members WHERE set_name = $1 AND member = ANY($2)",
        )
        .bind(set.as_str())
        .bind(members)
        .fetch_all(&self.pool)
        .await?;

        let mut present = HashSet::with_capacity(rows.len());
        for row in rows {
            present.insert(row.try_get::<String, _>("member")?);
        }
        Ok(members.iter().map(|m| present.contains(m)).collect())
    }

    async fn clear_set(&self, set: SetName) -> Result<usize, StorageError> {
        let result = sqlx::query("DELETE FROM sync_set_members WHERE set_name = $1")
            .bind(set.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn set_len(&self, set: SetName) -> Result<usize, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM sync_set_members WHERE set_name = $1")
            .bind(set.as_str())
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as usize)
    }
}

#[async_trait]
impl SnapshotStore for PgStore {
    async fn get_snapshot(&self, id: EntityId) -> Result<Option<IndexSnapshot>, StorageError> {
        let row = sqlx::query("SELECT payload FROM sync_snapshots WHERE entity_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let payload: serde_json::Value = row.try_get("payload")?;
                Ok(Some(serde_json::from_value(payload)?))
            }
            None => Ok(None),
        }
    }

    async fn put_snapshot(
        &self,
        id: EntityId,
        snapshot: &IndexSnapshot,
    ) -> Result<(), StorageError> {
        self.put_snapshots(&[(id, snapshot.clone())]).await
    }

    async fn delete_snapshot(&self, id: EntityId) -> Result<(), StorageError> {
        self.delete_snapshots(&[id]).await
    }

    async fn get_snapshots(
        &self,
        ids: &[EntityId],
    ) -> Result<HashMap<EntityId, IndexSnapshot>, StorageError> {
        let rows = sqlx::query(
            "SELECT entity_id, payload FROM sync_snapshots WHERE entity_id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut found = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("entity_id")?;
            let payload: serde_json::Value = row.try_get("payload")?;
            found.insert(id, serde_json::from_value(payload)?);
        }
        Ok(found)
    }

    async fn put_snapshots(
        &self,
        entries: &[(EntityId, IndexSnapshot)],
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        for (id, snapshot) in entries {
            sqlx::query(
                r#"
                INSERT INTO sync_snapshots (entity_id, payload, updated_at)
                VALUES ($1, $2, NOW())
                ON CONFLICT (entity_id)
                DO UPDATE SET payload = EXCLUDED.payload, updated_at = NOW()
                "#,
            )
            .bind(*id)
            .bind(serde_json::to_value(snapshot)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_snapshots(&self, ids: &[EntityId]) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM sync_snapshots WHERE entity_id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_snapshots(&self) -> Result<usize, StorageError> {
        let result = sqlx::query("DELETE FROM sync_snapshots")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}

#[async_trait]
impl InFlightStore for PgStore {
    async fn reserve_in_flight(&self, job_id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO sync_in_flight (job_id, handle, dispatched_at)
            VALUES ($1, NULL, NOW())
            ON CONFLICT (job_id) DO NOTHING
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_in_flight_handle(
        &self,
        job_id: i64,
        handle: &str,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query("UPDATE sync_in_flight SET handle = $2 WHERE job_id = $1")
            .bind(job_id)
            .bind(handle)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_in_flight(&self, job_id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM sync_in_flight WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_in_flight_if(
        &self,
        job_id: i64,
        handle: &str,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM sync_in_flight WHERE job_id = $1 AND handle = $2")
            .bind(job_id)
            .bind(handle)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn in_flight_count(&self) -> Result<usize, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM sync_in_flight")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as usize)
    }

    async fn list_in_flight(&self) -> Result<Vec<InFlightToken>, StorageError> {
        let rows =
            sqlx::query("SELECT job_id, handle, dispatched_at FROM sync_in_flight ORDER BY job_id")
                .fetch_all(&self.pool)
                .await?;

        let mut tokens = Vec::with_capacity(rows.len());
        for row in rows {
            let dispatched_at: DateTime<Utc> = row.try_get("dispatched_at")?;
            tokens.push(InFlightToken {
                job_id: row.try_get("job_id")?,
                handle: row.try_get("handle")?,
                dispatched_at,
            });
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_in_order() {
        let items: Vec<String> = ["3", "1", "3", "2", "1"].iter().map(|s| s.to_string()).collect();
        assert_eq!(dedup_in_order(&items), vec!["3", "1", "2"]);
    }

    #[test]
    fn test_limit_saturates() {
        assert_eq!(limit(10), 10);
        assert_eq!(limit(usize::MAX), i64::MAX);
    }

    async fn test_store() -> Option<PgStore> {
        let url = std::env::var("OFFER_SYNC_TEST_DATABASE_URL").ok()?;
        let store = PgStore::connect(&url, 4).await.unwrap();
        for queue in QueueName::ALL {
            store.clear(queue).await.unwrap();
        }
        Some(store)
    }

    #[tokio::test]
    #[ignore = "requires OFFER_SYNC_TEST_DATABASE_URL"]
    async fn test_pg_push_pop_in_order() {
        let Some(store) = test_store().await else {
            return;
        };
        let items: Vec<String> = (1..=5).map(|i| i.to_string()).collect();
        assert_eq!(store.push_all(QueueName::Main, &items).await.unwrap(), 5);
        assert_eq!(store.push_all(QueueName::Main, &items[..2]).await.unwrap(), 0);
        assert_eq!(store.pop_many(QueueName::Main, 3).await.unwrap(), items[..3].to_vec());
        assert_eq!(store.len(QueueName::Main).await.unwrap(), 2);
    }

    #[tokio::test]
    #[ignore = "requires OFFER_SYNC_TEST_DATABASE_URL"]
    async fn test_pg_concurrent_pops_are_disjoint() {
        let Some(store) = test_store().await else {
            return;
        };
        let items: Vec<String> = (1..=20).map(|i| i.to_string()).collect();
        store.push_all(QueueName::Error, &items).await.unwrap();

        let (a, b) = tokio::join!(
            store.pop_many(QueueName::Error, 10),
            store.pop_many(QueueName::Error, 10)
        );
        let mut popped = a.unwrap();
        popped.extend(b.unwrap());
        popped.sort_by_key(|s| s.parse::<i64>().unwrap());
        assert_eq!(popped, items);
    }

    #[tokio::test]
    #[ignore = "requires OFFER_SYNC_TEST_DATABASE_URL"]
    async fn test_pg_in_flight_lifecycle() {
        let Some(store) = test_store().await else {
            return;
        };
        store.release_in_flight(99).await.unwrap();
        assert!(store.reserve_in_flight(99).await.unwrap());
        assert!(!store.reserve_in_flight(99).await.unwrap());
        assert!(store.set_in_flight_handle(99, "pid:1").await.unwrap());
        assert!(store.release_in_flight(99).await.unwrap());
        assert!(!store.set_in_flight_handle(99, "pid:1").await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires OFFER_SYNC_TEST_DATABASE_URL"]
    async fn test_pg_conditional_release_spares_newer_token() {
        let Some(store) = test_store().await else {
            return;
        };
        store.release_in_flight(98).await.unwrap();
        store.reserve_in_flight(98).await.unwrap();
        store.set_in_flight_handle(98, "pid:2").await.unwrap();
        assert!(!store.release_in_flight_if(98, "pid:1").await.unwrap());
        assert!(store.release_in_flight_if(98, "pid:2").await.unwrap());
    }
}
