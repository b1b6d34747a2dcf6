//! Typed access to the pipeline's queues, sets and snapshots.
//!
//! Backends only know string items. `SyncQueues` encodes offer and venue ids
//! as decimal strings and provider jobs as JSON, and groups the bookkeeping
//! the indexer performs after a confirmed index write.

use std::collections::HashMap;
use std::sync::Arc;

use sync_types::{EntityId, InFlightToken, IndexSnapshot, VenueId, VenueProviderJob};
use tracing::warn;

use crate::error::StorageError;
use crate::store::{QueueName, SetName, SyncStore};

/// Lengths and tokens, for status output
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub lengths: Vec<(QueueName, usize)>,
    pub indexed: usize,
    pub in_flight: Vec<InFlightToken>,
}

/// Typed facade over a shared [`SyncStore`]
#[derive(Clone)]
pub struct SyncQueues {
    store: Arc<dyn SyncStore>,
}

fn encode_ids(ids: &[i64]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

fn decode_ids(queue: QueueName, items: Vec<String>) -> Vec<i64> {
    items
        .into_iter()
        .filter_map(|item| match item.parse() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!(queue = %queue, item = %item, "Dropping malformed queue item");
                None
            }
        })
        .collect()
}

impl SyncQueues {
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        Self { store }
    }

    /// The underlying store, for in-flight token operations
    pub fn store(&self) -> &Arc<dyn SyncStore> {
        &self.store
    }

    // ==================== Offer queues ====================

    pub async fn push_offers(&self, queue: QueueName, ids: &[EntityId]) -> Result<usize, StorageError> {
        self.store.push_all(queue, &encode_ids(ids)).await
    }

    pub async fn pop_offers(&self, queue: QueueName, max: usize) -> Result<Vec<EntityId>, StorageError> {
        let items = self.store.pop_many(queue, max).await?;
        Ok(decode_ids(queue, items))
    }

    pub async fn len(&self, queue: QueueName) -> Result<usize, StorageError> {
        self.store.len(queue).await
    }

    pub async fn clear(&self, queue: QueueName) -> Result<usize, StorageError> {
        self.store.clear(queue).await
    }

    // ==================== Venue queue ====================

    pub async fn push_venues(&self, ids: &[VenueId]) -> Result<usize, StorageError> {
        self.store.push_all(QueueName::Venue, &encode_ids(ids)).await
    }

    /// Venue ids at the head of the queue, left in place until processed
    pub async fn peek_venues(&self, max: usize) -> Result<Vec<VenueId>, StorageError> {
        let items = self.store.peek(QueueName::Venue, max).await?;
        Ok(decode_ids(QueueName::Venue, items))
    }

    pub async fn remove_venues(&self, ids: &[VenueId]) -> Result<usize, StorageError> {
        self.store.remove(QueueName::Venue, &encode_ids(ids)).await
    }

    // ==================== Provider jobs ====================

    pub async fn push_provider_jobs(&self, jobs: &[VenueProviderJob]) -> Result<usize, StorageError> {
        let items = jobs
            .iter()
            .map(|job| job.to_item().map_err(StorageError::from))
            .collect::<Result<Vec<_>, _>>()?;
        self.store.push_all(QueueName::VenueProvider, &items).await
    }

    pub async fn pop_provider_jobs(&self, max: usize) -> Result<Vec<VenueProviderJob>, StorageError> {
        let items = self.store.pop_many(QueueName::VenueProvider, max).await?;
        Ok(items
            .into_iter()
            .filter_map(|item| match VenueProviderJob::from_item(&item) {
                Ok(job) => Some(job),
                Err(e) => {
                    warn!(item = %item, error = %e, "Dropping malformed provider job");
                    None
                }
            })
            .collect())
    }

    pub async fn peek_provider_jobs(&self, max: usize) -> Result<Vec<VenueProviderJob>, StorageError> {
        let items = self.store.peek(QueueName::VenueProvider, max).await?;
        Ok(items
            .iter()
            .filter_map(|item| VenueProviderJob::from_item(item).ok())
            .collect())
    }

    // ==================== Indexed set and snapshots ====================

    /// Indexed-set membership of each id, in input order
    pub async fn indexed_flags(&self, ids: &[EntityId]) -> Result<Vec<bool>, StorageError> {
        self.store
            .set_contains_many(SetName::IndexedIds, &encode_ids(ids))
            .await
    }

    pub async fn is_indexed(&self, id: EntityId) -> Result<bool, StorageError> {
        self.store
            .set_contains(SetName::IndexedIds, &id.to_string())
            .await
    }

    pub async fn snapshots(
        &self,
        ids: &[EntityId],
    ) -> Result<HashMap<EntityId, IndexSnapshot>, StorageError> {
        self.store.get_snapshots(ids).await
    }

    pub async fn snapshot(&self, id: EntityId) -> Result<Option<IndexSnapshot>, StorageError> {
        self.store.get_snapshot(id).await
    }

    /// Record offers the index accepted
    pub async fn commit_added(
        &self,
        entries: &[(EntityId, IndexSnapshot)],
    ) -> Result<(), StorageError> {
        if entries.is_empty() {
            return Ok(());
        }
        let ids: Vec<EntityId> = entries.iter().map(|(id, _)| *id).collect();
        self.store.put_snapshots(entries).await?;
        self.store
            .add_to_set(SetName::IndexedIds, &encode_ids(&ids))
            .await
    }

    /// Forget offers the index removed
    pub async fn commit_deleted(&self, ids: &[EntityId]) -> Result<(), StorageError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.store.delete_snapshots(ids).await?;
        self.store
            .remove_from_set(SetName::IndexedIds, &encode_ids(ids))
            .await
    }

    /// Forget every indexed offer, after the index was cleared.
    /// Returns how many offers were marked indexed.
    pub async fn forget_all_indexed(&self) -> Result<usize, StorageError> {
        self.store.clear_snapshots().await?;
        self.store.clear_set(SetName::IndexedIds).await
    }

    pub async fn stats(&self) -> Result<QueueStats, StorageError> {
        let mut lengths = Vec::with_capacity(QueueName::ALL.len());
        for queue in QueueName::ALL {
            lengths.push((queue, self.store.len(queue).await?));
        }
        Ok(QueueStats {
            lengths,
            indexed: self.store.set_len(SetName::IndexedIds).await?,
            in_flight: self.store.list_in_flight().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rocks::RocksStore;
    use tempfile::TempDir;

    fn create_test_queues() -> (SyncQueues, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksStore::open(temp_dir.path()).unwrap();
        (SyncQueues::new(Arc::new(store)), temp_dir)
    }

    #[tokio::test]
    async fn test_offer_ids_roundtrip_through_queue() {
        let (queues, _temp) = create_test_queues();
        queues.push_offers(QueueName::Main, &[5, 3, 8]).await.unwrap();
        assert_eq!(queues.pop_offers(QueueName::Main, 10).await.unwrap(), vec![5, 3, 8]);
    }

    #[tokio::test]
    async fn test_malformed_items_are_dropped() {
        let (queues, _temp) = create_test_queues();
        queues
            .store()
            .push_all(QueueName::Main, &["1".to_string(), "x".to_string()])
            .await
            .unwrap();
        assert_eq!(queues.pop_offers(QueueName::Main, 10).await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_provider_jobs() {
        let (queues, _temp) = create_test_queues();
        let jobs = [VenueProviderJob::new(1, 10, 100), VenueProviderJob::new(2, 10, 200)];
        assert_eq!(queues.push_provider_jobs(&jobs).await.unwrap(), 2);
        assert_eq!(queues.push_provider_jobs(&jobs[..1]).await.unwrap(), 0);
        assert_eq!(queues.peek_provider_jobs(10).await.unwrap().len(), 2);
        assert_eq!(queues.pop_provider_jobs(10).await.unwrap(), jobs.to_vec());
    }

    #[tokio::test]
    async fn test_venues_stay_until_removed() {
        let (queues, _temp) = create_test_queues();
        queues.push_venues(&[1, 2]).await.unwrap();
        assert_eq!(queues.peek_venues(10).await.unwrap(), vec![1, 2]);
        queues.remove_venues(&[1]).await.unwrap();
        assert_eq!(queues.peek_venues(10).await.unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_commit_added_then_deleted() {
        let (queues, _temp) = create_test_queues();
        let snapshot = IndexSnapshot {
            name: "Show".to_string(),
            dates: vec![],
            prices: vec![10.0],
        };
        queues.commit_added(&[(42, snapshot.clone())]).await.unwrap();
        assert!(queues.is_indexed(42).await.unwrap());
        assert_eq!(queues.indexed_flags(&[42, 43]).await.unwrap(), vec![true, false]);
        assert_eq!(queues.snapshot(42).await.unwrap(), Some(snapshot));

        queues.commit_deleted(&[42]).await.unwrap();
        assert!(!queues.is_indexed(42).await.unwrap());
        assert!(queues.snapshot(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_forget_all_indexed() {
        let (queues, _temp) = create_test_queues();
        let snapshot = IndexSnapshot {
            name: "Show".to_string(),
            dates: vec![],
            prices: vec![],
        };
        queues
            .commit_added(&[(1, snapshot.clone()), (2, snapshot)])
            .await
            .unwrap();
        assert_eq!(queues.forget_all_indexed().await.unwrap(), 2);
        assert!(!queues.is_indexed(1).await.unwrap());
        assert!(queues.snapshots(&[1, 2]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stats() {
        let (queues, _temp) = create_test_queues();
        queues.push_offers(QueueName::Error, &[1, 2]).await.unwrap();
        queues.store().reserve_in_flight(3).await.unwrap();

        let stats = queues.stats().await.unwrap();
        assert!(stats.lengths.contains(&(QueueName::Error, 2)));
        assert!(stats.lengths.contains(&(QueueName::Main, 0)));
        assert_eq!(stats.in_flight.len(), 1);
        assert_eq!(stats.indexed, 0);
    }
}
