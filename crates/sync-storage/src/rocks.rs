//! RocksDB backend.
//!
//! The database is owned by a single process. Every queue and token
//! mutation runs under one store-level mutex and commits through a single
//! `WriteBatch`, which makes pop-many atomic with respect to every other
//! caller sharing the store.
//!
//! Queue lengths and the in-flight count are kept as counters in the meta
//! column family, written in the same batch as the items they count.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use sync_types::{EntityId, InFlightToken, IndexSnapshot};
use tracing::{debug, info};

use crate::column_families::{
    build_cf_descriptors, ALL_CF_NAMES, CF_IN_FLIGHT, CF_META, CF_QUEUES, CF_QUEUE_INDEX, CF_SETS,
    CF_SNAPSHOTS,
};
use crate::error::StorageError;
use crate::keys::{
    queue_len_key, InFlightKey, QueueIndexKey, QueueKey, SetMemberKey, SnapshotKey,
    IN_FLIGHT_COUNT_KEY, QUEUE_SEQUENCE_KEY,
};
use crate::store::{InFlightStore, QueueName, QueueStore, SetName, SnapshotStore};

/// Queue store on an embedded RocksDB instance
pub struct RocksStore {
    db: DB,
    /// Next queue sequence, guarded together with every queue mutation
    write_lock: Mutex<u64>,
}

impl RocksStore {
    /// Open the store at the given path, creating it if necessary.
    ///
    /// Fails with [`StorageError::Locked`] while another process (or another
    /// handle in this process) has the store open.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening queue store at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let db = DB::open_cf_descriptors(&db_opts, path, build_cf_descriptors())
            .map_err(|e| open_error(path, e))?;
        let next_sequence = {
            let cf = db
                .cf_handle(CF_META)
                .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_META.to_string()))?;
            decode_u64(db.get_cf(&cf, QUEUE_SEQUENCE_KEY)?, "queue sequence")?
        };

        let store = Self {
            db,
            write_lock: Mutex::new(next_sequence),
        };
        store.ensure_counters()?;
        Ok(store)
    }

    /// Write any missing counter from a full scan. Only stores created
    /// before counters existed need this.
    fn ensure_counters(&self) -> Result<(), StorageError> {
        let meta_cf = self.cf(CF_META)?;
        let mut batch = WriteBatch::default();
        let mut rebuilt = 0;

        for queue in QueueName::ALL {
            let key = queue_len_key(queue);
            if self.db.get_cf(meta_cf, &key)?.is_none() {
                let len = self
                    .scan_prefix(CF_QUEUES, &QueueKey::prefix(queue), usize::MAX)?
                    .len();
                batch.put_cf(meta_cf, key, (len as u64).to_be_bytes());
                rebuilt += 1;
            }
        }
        if self.db.get_cf(meta_cf, IN_FLIGHT_COUNT_KEY)?.is_none() {
            let count = self
                .scan_prefix(CF_IN_FLIGHT, &InFlightKey::prefix(), usize::MAX)?
                .len();
            batch.put_cf(meta_cf, IN_FLIGHT_COUNT_KEY, (count as u64).to_be_bytes());
            rebuilt += 1;
        }

        if rebuilt > 0 {
            self.db.write(batch)?;
            debug!(rebuilt, "Rebuilt store counters");
        }
        Ok(())
    }

    fn read_counter(&self, key: &[u8]) -> Result<u64, StorageError> {
        let cf = self.cf(CF_META)?;
        decode_u64(self.db.get_cf(cf, key)?, "counter")
    }

    /// Stage `key = current + added - removed` into `batch`
    fn stage_counter(
        &self,
        batch: &mut WriteBatch,
        key: &[u8],
        added: usize,
        removed: usize,
    ) -> Result<(), StorageError> {
        let value = self
            .read_counter(key)?
            .saturating_add(added as u64)
            .saturating_sub(removed as u64);
        batch.put_cf(self.cf(CF_META)?, key, value.to_be_bytes());
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, u64>, StorageError> {
        self.write_lock.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Keys and values under a prefix, in key order, up to `limit` entries
    #[allow(clippy::type_complexity)]
    fn scan_prefix(
        &self,
        cf_name: &str,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, StorageError> {
        let cf = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));

        let mut results = Vec::new();
        for item in iter {
            if results.len() >= limit {
                break;
            }
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            results.push((key, value));
        }
        Ok(results)
    }

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        for cf_name in ALL_CF_NAMES {
            if let Some(cf) = self.db.cf_handle(cf_name) {
                self.db.flush_cf(&cf)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStore for RocksStore {
    async fn pop_many(&self, queue: QueueName, max: usize) -> Result<Vec<String>, StorageError> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let _guard = self.lock()?;
        let queues_cf = self.cf(CF_QUEUES)?;
        let index_cf = self.cf(CF_QUEUE_INDEX)?;

        let entries = self.scan_prefix(CF_QUEUES, &QueueKey::prefix(queue), max)?;
        let mut batch = WriteBatch::default();
        let mut items = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let item = String::from_utf8(value.into_vec())
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            batch.delete_cf(queues_cf, &key);
            batch.delete_cf(index_cf, QueueIndexKey::new(queue, &item).to_bytes());
            items.push(item);
        }

        if !items.is_empty() {
            self.stage_counter(&mut batch, &queue_len_key(queue), 0, items.len())?;
            self.db.write(batch)?;
            debug!(queue = %queue, count = items.len(), "Popped items");
        }
        Ok(items)
    }

    async fn push_all(&self, queue: QueueName, items: &[String]) -> Result<usize, StorageError> {
        if items.is_empty() {
            return Ok(0);
        }
        let mut next_sequence = self.lock()?;
        let queues_cf = self.cf(CF_QUEUES)?;
        let index_cf = self.cf(CF_QUEUE_INDEX)?;
        let meta_cf = self.cf(CF_META)?;

        let mut batch = WriteBatch::default();
        let mut staged = std::collections::HashSet::new();
        let mut sequence = *next_sequence;
        for item in items {
            let index_key = QueueIndexKey::new(queue, item).to_bytes();
            if staged.contains(item.as_str()) || self.db.get_cf(index_cf, &index_key)?.is_some() {
                continue;
            }
            batch.put_cf(queues_cf, QueueKey::new(queue, sequence).to_bytes(), item.as_bytes());
            batch.put_cf(index_cf, index_key, sequence.to_be_bytes());
            staged.insert(item.as_str());
            sequence += 1;
        }

        let pushed = staged.len();
        if pushed > 0 {
            batch.put_cf(meta_cf, QUEUE_SEQUENCE_KEY, sequence.to_be_bytes());
            self.stage_counter(&mut batch, &queue_len_key(queue), pushed, 0)?;
            self.db.write(batch)?;
            *next_sequence = sequence;
            debug!(queue = %queue, pushed, "Pushed items");
        }
        Ok(pushed)
    }

    async fn peek(&self, queue: QueueName, max: usize) -> Result<Vec<String>, StorageError> {
        self.scan_prefix(CF_QUEUES, &QueueKey::prefix(queue), max)?
            .into_iter()
            .map(|(_, value)| {
                String::from_utf8(value.into_vec())
                    .map_err(|e| StorageError::Serialization(e.to_string()))
            })
            .collect()
    }

    async fn remove(&self, queue: QueueName, items: &[String]) -> Result<usize, StorageError> {
        let _guard = self.lock()?;
        let queues_cf = self.cf(CF_QUEUES)?;
        let index_cf = self.cf(CF_QUEUE_INDEX)?;

        let mut batch = WriteBatch::default();
        let mut removed = 0;
        for item in items {
            let index_key = QueueIndexKey::new(queue, item).to_bytes();
            let Some(raw) = self.db.get_cf(index_cf, &index_key)? else {
                continue;
            };
            let raw: [u8; 8] = raw.as_slice().try_into().map_err(|_| {
                StorageError::Serialization(format!("bad sequence for item {}", item))
            })?;
            batch.delete_cf(queues_cf, QueueKey::new(queue, u64::from_be_bytes(raw)).to_bytes());
            batch.delete_cf(index_cf, index_key);
            removed += 1;
        }

        if removed > 0 {
            self.stage_counter(&mut batch, &queue_len_key(queue), 0, removed)?;
            self.db.write(batch)?;
        }
        Ok(removed)
    }

    async fn clear(&self, queue: QueueName) -> Result<usize, StorageError> {
        let _guard = self.lock()?;
        let queues_cf = self.cf(CF_QUEUES)?;
        let index_cf = self.cf(CF_QUEUE_INDEX)?;

        let mut batch = WriteBatch::default();
        let entries = self.scan_prefix(CF_QUEUES, &QueueKey::prefix(queue), usize::MAX)?;
        for (key, _) in &entries {
            batch.delete_cf(queues_cf, key);
        }
        for (key, _) in self.scan_prefix(CF_QUEUE_INDEX, &QueueIndexKey::prefix(queue), usize::MAX)?
        {
            batch.delete_cf(index_cf, key);
        }
        batch.put_cf(self.cf(CF_META)?, queue_len_key(queue), 0u64.to_be_bytes());

        self.db.write(batch)?;
        info!(queue = %queue, cleared = entries.len(), "Cleared queue");
        Ok(entries.len())
    }

    async fn len(&self, queue: QueueName) -> Result<usize, StorageError> {
        Ok(saturating_usize(self.read_counter(&queue_len_key(queue))?))
    }

    async fn add_to_set(&self, set: SetName, members: &[String]) -> Result<(), StorageError> {
        let cf = self.cf(CF_SETS)?;
        let mut batch = WriteBatch::default();
        for member in members {
            batch.put_cf(cf, SetMemberKey::new(set, member).to_bytes(), b"");
        }
        self.db.write(batch)?;
        Ok(())
    }

    async fn remove_from_set(
        &self,
        set: SetName,
        members: &[String],
    ) -> Result<(), StorageError> {
        let cf = self.cf(CF_SETS)?;
        let mut batch = WriteBatch::default();
        for member in members {
            batch.delete_cf(cf, SetMemberKey::new(set, member).to_bytes());
        }
        self.db.write(batch)?;
        Ok(())
    }

    async fn set_contains(&self, set: SetName, member: &str) -> Result<bool, StorageError> {
        let cf = self.cf(CF_SETS)?;
        Ok(self
            .db
            .get_cf(cf, SetMemberKey::new(set, member).to_bytes())?
            .is_some())
    }

    async fn set_contains_many(
        &self,
        set: SetName,
        members: &[String],
    ) -> Result<Vec<bool>, StorageError> {
        let cf = self.cf(CF_SETS)?;
        let keys: Vec<Vec<u8>> = members
            .iter()
            .map(|m| SetMemberKey::new(set, m).to_bytes())
            .collect();
        self.db
            .multi_get_cf(keys.iter().map(|k| (cf, k.as_slice())))
            .into_iter()
            .map(|found| found.map(|v| v.is_some()).map_err(StorageError::from))
            .collect()
    }

    async fn set_len(&self, set: SetName) -> Result<usize, StorageError> {
        Ok(self
            .scan_prefix(CF_SETS, &SetMemberKey::prefix(set), usize::MAX)?
            .len())
    }

    async fn clear_set(&self, set: SetName) -> Result<usize, StorageError> {
        let cf = self.cf(CF_SETS)?;
        let entries = self.scan_prefix(CF_SETS, &SetMemberKey::prefix(set), usize::MAX)?;
        let mut batch = WriteBatch::default();
        for (key, _) in &entries {
            batch.delete_cf(cf, key);
        }
        self.db.write(batch)?;
        Ok(entries.len())
    }
}

#[async_trait]
impl SnapshotStore for RocksStore {
    async fn get_snapshot(&self, id: EntityId) -> Result<Option<IndexSnapshot>, StorageError> {
        let cf = self.cf(CF_SNAPSHOTS)?;
        match self.db.get_cf(cf, SnapshotKey::new(id).to_bytes())? {
            Some(bytes) => Ok(Some(IndexSnapshot::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put_snapshot(
        &self,
        id: EntityId,
        snapshot: &IndexSnapshot,
    ) -> Result<(), StorageError> {
        let cf = self.cf(CF_SNAPSHOTS)?;
        self.db
            .put_cf(cf, SnapshotKey::new(id).to_bytes(), snapshot.to_bytes()?)?;
        Ok(())
    }

    async fn delete_snapshot(&self, id: EntityId) -> Result<(), StorageError> {
        let cf = self.cf(CF_SNAPSHOTS)?;
        self.db.delete_cf(cf, SnapshotKey::new(id).to_bytes())?;
        Ok(())
    }

    async fn get_snapshots(
        &self,
        ids: &[EntityId],
    ) -> Result<HashMap<EntityId, IndexSnapshot>, StorageError> {
        let cf = self.cf(CF_SNAPSHOTS)?;
        let keys: Vec<Vec<u8>> = ids.iter().map(|id| SnapshotKey::new(*id).to_bytes()).collect();
        let values = self.db.multi_get_cf(keys.iter().map(|k| (cf, k.as_slice())));

        let mut found = HashMap::new();
        for (id, value) in ids.iter().zip(values) {
            if let Some(bytes) = value? {
                found.insert(*id, IndexSnapshot::from_bytes(&bytes)?);
            }
        }
        Ok(found)
    }

    async fn put_snapshots(
        &self,
        entries: &[(EntityId, IndexSnapshot)],
    ) -> Result<(), StorageError> {
        let cf = self.cf(CF_SNAPSHOTS)?;
        let mut batch = WriteBatch::default();
        for (id, snapshot) in entries {
            batch.put_cf(cf, SnapshotKey::new(*id).to_bytes(), snapshot.to_bytes()?);
        }
        self.db.write(batch)?;
        Ok(())
    }

    async fn delete_snapshots(&self, ids: &[EntityId]) -> Result<(), StorageError> {
        let cf = self.cf(CF_SNAPSHOTS)?;
        let mut batch = WriteBatch::default();
        for id in ids {
            batch.delete_cf(cf, SnapshotKey::new(*id).to_bytes());
        }
        self.db.write(batch)?;
        Ok(())
    }

    async fn clear_snapshots(&self) -> Result<usize, StorageError> {
        let cf = self.cf(CF_SNAPSHOTS)?;
        let entries = self.scan_prefix(CF_SNAPSHOTS, &SnapshotKey::prefix(), usize::MAX)?;
        let mut batch = WriteBatch::default();
        for (key, _) in &entries {
            batch.delete_cf(cf, key);
        }
        self.db.write(batch)?;
        Ok(entries.len())
    }
}

#[async_trait]
impl InFlightStore for RocksStore {
    async fn reserve_in_flight(&self, job_id: i64) -> Result<bool, StorageError> {
        let _guard = self.lock()?;
        let cf = self.cf(CF_IN_FLIGHT)?;
        let key = InFlightKey::new(job_id).to_bytes();
        if self.db.get_cf(cf, &key)?.is_some() {
            return Ok(false);
        }
        let mut batch = WriteBatch::default();
        batch.put_cf(cf, key, InFlightToken::pending(job_id).to_bytes()?);
        self.stage_counter(&mut batch, IN_FLIGHT_COUNT_KEY, 1, 0)?;
        self.db.write(batch)?;
        Ok(true)
    }

    async fn set_in_flight_handle(
        &self,
        job_id: i64,
        handle: &str,
    ) -> Result<bool, StorageError> {
        let _guard = self.lock()?;
        let cf = self.cf(CF_IN_FLIGHT)?;
        let key = InFlightKey::new(job_id).to_bytes();
        let Some(bytes) = self.db.get_cf(cf, &key)? else {
            return Ok(false);
        };
        let token = InFlightToken::from_bytes(&bytes)?.with_handle(handle);
        self.db.put_cf(cf, key, token.to_bytes()?)?;
        Ok(true)
    }

    async fn release_in_flight(&self, job_id: i64) -> Result<bool, StorageError> {
        let _guard = self.lock()?;
        let cf = self.cf(CF_IN_FLIGHT)?;
        let key = InFlightKey::new(job_id).to_bytes();
        if self.db.get_cf(cf, &key)?.is_none() {
            return Ok(false);
        }
        self.delete_token(key)?;
        Ok(true)
    }

    async fn release_in_flight_if(
        &self,
        job_id: i64,
        handle: &str,
    ) -> Result<bool, StorageError> {
        let _guard = self.lock()?;
        let cf = self.cf(CF_IN_FLIGHT)?;
        let key = InFlightKey::new(job_id).to_bytes();
        let Some(bytes) = self.db.get_cf(cf, &key)? else {
            return Ok(false);
        };
        if InFlightToken::from_bytes(&bytes)?.handle.as_deref() != Some(handle) {
            return Ok(false);
        }
        self.delete_token(key)?;
        Ok(true)
    }

    async fn in_flight_count(&self) -> Result<usize, StorageError> {
        Ok(saturating_usize(self.read_counter(IN_FLIGHT_COUNT_KEY)?))
    }

    async fn list_in_flight(&self) -> Result<Vec<InFlightToken>, StorageError> {
        self.scan_prefix(CF_IN_FLIGHT, &InFlightKey::prefix(), usize::MAX)?
            .into_iter()
            .map(|(_, value)| InFlightToken::from_bytes(&value).map_err(StorageError::from))
            .collect()
    }
}

impl RocksStore {
    /// Delete an existing token. Caller holds the write lock.
    fn delete_token(&self, key: Vec<u8>) -> Result<(), StorageError> {
        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf(CF_IN_FLIGHT)?, key);
        self.stage_counter(&mut batch, IN_FLIGHT_COUNT_KEY, 0, 1)?;
        self.db.write(batch)?;
        Ok(())
    }
}

/// RocksDB reports a held LOCK file as an I/O error on the lock file
fn open_error(path: &Path, err: rocksdb::Error) -> StorageError {
    if err.to_string().to_lowercase().contains("lock") {
        StorageError::Locked(path.display().to_string())
    } else {
        StorageError::RocksDb(err)
    }
}

fn decode_u64(bytes: Option<Vec<u8>>, what: &str) -> Result<u64, StorageError> {
    match bytes {
        Some(bytes) => {
            let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                StorageError::Serialization(format!("{} is not 8 bytes", what))
            })?;
            Ok(u64::from_be_bytes(raw))
        }
        None => Ok(0),
    }
}

fn saturating_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksStore::open(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    fn items(ids: &[i64]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn test_open_creates_column_families() {
        let (store, _temp) = create_test_store();
        for cf_name in ALL_CF_NAMES {
            assert!(
                store.db.cf_handle(cf_name).is_some(),
                "CF {} should exist",
                cf_name
            );
        }
    }

    #[tokio::test]
    async fn test_push_pop_preserves_order() {
        let (store, _temp) = create_test_store();
        store.push_all(QueueName::Main, &items(&[3, 1, 2])).await.unwrap();

        assert_eq!(store.pop_many(QueueName::Main, 2).await.unwrap(), items(&[3, 1]));
        assert_eq!(store.pop_many(QueueName::Main, 2).await.unwrap(), items(&[2]));
        assert!(store.pop_many(QueueName::Main, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_push_skips_queued_items() {
        let (store, _temp) = create_test_store();
        assert_eq!(store.push_all(QueueName::Error, &items(&[1, 2, 2])).await.unwrap(), 2);
        assert_eq!(store.push_all(QueueName::Error, &items(&[2, 3])).await.unwrap(), 1);
        assert_eq!(store.len(QueueName::Error).await.unwrap(), 3);
        assert_eq!(store.peek(QueueName::Error, 10).await.unwrap(), items(&[1, 2, 3]));
    }

    #[tokio::test]
    async fn test_item_can_be_requeued_after_pop() {
        let (store, _temp) = create_test_store();
        store.push_all(QueueName::Main, &items(&[1])).await.unwrap();
        store.pop_many(QueueName::Main, 1).await.unwrap();
        assert_eq!(store.push_all(QueueName::Main, &items(&[1])).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_queues_are_isolated() {
        let (store, _temp) = create_test_store();
        store.push_all(QueueName::Venue, &items(&[1])).await.unwrap();
        store.push_all(QueueName::VenueProvider, &items(&[2])).await.unwrap();
        assert_eq!(store.len(QueueName::Venue).await.unwrap(), 1);
        assert_eq!(store.pop_many(QueueName::Venue, 10).await.unwrap(), items(&[1]));
        assert_eq!(store.len(QueueName::VenueProvider).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let (store, _temp) = create_test_store();
        store.push_all(QueueName::Venue, &items(&[1, 2, 3])).await.unwrap();
        assert_eq!(store.remove(QueueName::Venue, &items(&[2, 9])).await.unwrap(), 1);
        assert_eq!(store.peek(QueueName::Venue, 10).await.unwrap(), items(&[1, 3]));
        assert_eq!(store.clear(QueueName::Venue).await.unwrap(), 2);
        assert_eq!(store.len(QueueName::Venue).await.unwrap(), 0);
        assert_eq!(store.push_all(QueueName::Venue, &items(&[1])).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sequence_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = RocksStore::open(temp_dir.path()).unwrap();
            store.push_all(QueueName::Main, &items(&[1, 2])).await.unwrap();
        }
        let store = RocksStore::open(temp_dir.path()).unwrap();
        store.push_all(QueueName::Main, &items(&[3])).await.unwrap();
        assert_eq!(store.pop_many(QueueName::Main, 10).await.unwrap(), items(&[1, 2, 3]));
    }

    #[tokio::test]
    async fn test_concurrent_pops_are_disjoint() {
        let (store, _temp) = create_test_store();
        let store = Arc::new(store);
        let all: Vec<i64> = (1..=10).collect();
        store.push_all(QueueName::Main, &items(&all)).await.unwrap();

        let a = {
            let store = store.clone();
            tokio::spawn(async move { store.pop_many(QueueName::Main, 5).await.unwrap() })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move { store.pop_many(QueueName::Main, 5).await.unwrap() })
        };
        let mut popped = a.await.unwrap();
        popped.extend(b.await.unwrap());
        popped.sort_by_key(|s| s.parse::<i64>().unwrap());
        assert_eq!(popped, items(&all));
    }

    #[tokio::test]
    async fn test_set_membership() {
        let (store, _temp) = create_test_store();
        store.add_to_set(SetName::IndexedIds, &items(&[1, 2])).await.unwrap();
        assert!(store.set_contains(SetName::IndexedIds, "1").await.unwrap());
        assert_eq!(
            store
                .set_contains_many(SetName::IndexedIds, &items(&[2, 3]))
                .await
                .unwrap(),
            vec![true, false]
        );

        store.remove_from_set(SetName::IndexedIds, &items(&[1])).await.unwrap();
        assert!(!store.set_contains(SetName::IndexedIds, "1").await.unwrap());
        assert_eq!(store.set_len(SetName::IndexedIds).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let (store, _temp) = create_test_store();
        let snapshot = IndexSnapshot {
            name: "Show".to_string(),
            dates: vec![],
            prices: vec![10.0],
        };
        assert!(store.get_snapshot(42).await.unwrap().is_none());

        store.put_snapshots(&[(42, snapshot.clone())]).await.unwrap();
        assert_eq!(store.get_snapshot(42).await.unwrap(), Some(snapshot.clone()));
        assert!(store.snapshot_exists(42).await.unwrap());

        let found = store.get_snapshots(&[42, 43]).await.unwrap();
        assert_eq!(found.len(), 1);

        store.delete_snapshots(&[42]).await.unwrap();
        assert!(!store.snapshot_exists(42).await.unwrap());
    }

    #[tokio::test]
    async fn test_in_flight_lifecycle() {
        let (store, _temp) = create_test_store();
        assert!(store.reserve_in_flight(7).await.unwrap());
        assert!(!store.reserve_in_flight(7).await.unwrap());
        assert_eq!(store.in_flight_count().await.unwrap(), 1);

        assert!(store.set_in_flight_handle(7, "task:1").await.unwrap());
        let tokens = store.list_in_flight().await.unwrap();
        assert_eq!(tokens[0].handle.as_deref(), Some("task:1"));

        assert!(store.release_in_flight(7).await.unwrap());
        assert!(!store.release_in_flight(7).await.unwrap());
        assert!(!store.set_in_flight_handle(7, "task:2").await.unwrap());
        assert_eq!(store.in_flight_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_conditional_release_spares_newer_token() {
        let (store, _temp) = create_test_store();
        store.reserve_in_flight(9).await.unwrap();
        store.set_in_flight_handle(9, "pid:1").await.unwrap();
        assert!(store.release_in_flight(9).await.unwrap());

        store.reserve_in_flight(9).await.unwrap();
        store.set_in_flight_handle(9, "pid:2").await.unwrap();
        assert!(!store.release_in_flight_if(9, "pid:1").await.unwrap());
        assert_eq!(store.in_flight_count().await.unwrap(), 1);

        assert!(store.release_in_flight_if(9, "pid:2").await.unwrap());
        assert_eq!(store.in_flight_count().await.unwrap(), 0);
        assert!(!store.release_in_flight_if(9, "pid:2").await.unwrap());
    }

    #[tokio::test]
    async fn test_conditional_release_skips_pending_token() {
        let (store, _temp) = create_test_store();
        store.reserve_in_flight(5).await.unwrap();
        assert!(!store.release_in_flight_if(5, "pid:1").await.unwrap());
        assert_eq!(store.in_flight_count().await.unwrap(), 1);
    }

    #[test]
    fn test_second_open_reports_locked_store() {
        let (_store, temp) = create_test_store();
        let err = RocksStore::open(temp.path()).err().unwrap();
        assert!(matches!(err, StorageError::Locked(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_counters_track_every_mutation() {
        let (store, _temp) = create_test_store();
        store.push_all(QueueName::Main, &items(&[1, 2, 3, 4, 3])).await.unwrap();
        assert_eq!(store.len(QueueName::Main).await.unwrap(), 4);

        store.pop_many(QueueName::Main, 1).await.unwrap();
        store.remove(QueueName::Main, &items(&[2, 9])).await.unwrap();
        assert_eq!(store.len(QueueName::Main).await.unwrap(), 2);
        assert_eq!(store.len(QueueName::Error).await.unwrap(), 0);

        store.clear(QueueName::Main).await.unwrap();
        assert_eq!(store.len(QueueName::Main).await.unwrap(), 0);
        store.clear(QueueName::Main).await.unwrap();
        assert_eq!(store.len(QueueName::Main).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_counters_are_rebuilt_on_open() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = RocksStore::open(temp_dir.path()).unwrap();
            store.push_all(QueueName::Venue, &items(&[1, 2, 3])).await.unwrap();
            store.reserve_in_flight(1).await.unwrap();
            let meta = store.cf(CF_META).unwrap();
            store.db.delete_cf(meta, queue_len_key(QueueName::Venue)).unwrap();
            store.db.delete_cf(meta, IN_FLIGHT_COUNT_KEY).unwrap();
        }
        let store = RocksStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.len(QueueName::Venue).await.unwrap(), 3);
        assert_eq!(store.in_flight_count().await.unwrap(), 1);
    }
}
