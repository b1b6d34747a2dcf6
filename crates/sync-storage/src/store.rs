//! Store interfaces shared by every backend.
//!
//! Queues are ordered collections of string items in which an item appears
//! at most once. Sets hold string members. Snapshots and in-flight tokens
//! are keyed values. Backends must make [`QueueStore::pop_many`] atomic:
//! concurrent callers never receive the same item and no item is lost.

use std::collections::HashMap;

use async_trait::async_trait;
use sync_types::{EntityId, InFlightToken, IndexSnapshot};

use crate::error::StorageError;

/// Named queues of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    /// Offers changed by direct mutation events
    Main,
    /// Offers whose last index call failed
    Error,
    /// Venues to resynchronize
    Venue,
    /// Venue provider jobs waiting for a worker
    VenueProvider,
}

impl QueueName {
    pub const ALL: [QueueName; 4] = [
        QueueName::Main,
        QueueName::Error,
        QueueName::Venue,
        QueueName::VenueProvider,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Main => "main",
            QueueName::Error => "error",
            QueueName::Venue => "venue",
            QueueName::VenueProvider => "venue-provider",
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named sets of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetName {
    /// Offers currently present in the search index
    IndexedIds,
}

impl SetName {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetName::IndexedIds => "indexed-ids",
        }
    }
}

impl std::fmt::Display for SetName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered, deduplicated queues and sets.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Atomically remove and return up to `max` items from the head.
    async fn pop_many(&self, queue: QueueName, max: usize) -> Result<Vec<String>, StorageError>;

    /// Append items at the tail. Items already queued are left where they
    /// are. Returns how many items were newly queued.
    async fn push_all(&self, queue: QueueName, items: &[String]) -> Result<usize, StorageError>;

    /// Read up to `max` items from the head without removing them.
    async fn peek(&self, queue: QueueName, max: usize) -> Result<Vec<String>, StorageError>;

    /// Remove specific items wherever they are. Returns how many were present.
    async fn remove(&self, queue: QueueName, items: &[String]) -> Result<usize, StorageError>;

    /// Drop every item. Returns how many were removed.
    async fn clear(&self, queue: QueueName) -> Result<usize, StorageError>;

    async fn len(&self, queue: QueueName) -> Result<usize, StorageError>;

    async fn add_to_set(&self, set: SetName, members: &[String]) -> Result<(), StorageError>;

    async fn remove_from_set(&self, set: SetName, members: &[String])
        -> Result<(), StorageError>;

    async fn set_contains(&self, set: SetName, member: &str) -> Result<bool, StorageError>;

    /// Membership of several candidates, in input order.
    async fn set_contains_many(
        &self,
        set: SetName,
        members: &[String],
    ) -> Result<Vec<bool>, StorageError> {
        let mut found = Vec::with_capacity(members.len());
        for member in members {
            found.push(self.set_contains(set, member).await?);
        }
        Ok(found)
    }

    async fn set_len(&self, set: SetName) -> Result<usize, StorageError>;

    /// Drop every member. Returns how many were removed.
    async fn clear_set(&self, set: SetName) -> Result<usize, StorageError>;
}

/// Last indexed projection per offer. Last write wins.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn get_snapshot(&self, id: EntityId) -> Result<Option<IndexSnapshot>, StorageError>;

    async fn put_snapshot(&self, id: EntityId, snapshot: &IndexSnapshot)
        -> Result<(), StorageError>;

    async fn delete_snapshot(&self, id: EntityId) -> Result<(), StorageError>;

    async fn snapshot_exists(&self, id: EntityId) -> Result<bool, StorageError> {
        Ok(self.get_snapshot(id).await?.is_some())
    }

    /// Snapshots of several offers; missing ones are absent from the map.
    async fn get_snapshots(
        &self,
        ids: &[EntityId],
    ) -> Result<HashMap<EntityId, IndexSnapshot>, StorageError> {
        let mut found = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(snapshot) = self.get_snapshot(*id).await? {
                found.insert(*id, snapshot);
            }
        }
        Ok(found)
    }

    async fn put_snapshots(&self, entries: &[(EntityId, IndexSnapshot)])
        -> Result<(), StorageError>;

    async fn delete_snapshots(&self, ids: &[EntityId]) -> Result<(), StorageError>;

    /// Drop every snapshot. Returns how many were removed.
    async fn clear_snapshots(&self) -> Result<usize, StorageError>;
}

/// Tokens marking provider jobs held by a worker.
#[async_trait]
pub trait InFlightStore: Send + Sync {
    /// Reserve a token with no handle yet. Returns false if the job already
    /// holds one.
    async fn reserve_in_flight(&self, job_id: i64) -> Result<bool, StorageError>;

    /// Record the worker handle on an existing token. Returns false, and
    /// writes nothing, when the token was already released.
    async fn set_in_flight_handle(&self, job_id: i64, handle: &str)
        -> Result<bool, StorageError>;

    /// Remove a token. Returns whether it existed.
    async fn release_in_flight(&self, job_id: i64) -> Result<bool, StorageError>;

    /// Remove a token only while it still carries `handle`. A token that was
    /// reserved again for a newer worker is left alone.
    async fn release_in_flight_if(&self, job_id: i64, handle: &str)
        -> Result<bool, StorageError>;

    async fn in_flight_count(&self) -> Result<usize, StorageError>;

    async fn list_in_flight(&self) -> Result<Vec<InFlightToken>, StorageError>;
}

/// Everything the pipeline needs from its shared store.
pub trait SyncStore: QueueStore + SnapshotStore + InFlightStore {}

impl<T: QueueStore + SnapshotStore + InFlightStore> SyncStore for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_names() {
        let names: Vec<&str> = QueueName::ALL.iter().map(|q| q.as_str()).collect();
        assert_eq!(names, vec!["main", "error", "venue", "venue-provider"]);
        assert_eq!(SetName::IndexedIds.to_string(), "indexed-ids");
    }
}
