//! In-memory search index for tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use sync_types::{EntityId, IndexDocument};

use super::{SearchIndex, SearchIndexError};

/// A call received by [`MockSearchIndex`]
#[derive(Debug, Clone, PartialEq)]
pub enum SearchIndexCall {
    Add(Vec<IndexDocument>),
    Delete(Vec<EntityId>),
    Clear,
}

/// Search index that keeps documents in a map and records every call.
///
/// Adds and deletes can be switched to fail with a 503 to exercise the
/// error queue. Failed calls are recorded too.
#[derive(Default)]
pub struct MockSearchIndex {
    documents: Mutex<BTreeMap<EntityId, IndexDocument>>,
    calls: Mutex<Vec<SearchIndexCall>>,
    fail_adds: AtomicBool,
    fail_deletes: AtomicBool,
}

impl MockSearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_adds(&self, fail: bool) {
        self.fail_adds.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Every call received so far
    pub fn calls(&self) -> Vec<SearchIndexCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Documents of each add call, in call order
    pub fn add_calls(&self) -> Vec<Vec<IndexDocument>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SearchIndexCall::Add(docs) => Some(docs),
                _ => None,
            })
            .collect()
    }

    pub fn reset_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    pub fn document(&self, id: EntityId) -> Option<IndexDocument> {
        self.documents.lock().ok()?.get(&id).cloned()
    }

    /// Ids currently in the index, ascending
    pub fn ids(&self) -> Vec<EntityId> {
        self.documents
            .lock()
            .map(|docs| docs.keys().copied().collect())
            .unwrap_or_default()
    }

    fn record(&self, call: SearchIndexCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn unavailable() -> SearchIndexError {
        SearchIndexError::Rejected {
            status: 503,
            body: "mock index unavailable".to_string(),
        }
    }

    fn lock_documents(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<EntityId, IndexDocument>>, SearchIndexError>
    {
        self.documents
            .lock()
            .map_err(|_| SearchIndexError::Config("mock index lock poisoned".to_string()))
    }
}

#[async_trait]
impl SearchIndex for MockSearchIndex {
    async fn add_objects(&self, documents: &[IndexDocument]) -> Result<(), SearchIndexError> {
        self.record(SearchIndexCall::Add(documents.to_vec()));
        if self.fail_adds.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        let mut stored = self.lock_documents()?;
        for doc in documents {
            stored.insert(doc.id, doc.clone());
        }
        Ok(())
    }

    async fn delete_objects(&self, ids: &[EntityId]) -> Result<(), SearchIndexError> {
        self.record(SearchIndexCall::Delete(ids.to_vec()));
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        let mut stored = self.lock_documents()?;
        for id in ids {
            stored.remove(id);
        }
        Ok(())
    }

    async fn clear_index(&self) -> Result<(), SearchIndexError> {
        self.record(SearchIndexCall::Clear);
        self.lock_documents()?.clear();
        Ok(())
    }
}
