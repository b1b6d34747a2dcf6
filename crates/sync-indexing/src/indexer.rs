//! Batch indexer: resolve offers, diff them and push the result to the index.
//!
//! Local bookkeeping (snapshots, indexed set) is only written after the
//! index confirmed a call. Failed calls shunt their ids into the error
//! queue so the next retry tick picks them up.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use sync_catalog::Catalog;
use sync_storage::{QueueName, SyncQueues};
use sync_types::{EntityId, IndexDocument, IndexSnapshot, Offer};
use tracing::{debug, info, warn};

use crate::error::IndexingError;
use crate::report::{BatchReport, FailurePhase};
use crate::rules::{decide, Decision};
use crate::search_index::SearchIndex;

/// Runs batches of offer ids through the diff engine and the index.
#[derive(Clone)]
pub struct BatchIndexer {
    catalog: Arc<dyn Catalog>,
    index: Arc<dyn SearchIndex>,
    queues: SyncQueues,
}

/// First occurrence of each id, in input order
fn unique_ids(ids: &[EntityId]) -> Vec<EntityId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

impl BatchIndexer {
    pub fn new(catalog: Arc<dyn Catalog>, index: Arc<dyn SearchIndex>, queues: SyncQueues) -> Self {
        Self {
            catalog,
            index,
            queues,
        }
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub fn queues(&self) -> &SyncQueues {
        &self.queues
    }

    /// Bring the index in line with the current state of `ids`.
    ///
    /// Index failures are reported in the returned [`BatchReport`] after
    /// their ids were pushed to the error queue. Store and catalog failures
    /// are returned as errors.
    pub async fn process_eligible(
        &self,
        ids: &[EntityId],
        from_provider_update: bool,
    ) -> Result<BatchReport, IndexingError> {
        let ids = unique_ids(ids);
        let mut report = BatchReport::new();
        if ids.is_empty() {
            return Ok(report);
        }

        let offers: HashMap<EntityId, Offer> = self
            .catalog
            .get_by_ids(&ids)
            .await?
            .into_iter()
            .map(|offer| (offer.id, offer))
            .collect();
        let indexed = self.queues.indexed_flags(&ids).await?;
        let previous = if from_provider_update {
            self.queues.snapshots(&ids).await?
        } else {
            HashMap::new()
        };

        let now = Utc::now();
        let mut to_add: Vec<(EntityId, IndexSnapshot)> = Vec::new();
        let mut to_delete: Vec<EntityId> = Vec::new();

        for (id, is_indexed) in ids.iter().copied().zip(indexed) {
            let current = offers
                .get(&id)
                .and_then(|offer| IndexSnapshot::from_offer(offer, now));
            match decide(current.as_ref(), is_indexed, previous.get(&id), from_provider_update) {
                Decision::Add => {
                    if let Some(snapshot) = current {
                        to_add.push((id, snapshot));
                    }
                }
                Decision::Delete => to_delete.push(id),
                Decision::Skip => report.skipped += 1,
            }
        }

        if !to_add.is_empty() {
            let documents: Vec<IndexDocument> = to_add
                .iter()
                .map(|(id, snapshot)| IndexDocument::new(*id, snapshot))
                .collect();
            match self.index.add_objects(&documents).await {
                Ok(()) => {
                    self.queues.commit_added(&to_add).await?;
                    report.added = to_add.len();
                    info!(count = to_add.len(), "Indexed offers");
                }
                Err(e) => {
                    let requeued = self.queues.push_offers(QueueName::Error, &ids).await?;
                    warn!(error = %e, batch = ids.len(), requeued, "Adding offers failed, batch queued for retry");
                    report.record_failure(FailurePhase::Add, ids.len(), e);
                }
            }
        }

        if !to_delete.is_empty() {
            self.delete(&to_delete, &mut report).await?;
        }

        if to_add.is_empty() && to_delete.is_empty() {
            debug!(count = ids.len(), "No offer to index or delete");
        }
        Ok(report)
    }

    /// Remove offers whose booking deadline passed. Only ids still marked
    /// indexed are sent to the index.
    pub async fn delete_expired(&self, ids: &[EntityId]) -> Result<BatchReport, IndexingError> {
        let ids = unique_ids(ids);
        let mut report = BatchReport::new();
        if ids.is_empty() {
            return Ok(report);
        }

        let indexed = self.queues.indexed_flags(&ids).await?;
        let to_delete: Vec<EntityId> = ids
            .iter()
            .copied()
            .zip(indexed)
            .filter_map(|(id, is_indexed)| is_indexed.then_some(id))
            .collect();
        report.skipped = ids.len() - to_delete.len();

        if to_delete.is_empty() {
            debug!(count = ids.len(), "No expired offer left in the index");
            return Ok(report);
        }
        self.delete(&to_delete, &mut report).await?;
        Ok(report)
    }

    /// Empty the index and forget what was indexed
    pub async fn clear_index(&self) -> Result<usize, IndexingError> {
        self.index.clear_index().await?;
        let forgotten = self.queues.forget_all_indexed().await?;
        info!(forgotten, "Cleared search index");
        Ok(forgotten)
    }

    async fn delete(&self, ids: &[EntityId], report: &mut BatchReport) -> Result<(), IndexingError> {
        match self.index.delete_objects(ids).await {
            Ok(()) => {
                self.queues.commit_deleted(ids).await?;
                report.deleted += ids.len();
                info!(count = ids.len(), "Removed offers from index");
            }
            Err(e) => {
                self.queues.push_offers(QueueName::Error, ids).await?;
                warn!(error = %e, count = ids.len(), "Deleting offers failed, ids queued for retry");
                report.record_failure(FailurePhase::Delete, ids.len(), e);
            }
        }
        Ok(())
    }
}
