//! End-to-end test infrastructure for the offer sync pipeline.
//!
//! Provides a shared TestHarness wiring a temp RocksDB queue store, the
//! in-memory catalog and the mock search index into a [`Synchronizer`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use sync_catalog::InMemoryCatalog;
use sync_indexing::{JobRunner, MockSearchIndex, RunnerError, SyncConfig, Synchronizer};
use sync_storage::{InFlightStore, QueueName, QueueStore, RocksStore, SyncQueues, SyncStore};
use sync_types::{EntityId, Offer, Stock, VenueProviderJob};

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub store: Arc<dyn SyncStore>,
    pub queues: SyncQueues,
    pub catalog: Arc<InMemoryCatalog>,
    pub index: Arc<MockSearchIndex>,
    pub synchronizer: Arc<Synchronizer>,
}

impl TestHarness {
    pub fn new(offers: impl IntoIterator<Item = Offer>) -> Self {
        Self::with_config(offers, SyncConfig::default())
    }

    pub fn with_config(offers: impl IntoIterator<Item = Offer>, config: SyncConfig) -> Self {
        Self::with_catalog(InMemoryCatalog::with_offers(offers), config)
    }

    pub fn with_catalog(catalog: InMemoryCatalog, config: SyncConfig) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let store: Arc<dyn SyncStore> =
            Arc::new(RocksStore::open(temp_dir.path()).expect("Failed to open test store"));
        let queues = SyncQueues::new(store.clone());
        let catalog = Arc::new(catalog);
        let index = Arc::new(MockSearchIndex::new());
        let synchronizer = Arc::new(Synchronizer::new(
            catalog.clone(),
            index.clone(),
            queues.clone(),
            config,
        ));

        Self {
            _temp_dir: temp_dir,
            store,
            queues,
            catalog,
            index,
            synchronizer,
        }
    }

    /// Offer ids in `queue`, in queue order.
    pub async fn queued_offers(&self, queue: QueueName) -> Vec<EntityId> {
        self.store
            .peek(queue, usize::MAX)
            .await
            .expect("Failed to peek queue")
            .iter()
            .map(|item| item.parse().expect("Queue item is not an offer id"))
            .collect()
    }

    /// Wait until every in-flight token is released.
    pub async fn wait_for_idle_workers(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let count = self.store.in_flight_count().await.expect("Failed to count tokens");
            if count == 0 {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "{} workers still in flight after {:?}",
                count,
                timeout
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// An active offer with one unlimited stock at `price`.
pub fn bookable_offer(id: EntityId, price: f64) -> Offer {
    Offer::new(id, format!("Offer {}", id)).with_stock(Stock::new(id, price))
}

/// An offer whose only stock can be booked until `deadline`.
pub fn offer_with_deadline(id: EntityId, deadline: DateTime<Utc>) -> Offer {
    Offer::new(id, format!("Offer {}", id))
        .with_stock(Stock::new(id, 5.0).with_booking_limit(deadline))
}

/// Job runner that records how many tokens were held whenever a worker
/// started, then delegates to `inner`.
pub struct ObservingRunner {
    inner: Arc<dyn JobRunner>,
    store: Arc<dyn SyncStore>,
    max_in_flight: AtomicUsize,
    started: AtomicUsize,
}

impl ObservingRunner {
    pub fn new(inner: Arc<dyn JobRunner>, store: Arc<dyn SyncStore>) -> Self {
        Self {
            inner,
            store,
            max_in_flight: AtomicUsize::new(0),
            started: AtomicUsize::new(0),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobRunner for ObservingRunner {
    async fn start(&self, job: VenueProviderJob) -> Result<String, RunnerError> {
        let in_flight = self
            .store
            .in_flight_count()
            .await
            .map_err(|e| RunnerError::Unavailable(e.to_string()))?;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        self.started.fetch_add(1, Ordering::SeqCst);
        self.inner.start(job).await
    }

    fn name(&self) -> &str {
        "observing"
    }
}
