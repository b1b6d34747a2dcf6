//! End-to-end dispatcher tests with in-process workers.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use e2e_tests::{bookable_offer, ObservingRunner, TestHarness};
use sync_catalog::InMemoryCatalog;
use sync_indexing::{Dispatcher, DispatcherConfig, SyncConfig, SyncTrigger, TaskJobRunner};
use sync_storage::{InFlightStore, QueueName};
use sync_types::VenueProviderJob;

fn provider_catalog() -> InMemoryCatalog {
    InMemoryCatalog::with_offers([
        bookable_offer(1, 5.0).with_venue(10).with_provider(1),
        bookable_offer(2, 5.0).with_venue(10).with_provider(1),
        bookable_offer(3, 5.0).with_venue(20).with_provider(1),
        bookable_offer(4, 5.0).with_venue(30).with_provider(1),
    ])
    .with_failing_venue(30)
}

fn jobs() -> Vec<VenueProviderJob> {
    vec![
        VenueProviderJob::new(100, 1, 10),
        VenueProviderJob::new(200, 1, 20),
        VenueProviderJob::new(300, 1, 30),
    ]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_of_two_runs_three_jobs_and_releases_all_tokens() {
    let harness = TestHarness::with_catalog(provider_catalog(), SyncConfig::default());
    harness.queues.push_provider_jobs(&jobs()).await.unwrap();

    let runner = Arc::new(ObservingRunner::new(
        Arc::new(TaskJobRunner::new(harness.synchronizer.clone())),
        harness.store.clone(),
    ));
    let dispatcher = Dispatcher::new(
        harness.queues.clone(),
        runner.clone(),
        DispatcherConfig::default()
            .with_pool_size(2)
            .with_backoff(Duration::from_millis(20)),
    );

    let report = dispatcher.tick().await.unwrap();
    harness.wait_for_idle_workers(Duration::from_secs(5)).await;

    assert_eq!(report.dispatched, 3);
    assert_eq!(report.requeued, 0);
    assert_eq!(runner.started(), 3);
    assert!(runner.max_in_flight() <= 2);
    assert_eq!(harness.store.in_flight_count().await.unwrap(), 0);
    assert_eq!(harness.queues.len(QueueName::VenueProvider).await.unwrap(), 0);
    // Venue 30 failed in its worker; the others went through
    assert_eq!(harness.index.ids(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_job_already_in_flight_stays_queued() {
    let harness = TestHarness::with_catalog(provider_catalog(), SyncConfig::default());
    harness.queues.push_provider_jobs(&jobs()[..1]).await.unwrap();
    assert!(harness.store.reserve_in_flight(100).await.unwrap());

    let dispatcher = Dispatcher::new(
        harness.queues.clone(),
        Arc::new(TaskJobRunner::new(harness.synchronizer.clone())),
        DispatcherConfig::default(),
    );
    let report = dispatcher.tick().await.unwrap();

    assert_eq!(report.dispatched, 0);
    assert_eq!(report.already_in_flight, 1);
    assert_eq!(harness.queues.peek_provider_jobs(10).await.unwrap(), jobs()[..1].to_vec());
}

#[tokio::test]
async fn test_in_process_provider_resync_continues_after_failure() {
    let harness = TestHarness::with_catalog(provider_catalog(), SyncConfig::default());
    let mut queued = jobs();
    queued.rotate_right(1);
    harness.queues.push_provider_jobs(&queued).await.unwrap();

    let report = harness
        .synchronizer
        .run(SyncTrigger::ProviderVenueResync)
        .await
        .unwrap();

    assert_eq!(report.failed_units, 1);
    assert_eq!(report.totals.added, 3);
    assert_eq!(harness.index.ids(), vec![1, 2, 3]);
    assert_eq!(harness.store.in_flight_count().await.unwrap(), 0);
    assert_eq!(harness.queues.len(QueueName::VenueProvider).await.unwrap(), 0);
}
