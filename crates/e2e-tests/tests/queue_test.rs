//! End-to-end queue tests: atomic pops and event drains.

use std::collections::HashSet;
use std::sync::Arc;

use pretty_assertions::assert_eq;

use e2e_tests::{bookable_offer, TestHarness};
use sync_indexing::{DrainMode, SyncConfig};
use sync_storage::{QueueName, SyncQueues};

async fn concurrent_pops(queues: &SyncQueues, callers: usize, max: usize) -> Vec<Vec<i64>> {
    let mut handles = Vec::new();
    for _ in 0..callers {
        let queues = queues.clone();
        handles.push(tokio::spawn(async move {
            queues.pop_offers(QueueName::Main, max).await.unwrap()
        }));
    }
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pops_are_disjoint_and_lose_nothing() {
    let harness = TestHarness::new([]);

    for round in 0..20 {
        // m = 10 items, two callers popping n = 6: m <= 2n
        let ids: Vec<i64> = (1..=10).map(|i| round * 100 + i).collect();
        harness.queues.push_offers(QueueName::Main, &ids).await.unwrap();

        let results = concurrent_pops(&harness.queues, 2, 6).await;

        let total: usize = results.iter().map(Vec::len).sum();
        let union: HashSet<i64> = results.iter().flatten().copied().collect();
        assert_eq!(total, 10, "overlapping pops in round {}", round);
        assert_eq!(union, ids.iter().copied().collect::<HashSet<_>>());
        assert_eq!(harness.queues.len(QueueName::Main).await.unwrap(), 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_callers_split_a_large_queue() {
    let harness = TestHarness::new([]);
    let ids: Vec<i64> = (1..=200).collect();
    harness.queues.push_offers(QueueName::Main, &ids).await.unwrap();

    let results = concurrent_pops(&harness.queues, 8, 25).await;

    let mut popped: Vec<i64> = results.into_iter().flatten().collect();
    popped.sort_unstable();
    assert_eq!(popped, ids);
}

#[tokio::test]
async fn test_cron_drain_leaves_partial_chunk() {
    let harness = TestHarness::with_config(
        (1..=8).map(|id| bookable_offer(id, 5.0)),
        SyncConfig::default().with_main_chunk_size(3),
    );
    harness
        .queues
        .push_offers(QueueName::Main, &(1..=8).collect::<Vec<_>>())
        .await
        .unwrap();

    let report = harness.synchronizer.drain_events(DrainMode::Cron).await.unwrap();

    assert_eq!(report.batches, 2);
    assert_eq!(report.ids_seen, 6);
    let batches: Vec<Vec<i64>> = harness
        .index
        .add_calls()
        .iter()
        .map(|docs| docs.iter().map(|d| d.id).collect())
        .collect();
    assert_eq!(batches, vec![vec![1, 2, 3], vec![4, 5, 6]]);
    assert_eq!(harness.queued_offers(QueueName::Main).await, vec![7, 8]);
}

#[tokio::test]
async fn test_drain_until_empty_processes_everything() {
    let harness = TestHarness::with_config(
        (1..=8).map(|id| bookable_offer(id, 5.0)),
        SyncConfig::default().with_main_chunk_size(3),
    );
    harness
        .queues
        .push_offers(QueueName::Main, &(1..=8).collect::<Vec<_>>())
        .await
        .unwrap();

    let report = harness.synchronizer.drain_events(DrainMode::UntilEmpty).await.unwrap();

    assert_eq!(report.ids_seen, 8);
    assert_eq!(report.totals.added, 8);
    assert!(harness.queued_offers(QueueName::Main).await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_drains_index_each_offer_once() {
    let harness = Arc::new(TestHarness::with_config(
        (1..=40).map(|id| bookable_offer(id, 5.0)),
        SyncConfig::default().with_main_chunk_size(4),
    ));
    harness
        .queues
        .push_offers(QueueName::Main, &(1..=40).collect::<Vec<_>>())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..3 {
        let harness = harness.clone();
        handles.push(tokio::spawn(async move {
            harness.synchronizer.drain_events(DrainMode::UntilEmpty).await.unwrap()
        }));
    }
    let mut seen = 0;
    for handle in handles {
        seen += handle.await.unwrap().ids_seen;
    }

    assert_eq!(seen, 40);
    let mut sent: Vec<i64> = harness
        .index
        .add_calls()
        .iter()
        .flatten()
        .map(|doc| doc.id)
        .collect();
    sent.sort_unstable();
    assert_eq!(sent, (1..=40).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_unavailable_catalog_puts_ids_back() {
    let harness = TestHarness::new([bookable_offer(1, 5.0), bookable_offer(2, 5.0)]);
    harness.queues.push_offers(QueueName::Main, &[1, 2]).await.unwrap();
    harness.catalog.set_unavailable(true);

    let result = harness.synchronizer.drain_events(DrainMode::Cron).await;

    assert!(result.is_err());
    assert_eq!(harness.queued_offers(QueueName::Main).await, vec![1, 2]);
    assert!(harness.index.calls().is_empty());
}
