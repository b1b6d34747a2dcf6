//! Integration tests for the operator commands that only need the queue store.

use tempfile::TempDir;

use sync_daemon::{enqueue, open_queue_store, queue_stats, EnqueueCommands};
use sync_storage::QueueName;
use sync_types::Settings;

/// Settings pointing the RocksDB queue store into a temp dir.
fn settings_in(temp: &TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.queue_store.path = temp.path().join("queues").to_string_lossy().into_owned();
    settings
}

fn length(stats: &sync_storage::QueueStats, queue: QueueName) -> usize {
    stats
        .lengths
        .iter()
        .find(|(name, _)| *name == queue)
        .map(|(_, len)| *len)
        .unwrap_or(0)
}

#[tokio::test]
async fn test_enqueue_offers_deduplicates() {
    let temp = TempDir::new().unwrap();
    let settings = settings_in(&temp);

    let added = enqueue(
        &settings,
        EnqueueCommands::Offers {
            ids: vec![1, 2, 2, 3],
            error: false,
        },
    )
    .await
    .unwrap();
    assert_eq!(added, 3);

    let added = enqueue(
        &settings,
        EnqueueCommands::Offers {
            ids: vec![3, 4],
            error: false,
        },
    )
    .await
    .unwrap();
    assert_eq!(added, 1);

    let stats = queue_stats(&settings).await.unwrap();
    assert_eq!(length(&stats, QueueName::Main), 4);
    assert_eq!(length(&stats, QueueName::Error), 0);
}

#[tokio::test]
async fn test_enqueue_targets_each_queue() {
    let temp = TempDir::new().unwrap();
    let settings = settings_in(&temp);

    enqueue(
        &settings,
        EnqueueCommands::Offers {
            ids: vec![9],
            error: true,
        },
    )
    .await
    .unwrap();
    enqueue(&settings, EnqueueCommands::Venues { ids: vec![10, 11] })
        .await
        .unwrap();
    enqueue(
        &settings,
        EnqueueCommands::VenueProvider {
            job_id: 7,
            provider_id: 1,
            venue_id: 10,
        },
    )
    .await
    .unwrap();

    let stats = queue_stats(&settings).await.unwrap();
    assert_eq!(length(&stats, QueueName::Main), 0);
    assert_eq!(length(&stats, QueueName::Error), 1);
    assert_eq!(length(&stats, QueueName::Venue), 2);
    assert_eq!(length(&stats, QueueName::VenueProvider), 1);
    assert_eq!(stats.indexed, 0);
    assert!(stats.in_flight.is_empty());
}

#[tokio::test]
async fn test_enqueue_while_store_is_held_explains_backend() {
    let temp = TempDir::new().unwrap();
    let settings = settings_in(&temp);
    let _daemon_store = open_queue_store(&settings).await.unwrap();

    let err = enqueue(&settings, EnqueueCommands::Venues { ids: vec![1] })
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("held by a running daemon"), "{}", message);
    assert!(message.contains("postgres"), "{}", message);
}
