//! Registration of the synchronization drivers with the scheduler.
//!
//! Each job calls one [`Synchronizer`] driver or a [`Dispatcher`] tick and
//! turns the report into the job's summary line. Only the event drain may
//! overlap itself: its batches are split by atomic pops, while the other
//! drivers read shared sets or pop whole queues.

use std::sync::Arc;

use sync_indexing::{DrainMode, Dispatcher, SyncTrigger, Synchronizer};
use sync_types::ScheduleSettings;
use tracing::info;

use crate::{JitterConfig, OverlapPolicy, SchedulerError, SchedulerService};

/// Register every job whose cron expression is set.
///
/// Returns the names of the registered jobs.
pub async fn register_sync_jobs(
    scheduler: &SchedulerService,
    synchronizer: Arc<Synchronizer>,
    dispatcher: Arc<Dispatcher>,
    settings: &ScheduleSettings,
) -> Result<Vec<&'static str>, SchedulerError> {
    let jitter = JitterConfig::new(settings.jitter_secs);
    let mut registered = Vec::new();

    let drivers = [
        (
            settings.event_drain.as_deref(),
            SyncTrigger::EventDriven(DrainMode::Cron),
            OverlapPolicy::Concurrent,
        ),
        (settings.venue_resync.as_deref(), SyncTrigger::VenueResync, OverlapPolicy::Skip),
        (
            settings.expiration_sweep.as_deref(),
            SyncTrigger::ExpirationSweep { process_all: false },
            OverlapPolicy::Skip,
        ),
        (settings.error_retry.as_deref(), SyncTrigger::ErrorRetry, OverlapPolicy::Skip),
        (
            settings.full_resync.as_deref(),
            SyncTrigger::FullResync {
                starting_page: 0,
                ending_page: None,
            },
            OverlapPolicy::Skip,
        ),
    ];

    for (cron, trigger, overlap) in drivers {
        let Some(cron) = cron else {
            info!(job = trigger.name(), "No schedule configured, job disabled");
            continue;
        };
        let synchronizer = synchronizer.clone();
        scheduler
            .register_job(trigger.name(), cron, overlap, jitter, move || {
                let synchronizer = synchronizer.clone();
                async move {
                    synchronizer
                        .run(trigger)
                        .await
                        .map(|report| report.to_string())
                        .map_err(|e| e.to_string())
                }
            })
            .await?;
        registered.push(trigger.name());
    }

    if let Some(cron) = settings.dispatch.as_deref() {
        scheduler
            .register_job("dispatch", cron, OverlapPolicy::Skip, jitter, move || {
                let dispatcher = dispatcher.clone();
                async move {
                    dispatcher
                        .tick()
                        .await
                        .map(|report| {
                            format!(
                                "{} dispatched, {} requeued, {} already in flight",
                                report.dispatched, report.requeued, report.already_in_flight
                            )
                        })
                        .map_err(|e| e.to_string())
                }
            })
            .await?;
        registered.push("dispatch");
    } else {
        info!(job = "dispatch", "No schedule configured, job disabled");
    }

    info!(jobs = ?registered, "Registered sync jobs");
    Ok(registered)
}
