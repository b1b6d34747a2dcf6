//! Queue consumers and catalog sweeps.
//!
//! Every driver funnels ids into the [`BatchIndexer`]. A [`SyncTrigger`]
//! names one driver invocation; [`Synchronizer::run`] dispatches it.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::FutureExt;
use sync_catalog::Catalog;
use sync_storage::{QueueName, SyncQueues};
use sync_types::{IndexingSettings, VenueProviderJob};
use tracing::{debug, error, info, warn};

use crate::error::IndexingError;
use crate::indexer::BatchIndexer;
use crate::report::DriverReport;
use crate::search_index::SearchIndex;

/// How an event drain decides to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainMode {
    /// Stop once fewer than a chunk of ids is left after a batch
    #[default]
    Cron,
    /// Stop when a pop returns nothing
    UntilEmpty,
}

/// One driver invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    EventDriven(DrainMode),
    FullResync {
        starting_page: usize,
        /// Exclusive
        ending_page: Option<usize>,
    },
    VenueResync,
    ProviderVenueResync,
    ExpirationSweep {
        process_all: bool,
    },
    ErrorRetry,
}

impl SyncTrigger {
    pub fn name(&self) -> &'static str {
        match self {
            SyncTrigger::EventDriven(_) => "event_drain",
            SyncTrigger::FullResync { .. } => "full_resync",
            SyncTrigger::VenueResync => "venue_resync",
            SyncTrigger::ProviderVenueResync => "provider_venue_resync",
            SyncTrigger::ExpirationSweep { .. } => "expiration_sweep",
            SyncTrigger::ErrorRetry => "error_retry",
        }
    }
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Oldest booking deadline an expiration sweep over everything looks at
fn oldest_deadline() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Chunk sizes and windows for the drivers.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub main_chunk_size: usize,
    pub venue_chunk_size: usize,
    pub venue_provider_chunk_size: usize,
    pub expired_chunk_size: usize,
    pub full_resync_page_size: usize,
    /// Expiration window start, before now
    pub expiration_window_start: Duration,
    /// Expiration window end, before now
    pub expiration_window_end: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_settings(&IndexingSettings::default())
    }
}

impl SyncConfig {
    pub fn from_settings(settings: &IndexingSettings) -> Self {
        Self {
            main_chunk_size: settings.main_chunk_size,
            venue_chunk_size: settings.venue_chunk_size,
            venue_provider_chunk_size: settings.venue_provider_chunk_size,
            expired_chunk_size: settings.expired_chunk_size,
            full_resync_page_size: settings.full_resync_page_size,
            expiration_window_start: Duration::days(settings.expiration_window_start_days),
            expiration_window_end: Duration::days(settings.expiration_window_end_days),
        }
    }

    pub fn with_main_chunk_size(mut self, size: usize) -> Self {
        self.main_chunk_size = size.max(1);
        self
    }

    pub fn with_venue_chunk_size(mut self, size: usize) -> Self {
        self.venue_chunk_size = size.max(1);
        self
    }

    pub fn with_venue_provider_chunk_size(mut self, size: usize) -> Self {
        self.venue_provider_chunk_size = size.max(1);
        self
    }

    pub fn with_expired_chunk_size(mut self, size: usize) -> Self {
        self.expired_chunk_size = size.max(1);
        self
    }

    pub fn with_full_resync_page_size(mut self, size: usize) -> Self {
        self.full_resync_page_size = size.max(1);
        self
    }

    /// Half-open deadline window `[from, to)` for a sweep at `now`
    pub fn expiration_window(
        &self,
        now: DateTime<Utc>,
        process_all: bool,
    ) -> (DateTime<Utc>, DateTime<Utc>) {
        let from = if process_all {
            oldest_deadline()
        } else {
            now - self.expiration_window_start
        };
        (from, now - self.expiration_window_end)
    }
}

/// Runs drivers against one catalog, index and queue store.
pub struct Synchronizer {
    indexer: BatchIndexer,
    config: SyncConfig,
}

impl Synchronizer {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        index: Arc<dyn SearchIndex>,
        queues: SyncQueues,
        config: SyncConfig,
    ) -> Self {
        Self {
            indexer: BatchIndexer::new(catalog, index, queues),
            config,
        }
    }

    pub fn indexer(&self) -> &BatchIndexer {
        &self.indexer
    }

    pub fn queues(&self) -> &SyncQueues {
        self.indexer.queues()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn catalog(&self) -> &Arc<dyn Catalog> {
        self.indexer.catalog()
    }

    /// Run the driver named by `trigger`.
    pub async fn run(&self, trigger: SyncTrigger) -> Result<DriverReport, IndexingError> {
        debug!(trigger = %trigger, "Starting driver");
        let result = match trigger {
            SyncTrigger::EventDriven(mode) => self.drain_events(mode).await,
            SyncTrigger::FullResync {
                starting_page,
                ending_page,
            } => self.full_resync(starting_page, ending_page).await,
            SyncTrigger::VenueResync => self.venue_resync().await,
            SyncTrigger::ProviderVenueResync => self.provider_venue_resync().await,
            SyncTrigger::ExpirationSweep { process_all } => self.expiration_sweep(process_all).await,
            SyncTrigger::ErrorRetry => self.error_retry().await,
        };
        match &result {
            Ok(report) => info!(trigger = %trigger, %report, "Driver finished"),
            Err(e) => error!(trigger = %trigger, error = %e, "Driver failed"),
        }
        result
    }

    /// Pop event-driven ids from `main` in chunks.
    ///
    /// Popped ids go back to `main` if the batch fails on a store or
    /// catalog error.
    pub async fn drain_events(&self, mode: DrainMode) -> Result<DriverReport, IndexingError> {
        let queues = self.queues();
        let chunk = self.config.main_chunk_size;
        let mut report = DriverReport::new();

        loop {
            let ids = queues.pop_offers(QueueName::Main, chunk).await?;
            if ids.is_empty() {
                break;
            }

            info!(count = ids.len(), "Processing queued offers");
            match self.indexer.process_eligible(&ids, false).await {
                Ok(batch) => report.record_batch(ids.len(), &batch),
                Err(e) => {
                    if let Err(push_err) = queues.push_offers(QueueName::Main, &ids).await {
                        error!(error = %push_err, ids = ?ids, "Could not return popped offers to the queue");
                    }
                    return Err(e);
                }
            }

            if mode == DrainMode::Cron && queues.len(QueueName::Main).await? < chunk {
                break;
            }
        }
        Ok(report)
    }

    /// Reindex every active offer, page by page.
    pub async fn full_resync(
        &self,
        starting_page: usize,
        ending_page: Option<usize>,
    ) -> Result<DriverReport, IndexingError> {
        let page_size = self.config.full_resync_page_size;
        let mut report = DriverReport::new();
        let mut page = starting_page;

        while ending_page.map_or(true, |end| page < end) {
            let ids = self.catalog().page_of_active_ids(page, page_size).await?;
            if ids.is_empty() {
                break;
            }
            let batch = self.indexer.process_eligible(&ids, false).await?;
            report.record_batch(ids.len(), &batch);
            info!(page, count = ids.len(), "Processed catalog page");

            if ids.len() < page_size {
                break;
            }
            page += 1;
        }
        info!(pages = report.batches, "Full resync finished");
        Ok(report)
    }

    /// Reindex every offer of each queued venue.
    ///
    /// A venue leaves the queue once all its pages went through, so a
    /// failure keeps the remaining venues queued.
    pub async fn venue_resync(&self) -> Result<DriverReport, IndexingError> {
        let queues = self.queues();
        let pending = queues.len(QueueName::Venue).await?;
        let venues = queues.peek_venues(pending).await?;
        let page_size = self.config.venue_chunk_size;
        let mut report = DriverReport::new();

        for venue_id in venues {
            let mut page = 0;
            loop {
                let ids = self
                    .catalog()
                    .page_of_ids_by_venue(venue_id, page, page_size)
                    .await?;
                if ids.is_empty() {
                    break;
                }
                let batch = self.indexer.process_eligible(&ids, false).await?;
                report.record_batch(ids.len(), &batch);
                info!(venue_id, page, count = ids.len(), "Processed venue page");

                if ids.len() < page_size {
                    break;
                }
                page += 1;
            }
            queues.remove_venues(&[venue_id]).await?;
            info!(venue_id, "Venue resync finished");
        }
        Ok(report)
    }

    /// Run every queued provider job in this process, one after another.
    ///
    /// Jobs whose token is already held elsewhere go back to the queue.
    pub async fn provider_venue_resync(&self) -> Result<DriverReport, IndexingError> {
        let queues = self.queues();
        let pending = queues.len(QueueName::VenueProvider).await?;
        let jobs = queues.pop_provider_jobs(pending).await?;
        let mut report = DriverReport::new();

        for (position, job) in jobs.iter().enumerate() {
            match queues.store().reserve_in_flight(job.job_id).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(job = %job, "Job already in flight, requeueing");
                    queues.push_provider_jobs(&[*job]).await?;
                    continue;
                }
                Err(e) => {
                    if let Err(push_err) = queues.push_provider_jobs(&jobs[position..]).await {
                        error!(error = %push_err, "Could not return provider jobs to the queue");
                    }
                    return Err(e.into());
                }
            }

            match self.run_provider_job(*job).await {
                Ok(job_report) => report.merge(&job_report),
                Err(_) => report.failed_units += 1,
            }
        }
        Ok(report)
    }

    /// Resync the offers of one provider job, then release its token.
    ///
    /// The caller must hold the job's in-flight token. It is released on
    /// success, error and panic alike.
    pub async fn run_provider_job(&self, job: VenueProviderJob) -> Result<DriverReport, IndexingError> {
        info!(job = %job, "Processing provider job");
        let outcome = AssertUnwindSafe(self.sync_provider_offers(job))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(result) => result,
            Err(panic) => Err(IndexingError::Panicked(panic_message(panic.as_ref()))),
        };
        match &result {
            Ok(report) => info!(job = %job, %report, "Provider job finished"),
            Err(e) => error!(job = %job, error = %e, "Provider job failed"),
        }

        match self.queues().store().release_in_flight(job.job_id).await {
            Ok(true) => debug!(job = %job, "Released in-flight token"),
            Ok(false) => warn!(job = %job, "In-flight token was already released"),
            Err(e) => error!(job = %job, error = %e, "Could not release in-flight token"),
        }
        result
    }

    async fn sync_provider_offers(&self, job: VenueProviderJob) -> Result<DriverReport, IndexingError> {
        let page_size = self.config.venue_provider_chunk_size;
        let mut report = DriverReport::new();
        let mut page = 0;

        loop {
            let ids = self
                .catalog()
                .page_of_ids_by_venue_and_provider(job.venue_id, job.provider_id, page, page_size)
                .await?;
            if ids.is_empty() {
                break;
            }
            let batch = self.indexer.process_eligible(&ids, true).await?;
            report.record_batch(ids.len(), &batch);
            info!(job = %job, page, count = ids.len(), "Processed provider page");

            if ids.len() < page_size {
                break;
            }
            page += 1;
        }
        Ok(report)
    }

    /// Remove offers whose booking deadline fell in the expiration window.
    pub async fn expiration_sweep(&self, process_all: bool) -> Result<DriverReport, IndexingError> {
        let (from, to) = self.config.expiration_window(Utc::now(), process_all);
        let page_size = self.config.expired_chunk_size;
        let mut report = DriverReport::new();
        let mut page = 0;
        info!(%from, %to, "Sweeping expired offers");

        loop {
            let ids = self
                .catalog()
                .page_of_ids_by_booking_deadline(from, to, page, page_size)
                .await?;
            if ids.is_empty() {
                break;
            }
            let batch = self.indexer.delete_expired(&ids).await?;
            report.record_batch(ids.len(), &batch);
            info!(page, count = ids.len(), "Processed expired page");

            if ids.len() < page_size {
                break;
            }
            page += 1;
        }
        Ok(report)
    }

    /// Retry every id in the error queue once.
    ///
    /// Ids that fail again are queued again by the indexer.
    pub async fn error_retry(&self) -> Result<DriverReport, IndexingError> {
        let queues = self.queues();
        let pending = queues.len(QueueName::Error).await?;
        let ids = queues.pop_offers(QueueName::Error, pending).await?;
        let mut report = DriverReport::new();
        if ids.is_empty() {
            debug!("Error queue is empty");
            return Ok(report);
        }

        info!(count = ids.len(), "Retrying offers in error");
        match self.indexer.process_eligible(&ids, false).await {
            Ok(batch) => report.record_batch(ids.len(), &batch),
            Err(e) => {
                if let Err(push_err) = queues.push_offers(QueueName::Error, &ids).await {
                    error!(error = %push_err, ids = ?ids, "Could not return offers to the error queue");
                }
                return Err(e);
            }
        }
        Ok(report)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
