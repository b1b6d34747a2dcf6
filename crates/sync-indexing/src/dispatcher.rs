//! Admission-controlled dispatch of provider jobs.
//!
//! Each tick takes every queued provider job and starts a worker for it as
//! soon as fewer than `pool_size` tokens are in flight, polling the token
//! count every `backoff` while the pool is full.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use sync_storage::{QueueName, SyncQueues};
use sync_types::{DispatcherSettings, VenueProviderJob};
use tracing::{debug, error, info, warn};

use crate::error::IndexingError;
use crate::runner::JobRunner;

/// Dispatcher tuning
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum number of workers in flight
    pub pool_size: usize,
    /// Wait between checks while the pool is full
    pub backoff: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            pool_size: 5,
            backoff: Duration::from_secs(60),
        }
    }
}

impl DispatcherConfig {
    pub fn from_settings(settings: &DispatcherSettings) -> Self {
        Self {
            pool_size: settings.pool_size,
            backoff: Duration::from_secs(settings.backoff_secs),
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub dispatched: usize,
    /// Jobs pushed back because their worker could not start
    pub requeued: usize,
    /// Jobs pushed back because a worker already holds their token
    pub already_in_flight: usize,
    /// Times the tick waited for a free slot
    pub waits: usize,
}

pub struct Dispatcher {
    queues: SyncQueues,
    runner: Arc<dyn JobRunner>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(queues: SyncQueues, runner: Arc<dyn JobRunner>, config: DispatcherConfig) -> Self {
        Self {
            queues,
            runner,
            config,
        }
    }

    /// Dispatch every job queued when the tick starts.
    ///
    /// On a store error the jobs not yet dispatched go back to the queue
    /// before the error is returned.
    pub async fn tick(&self) -> Result<DispatchReport, IndexingError> {
        let pending = self.queues.len(QueueName::VenueProvider).await?;
        let mut jobs: VecDeque<VenueProviderJob> =
            self.queues.pop_provider_jobs(pending).await?.into();
        let mut report = DispatchReport::default();
        if jobs.is_empty() {
            debug!("No provider job to dispatch");
            return Ok(report);
        }
        info!(count = jobs.len(), runner = self.runner.name(), "Dispatching provider jobs");

        while let Some(job) = jobs.front().copied() {
            if let Err(e) = self.dispatch_one(job, &mut report).await {
                let remaining: Vec<_> = jobs.iter().copied().collect();
                if let Err(push_err) = self.queues.push_provider_jobs(&remaining).await {
                    error!(error = %push_err, count = remaining.len(), "Could not return provider jobs to the queue");
                }
                return Err(e);
            }
            jobs.pop_front();
        }

        info!(
            dispatched = report.dispatched,
            requeued = report.requeued + report.already_in_flight,
            waits = report.waits,
            "Dispatch tick finished"
        );
        Ok(report)
    }

    async fn dispatch_one(
        &self,
        job: VenueProviderJob,
        report: &mut DispatchReport,
    ) -> Result<(), IndexingError> {
        let store = self.queues.store();
        loop {
            let in_flight = store.in_flight_count().await?;
            if in_flight < self.config.pool_size {
                break;
            }
            debug!(in_flight, pool_size = self.config.pool_size, "Worker pool full, waiting");
            report.waits += 1;
            tokio::time::sleep(self.config.backoff).await;
        }

        if !store.reserve_in_flight(job.job_id).await? {
            warn!(job = %job, "Job already in flight, requeueing");
            self.queues.push_provider_jobs(&[job]).await?;
            report.already_in_flight += 1;
            return Ok(());
        }

        match self.runner.start(job).await {
            Ok(handle) => {
                if !store.set_in_flight_handle(job.job_id, &handle).await? {
                    debug!(job = %job, handle = %handle, "Worker finished before its handle was recorded");
                }
                info!(job = %job, handle = %handle, "Started worker");
                report.dispatched += 1;
            }
            Err(e) => {
                warn!(job = %job, error = %e, "Could not start worker, requeueing");
                store.release_in_flight(job.job_id).await?;
                self.queues.push_provider_jobs(&[job]).await?;
                report.requeued += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RunnerError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use sync_storage::{RocksStore, SyncStore};
    use tempfile::TempDir;

    /// Runner whose workers hold their token for `hold`, then release it
    struct SleepyRunner {
        store: Arc<dyn SyncStore>,
        hold: Duration,
        fail_job: Option<i64>,
        max_seen: Arc<AtomicUsize>,
        started: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl JobRunner for SleepyRunner {
        async fn start(&self, job: VenueProviderJob) -> Result<String, RunnerError> {
            if self.fail_job == Some(job.job_id) {
                return Err(RunnerError::Unavailable("no capacity".to_string()));
            }
            let in_flight = self.store.in_flight_count().await.unwrap();
            self.max_seen.fetch_max(in_flight, Ordering::SeqCst);
            self.started.lock().unwrap().push(job.job_id);

            let store = self.store.clone();
            let hold = self.hold;
            tokio::spawn(async move {
                tokio::time::sleep(hold).await;
                store.release_in_flight(job.job_id).await.unwrap();
            });
            Ok(format!("test:{}", job.job_id))
        }

        fn name(&self) -> &str {
            "test"
        }
    }

    fn setup(fail_job: Option<i64>) -> (Dispatcher, Arc<SleepyRunner>, SyncQueues, TempDir) {
        let temp = TempDir::new().unwrap();
        let store: Arc<dyn SyncStore> = Arc::new(RocksStore::open(temp.path()).unwrap());
        let queues = SyncQueues::new(store.clone());
        let runner = Arc::new(SleepyRunner {
            store,
            hold: Duration::from_millis(100),
            fail_job,
            max_seen: Arc::new(AtomicUsize::new(0)),
            started: Mutex::new(Vec::new()),
        });
        let config = DispatcherConfig::default()
            .with_pool_size(2)
            .with_backoff(Duration::from_millis(20));
        let dispatcher = Dispatcher::new(queues.clone(), runner.clone(), config);
        (dispatcher, runner, queues, temp)
    }

    async fn wait_for_idle(queues: &SyncQueues) {
        for _ in 0..100 {
            if queues.store().in_flight_count().await.unwrap() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("tokens were never released");
    }

    #[tokio::test]
    async fn test_pool_bounds_workers_in_flight() {
        let (dispatcher, runner, queues, _temp) = setup(None);
        let jobs: Vec<_> = (1..=3).map(|id| VenueProviderJob::new(id, 7, id * 10)).collect();
        queues.push_provider_jobs(&jobs).await.unwrap();

        let report = dispatcher.tick().await.unwrap();
        assert_eq!(report.dispatched, 3);
        assert!(report.waits >= 1);
        assert!(runner.max_seen.load(Ordering::SeqCst) <= 2);
        assert_eq!(*runner.started.lock().unwrap(), vec![1, 2, 3]);

        wait_for_idle(&queues).await;
        assert_eq!(queues.len(QueueName::VenueProvider).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_start_requeues_job_and_releases_token() {
        let (dispatcher, _runner, queues, _temp) = setup(Some(2));
        let jobs: Vec<_> = (1..=3).map(|id| VenueProviderJob::new(id, 7, 10)).collect();
        queues.push_provider_jobs(&jobs).await.unwrap();

        let report = dispatcher.tick().await.unwrap();
        assert_eq!(report.dispatched, 2);
        assert_eq!(report.requeued, 1);
        assert_eq!(queues.peek_provider_jobs(10).await.unwrap(), vec![jobs[1]]);

        wait_for_idle(&queues).await;
    }

    #[tokio::test]
    async fn test_job_already_in_flight_is_requeued() {
        let (dispatcher, runner, queues, _temp) = setup(None);
        let job = VenueProviderJob::new(9, 7, 10);
        queues.push_provider_jobs(&[job]).await.unwrap();
        queues.store().reserve_in_flight(9).await.unwrap();

        let report = dispatcher.tick().await.unwrap();
        assert_eq!(report.already_in_flight, 1);
        assert!(runner.started.lock().unwrap().is_empty());
        assert_eq!(queues.peek_provider_jobs(10).await.unwrap(), vec![job]);
    }

    #[tokio::test]
    async fn test_handle_is_recorded() {
        let (dispatcher, _runner, queues, _temp) = setup(None);
        queues
            .push_provider_jobs(&[VenueProviderJob::new(1, 7, 10)])
            .await
            .unwrap();

        dispatcher.tick().await.unwrap();
        let tokens = queues.store().list_in_flight().await.unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].handle.as_deref(), Some("test:1"));
    }

    #[tokio::test]
    async fn test_empty_queue_is_a_noop() {
        let (dispatcher, _runner, _queues, _temp) = setup(None);
        assert_eq!(dispatcher.tick().await.unwrap(), DispatchReport::default());
    }
}
