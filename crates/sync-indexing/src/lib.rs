//! Synchronization pipeline between the offer catalog and the search index.
//!
//! ## Key Components
//!
//! - [`decide`]: pure eligibility and diff rules
//! - [`SearchIndex`]: bulk add/delete/clear against the hosted index
//! - [`BatchIndexer`]: resolves offers, diffs them and commits the result
//! - [`Synchronizer`]: the drivers, selected by a [`SyncTrigger`]
//! - [`Dispatcher`]: admission-controlled start of provider workers
//! - [`JobRunner`]: task or process workers for provider jobs
//!
//! ## Flow
//!
//! 1. Producers push offer, venue and provider job ids into queues
//! 2. Drivers pop queues or page the catalog in bounded batches
//! 3. The indexer diffs each batch against the snapshot store
//! 4. Index calls that succeed update snapshots and the indexed set
//! 5. Ids of failed calls land in the error queue for the next retry tick
//!
//! ## Example
//!
//! ```ignore
//! use sync_indexing::{DrainMode, SyncConfig, SyncTrigger, Synchronizer};
//!
//! let sync = Synchronizer::new(catalog, index, queues, SyncConfig::default());
//! let report = sync.run(SyncTrigger::EventDriven(DrainMode::Cron)).await?;
//! println!("{report}");
//! ```

pub mod dispatcher;
pub mod drivers;
pub mod error;
pub mod indexer;
pub mod report;
pub mod rules;
pub mod runner;
pub mod search_index;

pub use dispatcher::{DispatchReport, Dispatcher, DispatcherConfig};
pub use drivers::{DrainMode, SyncConfig, SyncTrigger, Synchronizer};
pub use error::IndexingError;
pub use indexer::BatchIndexer;
pub use report::{BatchOutcome, BatchReport, DriverReport, FailurePhase, IndexFailure};
pub use rules::{decide, Decision};
pub use runner::{JobRunner, ProcessJobRunner, RunnerError, TaskJobRunner};
pub use search_index::{
    HttpSearchIndex, MockSearchIndex, SearchIndex, SearchIndexCall, SearchIndexError,
};
