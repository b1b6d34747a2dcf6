//! Scheduled jobs for the synchronization drivers.
//!
//! - **event_drain**: drain event-driven offer ids
//! - **venue_resync**: reindex the offers of queued venues
//! - **dispatch**: start workers for queued provider imports
//! - **expiration_sweep**: remove recently expired offers
//! - **error_retry**: retry ids whose indexing failed
//! - **full_resync**: rebuild from the whole catalog (off by default)

pub mod sync;

pub use sync::register_sync_jobs;
