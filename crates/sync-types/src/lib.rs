//! # sync-types
//!
//! Shared domain types for the offer search index synchronization pipeline.
//!
//! This crate defines the data structures exchanged between the queue store,
//! the catalog, the batch indexer and the dispatcher:
//! - Offers and stocks: the catalog view of a sellable entity
//! - Snapshots and documents: what was indexed, and what will be
//! - Venue provider jobs and in-flight tokens: bulk provider resynchronization
//! - Settings: layered configuration for the daemon
//!
//! ## Usage
//!
//! ```rust
//! use sync_types::{IndexSnapshot, Offer};
//!
//! let offer = Offer::new(42, "Concert");
//! assert!(IndexSnapshot::from_offer(&offer, chrono::Utc::now()).is_none());
//! ```

pub mod config;
pub mod error;
pub mod job;
pub mod offer;
pub mod snapshot;

pub use config::{
    CatalogSettings, DispatcherSettings, IndexingSettings, QueueBackend, QueueStoreSettings,
    RunnerKind, ScheduleSettings, SearchIndexSettings, Settings,
};
pub use error::SyncError;
pub use job::{InFlightToken, VenueProviderJob};
pub use offer::{Offer, Stock};
pub use snapshot::{IndexDocument, IndexSnapshot};

/// Opaque identifier of a sellable offer.
pub type EntityId = i64;

/// Identifier of a venue owning offers.
pub type VenueId = i64;

/// Identifier of a content provider feeding offers into a venue.
pub type ProviderId = i64;
