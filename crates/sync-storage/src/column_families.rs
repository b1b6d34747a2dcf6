//! Column family definitions for RocksDB.
//!
//! - queues: queued items ordered by a store-wide sequence
//! - queue_index: item -> sequence, for duplicate detection and removal
//! - sets: set membership (indexed ids)
//! - snapshots: last indexed projection per offer
//! - in_flight: provider job tokens
//! - meta: counters

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for queued items
pub const CF_QUEUES: &str = "queues";

/// Column family name for the item -> sequence index of queues
pub const CF_QUEUE_INDEX: &str = "queue_index";

/// Column family name for set members
pub const CF_SETS: &str = "sets";

/// Column family name for index snapshots
pub const CF_SNAPSHOTS: &str = "snapshots";

/// Column family name for in-flight provider job tokens
pub const CF_IN_FLIGHT: &str = "in_flight";

/// Column family name for store metadata
pub const CF_META: &str = "meta";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[
    CF_QUEUES,
    CF_QUEUE_INDEX,
    CF_SETS,
    CF_SNAPSHOTS,
    CF_IN_FLIGHT,
    CF_META,
];

/// Snapshots are rewritten on every provider update
fn snapshots_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_QUEUES, Options::default()),
        ColumnFamilyDescriptor::new(CF_QUEUE_INDEX, Options::default()),
        ColumnFamilyDescriptor::new(CF_SETS, Options::default()),
        ColumnFamilyDescriptor::new(CF_SNAPSHOTS, snapshots_options()),
        ColumnFamilyDescriptor::new(CF_IN_FLIGHT, Options::default()),
        ColumnFamilyDescriptor::new(CF_META, Options::default()),
    ]
}
