//! Key encoding and decoding for the RocksDB backend.
//!
//! Key formats:
//! - queue item: `q:{queue}:{sequence:020}` -> item
//! - queue index: `qi:{queue}:{item}` -> sequence
//! - set member: `s:{set}:{member}` -> empty
//! - snapshot: `snap:{entity_id:020}` -> JSON
//! - in-flight token: `inflight:{job_id:020}` -> JSON
//!
//! Sequences are zero-padded so that prefix iteration yields items in
//! push order.

use crate::store::{QueueName, SetName};

/// Key of a queued item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKey {
    pub queue: QueueName,
    /// Store-wide monotonic sequence
    pub sequence: u64,
}

impl QueueKey {
    pub fn new(queue: QueueName, sequence: u64) -> Self {
        Self { queue, sequence }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("q:{}:{:020}", self.queue, self.sequence).into_bytes()
    }

    /// Prefix covering every item of a queue
    pub fn prefix(queue: QueueName) -> Vec<u8> {
        format!("q:{}:", queue).into_bytes()
    }
}

/// Reverse index from a queued item to its sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueIndexKey<'a> {
    pub queue: QueueName,
    pub item: &'a str,
}

impl<'a> QueueIndexKey<'a> {
    pub fn new(queue: QueueName, item: &'a str) -> Self {
        Self { queue, item }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("qi:{}:{}", self.queue, self.item).into_bytes()
    }

    pub fn prefix(queue: QueueName) -> Vec<u8> {
        format!("qi:{}:", queue).into_bytes()
    }
}

/// Key of a set member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetMemberKey<'a> {
    pub set: SetName,
    pub member: &'a str,
}

impl<'a> SetMemberKey<'a> {
    pub fn new(set: SetName, member: &'a str) -> Self {
        Self { set, member }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("s:{}:{}", self.set, self.member).into_bytes()
    }

    pub fn prefix(set: SetName) -> Vec<u8> {
        format!("s:{}:", set).into_bytes()
    }
}

/// Key of an offer snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotKey {
    pub entity_id: i64,
}

impl SnapshotKey {
    pub fn new(entity_id: i64) -> Self {
        Self { entity_id }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("snap:{:020}", self.entity_id).into_bytes()
    }

    pub fn prefix() -> Vec<u8> {
        b"snap:".to_vec()
    }
}

/// Key of an in-flight token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlightKey {
    pub job_id: i64,
}

impl InFlightKey {
    pub fn new(job_id: i64) -> Self {
        Self { job_id }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("inflight:{:020}", self.job_id).into_bytes()
    }

    pub fn prefix() -> Vec<u8> {
        b"inflight:".to_vec()
    }
}

/// Key of the persisted queue sequence counter
pub const QUEUE_SEQUENCE_KEY: &[u8] = b"meta:queue_seq";

/// Key of the in-flight token counter
pub const IN_FLIGHT_COUNT_KEY: &[u8] = b"meta:in_flight_count";

/// Key of a queue's length counter
pub fn queue_len_key(queue: QueueName) -> Vec<u8> {
    format!("meta:len:{}", queue).into_bytes()
}
