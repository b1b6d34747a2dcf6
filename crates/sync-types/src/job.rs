//! Provider resynchronization jobs and their in-flight tokens.
//!
//! A connector enqueues a [`VenueProviderJob`] when a provider has new data
//! for a venue. The dispatcher reserves an [`InFlightToken`] for the job,
//! starts a worker and records the worker handle on the token. The worker
//! releases the token when it finishes, whatever the outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::{ProviderId, VenueId};

/// Resynchronize every offer a provider feeds into a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VenueProviderJob {
    /// Identifier of the venue/provider link, unique per job
    pub job_id: i64,
    pub provider_id: ProviderId,
    pub venue_id: VenueId,
}

impl VenueProviderJob {
    pub fn new(job_id: i64, provider_id: ProviderId, venue_id: VenueId) -> Self {
        Self {
            job_id,
            provider_id,
            venue_id,
        }
    }

    /// Queue item encoding
    pub fn to_item(&self) -> Result<String, SyncError> {
        serde_json::to_string(self).map_err(SyncError::from)
    }

    /// Decode a queue item
    pub fn from_item(item: &str) -> Result<Self, SyncError> {
        serde_json::from_str(item).map_err(SyncError::from)
    }
}

impl std::fmt::Display for VenueProviderJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "job {} (provider {}, venue {})",
            self.job_id, self.provider_id, self.venue_id
        )
    }
}

/// Marker that a provider job is held by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightToken {
    pub job_id: i64,

    /// Worker handle returned by the job runner, `None` while the worker starts
    pub handle: Option<String>,

    /// When the token was reserved (milliseconds since epoch)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub dispatched_at: DateTime<Utc>,
}

impl InFlightToken {
    /// A token reserved for a worker that has not started yet.
    pub fn pending(job_id: i64) -> Self {
        Self {
            job_id,
            handle: None,
            dispatched_at: Utc::now(),
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        serde_json::to_vec(self).map_err(SyncError::from)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        serde_json::from_slice(bytes).map_err(SyncError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_item_encoding() {
        let job = VenueProviderJob::new(7, 3, 12);
        let item = job.to_item().unwrap();
        assert_eq!(item, r#"{"job_id":7,"provider_id":3,"venue_id":12}"#);
        assert_eq!(VenueProviderJob::from_item(&item).unwrap(), job);
    }

    #[test]
    fn test_job_rejects_garbage() {
        assert!(VenueProviderJob::from_item("not json").is_err());
    }

    #[test]
    fn test_job_display() {
        let job = VenueProviderJob::new(7, 3, 12);
        assert_eq!(job.to_string(), "job 7 (provider 3, venue 12)");
    }

    #[test]
    fn test_pending_token_has_no_handle() {
        let token = InFlightToken::pending(9);
        assert_eq!(token.job_id, 9);
        assert!(token.handle.is_none());

        let started = token.with_handle("task:abc");
        assert_eq!(started.handle.as_deref(), Some("task:abc"));

        let decoded = InFlightToken::from_bytes(&started.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.handle.as_deref(), Some("task:abc"));
    }
}
