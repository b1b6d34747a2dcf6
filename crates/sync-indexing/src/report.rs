//! Per-batch and per-run results.

use std::fmt;

/// Which index call a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePhase {
    Add,
    Delete,
}

impl fmt::Display for FailurePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePhase::Add => write!(f, "add"),
            FailurePhase::Delete => write!(f, "delete"),
        }
    }
}

/// A transient index failure, already handled by requeueing ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFailure {
    pub phase: FailurePhase,
    /// Ids pushed to the error queue because of this failure
    pub requeued: usize,
    pub error: String,
}

/// Overall outcome of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Ok,
    /// At least one index call failed; its ids are in the error queue
    TransientError,
}

/// Result of one indexer batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Documents the index accepted
    pub added: usize,
    /// Documents the index removed
    pub deleted: usize,
    /// Offers that needed no index call
    pub skipped: usize,
    pub failures: Vec<IndexFailure>,
}

impl BatchReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&mut self, phase: FailurePhase, requeued: usize, error: impl fmt::Display) {
        self.failures.push(IndexFailure {
            phase,
            requeued,
            error: error.to_string(),
        });
    }

    pub fn outcome(&self) -> BatchOutcome {
        if self.failures.is_empty() {
            BatchOutcome::Ok
        } else {
            BatchOutcome::TransientError
        }
    }

    /// Ids pushed to the error queue by this batch
    pub fn requeued(&self) -> usize {
        self.failures.iter().map(|f| f.requeued).sum()
    }

    pub fn merge(&mut self, other: &BatchReport) {
        self.added += other.added;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.failures.extend(other.failures.iter().cloned());
    }
}

/// Result of one driver invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverReport {
    /// Batches sent through the indexer
    pub batches: usize,
    /// Ids read from queues or catalog pages
    pub ids_seen: usize,
    pub totals: BatchReport,
    /// Provider jobs or venues that could not be completed
    pub failed_units: usize,
}

impl DriverReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_batch(&mut self, ids_seen: usize, batch: &BatchReport) {
        self.batches += 1;
        self.ids_seen += ids_seen;
        self.totals.merge(batch);
    }

    pub fn merge(&mut self, other: &DriverReport) {
        self.batches += other.batches;
        self.ids_seen += other.ids_seen;
        self.totals.merge(&other.totals);
        self.failed_units += other.failed_units;
    }

    pub fn is_clean(&self) -> bool {
        self.failed_units == 0 && self.totals.outcome() == BatchOutcome::Ok
    }
}

impl fmt::Display for DriverReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} batches, {} ids, {} added, {} deleted, {} skipped, {} requeued, {} failed units",
            self.batches,
            self.ids_seen,
            self.totals.added,
            self.totals.deleted,
            self.totals.skipped,
            self.totals.requeued(),
            self.failed_units
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_outcome() {
        let mut report = BatchReport::new();
        assert_eq!(report.outcome(), BatchOutcome::Ok);

        report.record_failure(FailurePhase::Add, 3, "503");
        assert_eq!(report.outcome(), BatchOutcome::TransientError);
        assert_eq!(report.requeued(), 3);
        assert_eq!(report.failures[0].error, "503");
    }

    #[test]
    fn test_batch_merge() {
        let mut first = BatchReport {
            added: 2,
            deleted: 1,
            skipped: 4,
            failures: vec![],
        };
        let mut second = BatchReport {
            added: 1,
            ..Default::default()
        };
        second.record_failure(FailurePhase::Delete, 1, "timeout");

        first.merge(&second);
        assert_eq!(first.added, 3);
        assert_eq!(first.deleted, 1);
        assert_eq!(first.skipped, 4);
        assert_eq!(first.requeued(), 1);
    }

    #[test]
    fn test_driver_report() {
        let mut report = DriverReport::new();
        report.record_batch(3, &BatchReport { added: 3, ..Default::default() });
        report.record_batch(2, &BatchReport { skipped: 2, ..Default::default() });
        assert_eq!(report.batches, 2);
        assert_eq!(report.ids_seen, 5);
        assert!(report.is_clean());

        report.failed_units += 1;
        assert!(!report.is_clean());
        assert!(report.to_string().contains("3 added"));
    }
}
