//! Eligibility rules: decide what a change means for the index.
//!
//! Indexed-set membership decides between adding and deleting. The stored
//! snapshot only matters for provider updates of offers that are already
//! indexed and still bookable, where it lets unchanged offers be skipped.

use sync_types::IndexSnapshot;

/// What to do with one offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Nothing to send
    Skip,
    /// Add or replace the document
    Add,
    /// Remove the document
    Delete,
}

/// Decide the index action for one offer.
///
/// `current` is the projection the offer would be indexed with now, `None`
/// when it is not bookable. `previous` is the stored snapshot, if any.
pub fn decide(
    current: Option<&IndexSnapshot>,
    indexed: bool,
    previous: Option<&IndexSnapshot>,
    from_provider_update: bool,
) -> Decision {
    let Some(current) = current else {
        return if indexed {
            Decision::Delete
        } else {
            Decision::Skip
        };
    };

    if !from_provider_update || !indexed {
        return Decision::Add;
    }

    match previous {
        Some(previous) if previous == current => Decision::Skip,
        _ => Decision::Add,
    }
}
