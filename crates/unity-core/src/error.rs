//! Error types for Unity Core
//!
//! Covers the failures a local submission can hit before any network I/O:
//! - Invalid visitor names
//! - Submissions made before the tree finished loading
//! - Exhaustion of the unreserved slot range
//! - Inconsistent slot space configuration

use crate::slot::SlotIndex;

/// Name validation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    /// Name is empty after trimming
    #[error("please enter a name")]
    Empty,

    /// Name is shorter than the minimum
    #[error("name must be at least {min} characters long")]
    TooShort { min: usize },

    /// Name is longer than the maximum
    #[error("name must be at most {max} characters long")]
    TooLong { max: usize },
}

/// Reasons a submission is rejected by the reconciler
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    /// Tree has not finished its initial load
    #[error("tree is not ready (phase: {0:?})")]
    NotReady(crate::reconciler::Phase),

    /// Name failed validation
    #[error("invalid name: {0}")]
    InvalidName(#[from] NameError),

    /// Every unreserved slot is occupied
    #[error("all leaves have been used")]
    TreeFull,

    /// Commit or abandon for a slot that has no submission in flight
    #[error("no submission in flight for slot {0}")]
    UnknownSubmission(SlotIndex),
}

impl ReconcileError {
    /// Check if the error is a user-facing rejection (as opposed to a sequencing bug)
    #[inline]
    #[must_use]
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Self::InvalidName(_) | Self::TreeFull)
    }
}

/// Slot space configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Tree has no slots at all
    #[error("slot space must contain at least one slot")]
    EmptySpace,

    /// Reserved range is larger than the space
    #[error("reserved slots ({reserved}) exceed total slots ({total})")]
    ReservedExceedsTotal { total: u16, reserved: u16 },
}

/// Local persistence errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Filesystem failure
    #[error("cache i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot could not be encoded
    #[error("cache encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}
