//! Error types for the tree service

use unity_core::ReconcileError;
use unity_store::StoreError;

/// Submission and service errors
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Refused before anything was written
    #[error(transparent)]
    Rejected(#[from] ReconcileError),

    /// The store write failed; nothing was added
    #[error("store write failed: {0}")]
    Store(#[from] StoreError),

    /// Every attempt hit a slot another client had just taken
    #[error("slot still taken after {attempts} attempts")]
    Conflict { attempts: u32 },

    /// The service task has stopped
    #[error("tree service stopped")]
    Closed,
}

impl SyncError {
    /// Check if the message is meant for the person submitting
    #[inline]
    #[must_use]
    pub fn is_user_facing(&self) -> bool {
        match self {
            Self::Rejected(e) => e.is_user_facing(),
            Self::Conflict { .. } => true,
            _ => false,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
