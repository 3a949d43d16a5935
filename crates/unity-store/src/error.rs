//! Error types for the store adapters

use crate::config::Backend;
use unity_core::SlotIndex;

/// Store adapter errors
///
/// Only the write path surfaces these to callers. Reads fail soft and
/// subscriptions reconnect on their own.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Transport failure
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with an unexpected status
    #[error("unexpected status: {0}")]
    Status(reqwest::StatusCode),

    /// Store enforces slot uniqueness and the slot is already recorded
    #[error("slot {0} is already taken")]
    SlotTaken(SlotIndex),

    /// Payload could not be decoded
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Network backend selected without a URL
    #[error("backend {0} requires a base url")]
    MissingUrl(Backend),

    /// Store rejected the record itself
    #[error("rejected: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Check if the error reports a duplicate slot
    #[inline]
    #[must_use]
    pub fn is_slot_conflict(&self) -> bool {
        matches!(self, Self::SlotTaken(_))
    }

    /// Check if retrying the same request might succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Status(status) => status.is_server_error(),
            _ => false,
        }
    }
}
