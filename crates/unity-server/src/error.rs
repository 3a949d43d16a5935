//! Server error types with HTTP status mapping

use serde::Serialize;
use std::net::SocketAddr;
use unity_core::{NameError, SlotIndex};
use unity_store::StoreError;
use warp::http::StatusCode;

/// Leaves server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Name failed validation
    #[error("invalid name: {0}")]
    InvalidName(#[from] NameError),

    /// `leafIndex` outside the slot space
    #[error("leafIndex {0} is outside the tree")]
    SlotOutOfRange(i64),

    /// Another leaf already holds the slot
    #[error("slot {0} is already taken")]
    SlotTaken(SlotIndex),

    /// Backing store failed
    #[error("store error: {0}")]
    Store(StoreError),

    /// Listener could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: warp::Error,
    },
}

impl ServerError {
    /// HTTP status for the response
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidName(_) | Self::SlotOutOfRange(_) => StatusCode::BAD_REQUEST,
            Self::SlotTaken(_) => StatusCode::CONFLICT,
            Self::Store(_) => StatusCode::BAD_GATEWAY,
            Self::Bind { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if the client sent something unacceptable
    #[inline]
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::SlotTaken(slot) => Self::SlotTaken(slot),
            other => Self::Store(other),
        }
    }
}

impl warp::reject::Reject for ServerError {}

/// JSON error body
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            status: status.as_u16(),
        }
    }
}
