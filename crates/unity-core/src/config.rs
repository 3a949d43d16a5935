//! Tree configuration

use crate::error::ConfigError;
use crate::slot::{SlotSpace, DEFAULT_RESERVED_SLOTS, DEFAULT_TOTAL_SLOTS};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconciler and slot space settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Leaf positions on the tree
    pub total_slots: u16,
    /// Decorative positions at the top of the space
    pub reserved_slots: u16,
    /// How long a locally written slot is remembered for echo detection
    pub settle_window_ms: u64,
    /// Local submissions kept in the recent-additions list
    pub recent_capacity: usize,
    /// Refresh-and-retry attempts after the store rejects a duplicate slot
    pub max_conflict_retries: u32,
}

impl TreeConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a different slot space shape
    #[inline]
    #[must_use]
    pub fn with_slots(mut self, total: u16, reserved: u16) -> Self {
        self.total_slots = total;
        self.reserved_slots = reserved;
        self
    }

    /// With a different settle window
    #[inline]
    #[must_use]
    pub fn with_settle_window(mut self, window: Duration) -> Self {
        self.settle_window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With a different conflict retry budget
    #[inline]
    #[must_use]
    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Validated slot space
    ///
    /// # Errors
    /// See [`SlotSpace::new`]
    pub fn slot_space(&self) -> Result<SlotSpace, ConfigError> {
        SlotSpace::new(self.total_slots, self.reserved_slots)
    }

    #[inline]
    #[must_use]
    pub fn settle_window(&self) -> Duration {
        Duration::from_millis(self.settle_window_ms)
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            total_slots: DEFAULT_TOTAL_SLOTS,
            reserved_slots: DEFAULT_RESERVED_SLOTS,
            settle_window_ms: 1000,
            recent_capacity: 10,
            max_conflict_retries: 3,
        }
    }
}
