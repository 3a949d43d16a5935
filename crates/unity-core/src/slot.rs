//! Slot space
//!
//! A tree has `total` leaf positions. The top `reserved` of them carry
//! pre-baked decorative leaves and are never handed out by the allocator.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Default number of leaf positions on the tree
pub const DEFAULT_TOTAL_SLOTS: u16 = 170;

/// Default size of the decorative reserved range at the top of the space
pub const DEFAULT_RESERVED_SLOTS: u16 = 40;

/// Position of one leaf on the tree
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SlotIndex(pub u16);

impl SlotIndex {
    /// Raw index value
    #[inline]
    #[must_use]
    pub fn get(self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<SlotIndex> for i64 {
    fn from(slot: SlotIndex) -> Self {
        i64::from(slot.0)
    }
}

/// The static domain of leaf positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSpace {
    total: u16,
    reserved: u16,
}

impl SlotSpace {
    /// Create a slot space of `total` positions with the top `reserved` excluded
    ///
    /// # Errors
    /// - `ConfigError::EmptySpace` if `total` is zero
    /// - `ConfigError::ReservedExceedsTotal` if `reserved > total`
    pub fn new(total: u16, reserved: u16) -> Result<Self, ConfigError> {
        if total == 0 {
            return Err(ConfigError::EmptySpace);
        }
        if reserved > total {
            return Err(ConfigError::ReservedExceedsTotal { total, reserved });
        }
        Ok(Self { total, reserved })
    }

    /// Total number of positions
    #[inline]
    #[must_use]
    pub fn total(&self) -> u16 {
        self.total
    }

    /// Size of the reserved range
    #[inline]
    #[must_use]
    pub fn reserved(&self) -> u16 {
        self.reserved
    }

    /// First index of the reserved range (one past the last allocatable index)
    #[inline]
    #[must_use]
    pub fn allocatable_end(&self) -> u16 {
        self.total - self.reserved
    }

    /// Indices the allocator may hand out
    #[inline]
    #[must_use]
    pub fn allocatable(&self) -> Range<u16> {
        0..self.allocatable_end()
    }

    /// Check that a slot lies inside the space
    #[inline]
    #[must_use]
    pub fn contains(&self, slot: SlotIndex) -> bool {
        slot.0 < self.total
    }

    /// Check that a slot lies in the decorative reserved range
    #[inline]
    #[must_use]
    pub fn is_reserved(&self, slot: SlotIndex) -> bool {
        self.contains(slot) && slot.0 >= self.allocatable_end()
    }

    /// Convert a raw index observed on the wire into a slot of this space
    #[must_use]
    pub fn slot(&self, raw: i64) -> Option<SlotIndex> {
        u16::try_from(raw)
            .ok()
            .map(SlotIndex)
            .filter(|slot| self.contains(*slot))
    }
}

impl Default for SlotSpace {
    fn default() -> Self {
        Self {
            total: DEFAULT_TOTAL_SLOTS,
            reserved: DEFAULT_RESERVED_SLOTS,
        }
    }
}
