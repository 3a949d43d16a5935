//! Leaf records
//!
//! The shape of one stored leaf as it travels between the shared store and
//! every client. Field names on the wire follow the `leaves` collection:
//! `name`, `city`, `leafIndex` (older writers used `slotIndex`) and
//! `created_at`.

use crate::error::NameError;
use crate::slot::SlotIndex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// City recorded when a visitor leaves the field blank
pub const UNKNOWN_CITY: &str = "Unknown";

/// Minimum name length in characters, after trimming
pub const MIN_NAME_CHARS: usize = 2;

/// Maximum name length in characters, after trimming
pub const MAX_NAME_CHARS: usize = 50;

/// Opaque storage handle assigned by the store
///
/// Distinct from [`SlotIndex`]: the slot places a leaf, the id only locates
/// the stored row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    /// Wrap a store-provided key
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw key
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored leaf as returned by the store
///
/// `slot` is kept raw: legacy rows have none, and rows written by a
/// misbehaving client may carry an index outside the slot space. The
/// reconciler decides what to do with both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafRecord {
    pub id: RecordId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(
        rename = "leafIndex",
        alias = "slotIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub slot: Option<i64>,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
}

impl LeafRecord {
    /// City for display, falling back to the unknown sentinel
    #[must_use]
    pub fn display_city(&self) -> &str {
        self.city
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(UNKNOWN_CITY)
    }

    /// Whether the record predates explicit slot indices
    #[inline]
    #[must_use]
    pub fn is_legacy(&self) -> bool {
        self.slot.is_none()
    }
}

/// A leaf ready to be inserted (no store id yet)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLeaf {
    pub name: String,
    pub city: String,
    #[serde(rename = "leafIndex", alias = "slotIndex")]
    pub slot: SlotIndex,
    pub created_at: DateTime<Utc>,
}

impl NewLeaf {
    /// Build a leaf from a validated name
    #[must_use]
    pub fn new(name: LeafName, city: Option<&str>, slot: SlotIndex, created_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into_inner(),
            city: normalize_city(city),
            slot,
            created_at,
        }
    }

    /// Attach the store-assigned id
    #[must_use]
    pub fn into_record(self, id: RecordId) -> LeafRecord {
        LeafRecord {
            id,
            name: self.name,
            city: Some(self.city),
            slot: Some(i64::from(self.slot)),
            created_at: self.created_at,
        }
    }
}

/// A visitor name that passed validation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeafName(String);

impl LeafName {
    /// Trim and validate a submitted name
    ///
    /// # Errors
    /// - `NameError::Empty` for blank input
    /// - `NameError::TooShort` below [`MIN_NAME_CHARS`]
    /// - `NameError::TooLong` above [`MAX_NAME_CHARS`]
    pub fn parse(raw: &str) -> Result<Self, NameError> {
        let trimmed = raw.trim();
        let chars = trimmed.chars().count();
        if chars == 0 {
            return Err(NameError::Empty);
        }
        if chars < MIN_NAME_CHARS {
            return Err(NameError::TooShort { min: MIN_NAME_CHARS });
        }
        if chars > MAX_NAME_CHARS {
            return Err(NameError::TooLong { max: MAX_NAME_CHARS });
        }
        Ok(Self(trimmed.to_string()))
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Trimmed city, or [`UNKNOWN_CITY`] when absent or blank
#[must_use]
pub fn normalize_city(city: Option<&str>) -> String {
    city.map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(UNKNOWN_CITY)
        .to_string()
}
