//! Occupancy view
//!
//! The in-memory record of which slots are taken and by whom. Occupied slots
//! and names live in one ordered map, so the set of occupied slots and the
//! slot-to-name mapping cannot drift apart.
//!
//! Mutation is crate-private: only the reconciler places leaves.

use crate::slot::{SlotIndex, SlotSpace};
use std::collections::BTreeMap;

/// Result of placing a leaf into the view
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Placement {
    /// Slot was free and now holds the leaf
    Added,
    /// Slot already held a leaf; view unchanged
    Occupied,
    /// Slot lies outside the space; view unchanged
    OutOfRange,
}

/// Slots currently known to be taken, with the name on each leaf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationView {
    space: SlotSpace,
    names: BTreeMap<SlotIndex, String>,
    /// Every slot below this index is occupied
    next_candidate: u16,
}

impl AllocationView {
    /// Create an empty view over a slot space
    #[inline]
    #[must_use]
    pub fn new(space: SlotSpace) -> Self {
        Self {
            space,
            names: BTreeMap::new(),
            next_candidate: 0,
        }
    }

    /// Slot space this view covers
    #[inline]
    #[must_use]
    pub fn space(&self) -> SlotSpace {
        self.space
    }

    /// Number of occupied slots
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Check if a slot is occupied
    #[inline]
    #[must_use]
    pub fn contains(&self, slot: SlotIndex) -> bool {
        self.names.contains_key(&slot)
    }

    /// Name on the leaf at `slot`
    #[inline]
    #[must_use]
    pub fn name_of(&self, slot: SlotIndex) -> Option<&str> {
        self.names.get(&slot).map(String::as_str)
    }

    /// Occupied slots in ascending order
    pub fn occupied(&self) -> impl Iterator<Item = SlotIndex> + '_ {
        self.names.keys().copied()
    }

    /// `(slot, name)` pairs in ascending slot order
    pub fn iter(&self) -> impl Iterator<Item = (SlotIndex, &str)> {
        self.names.iter().map(|(slot, name)| (*slot, name.as_str()))
    }

    /// Scan hint: lowest index that might be free
    #[inline]
    #[must_use]
    pub fn next_candidate(&self) -> u16 {
        self.next_candidate
    }

    /// Free slots left in the unreserved range
    #[must_use]
    pub fn free_allocatable(&self) -> usize {
        let taken = self
            .names
            .range(SlotIndex(0)..SlotIndex(self.space.allocatable_end()))
            .count();
        usize::from(self.space.allocatable_end()) - taken
    }

    pub(crate) fn place(&mut self, slot: SlotIndex, name: &str) -> Placement {
        if !self.space.contains(slot) {
            return Placement::OutOfRange;
        }
        if self.names.contains_key(&slot) {
            return Placement::Occupied;
        }
        self.names.insert(slot, name.to_string());
        if slot.0 == self.next_candidate {
            self.advance_candidate();
        }
        Placement::Added
    }

    /// Rebuild a view from trusted entries (snapshot restore)
    pub(crate) fn from_entries(
        space: SlotSpace,
        entries: impl IntoIterator<Item = (SlotIndex, String)>,
    ) -> Self {
        let mut view = Self::new(space);
        for (slot, name) in entries {
            if space.contains(slot) {
                view.names.insert(slot, name);
            }
        }
        view.advance_candidate();
        view
    }

    fn advance_candidate(&mut self) {
        while self.next_candidate < self.space.total()
            && self.names.contains_key(&SlotIndex(self.next_candidate))
        {
            self.next_candidate += 1;
        }
    }
}
