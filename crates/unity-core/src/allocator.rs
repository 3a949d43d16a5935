//! Slot allocator
//!
//! Lowest free index in the unreserved range wins. The policy is
//! deterministic, so two clients looking at the same view pick the same
//! slot; collisions across clients are detected later, not prevented here.

use crate::slot::SlotIndex;
use crate::view::AllocationView;
use std::collections::BTreeSet;

/// Outcome of an allocation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    /// First free slot
    Slot(SlotIndex),
    /// No free slot left in the unreserved range
    Full,
}

impl Allocation {
    #[inline]
    #[must_use]
    pub fn slot(self) -> Option<SlotIndex> {
        match self {
            Self::Slot(slot) => Some(slot),
            Self::Full => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_full(self) -> bool {
        matches!(self, Self::Full)
    }
}

/// Pick the lowest unoccupied slot in the unreserved range
#[must_use]
pub fn allocate(view: &AllocationView) -> Allocation {
    allocate_excluding(view, &BTreeSet::new())
}

/// Like [`allocate`], also skipping slots claimed by in-flight submissions
#[must_use]
pub fn allocate_excluding(view: &AllocationView, claimed: &BTreeSet<SlotIndex>) -> Allocation {
    let end = view.space().allocatable_end();
    (view.next_candidate()..end)
        .map(SlotIndex)
        .find(|slot| !view.contains(*slot) && !claimed.contains(slot))
        .map_or(Allocation::Full, Allocation::Slot)
}
