//! Reconciler
//!
//! The single owner of the occupancy view. Three sources feed it:
//! - the locally cached snapshot (warm start only),
//! - the full remote listing fetched at startup,
//! - the live stream of inserts pushed by the store.
//!
//! Local submissions are two-step. [`Reconciler::begin_submit`] validates
//! the name and claims the lowest free slot; the caller writes the leaf to
//! the store and then calls [`Reconciler::commit_submit`] on success or
//! [`Reconciler::abandon_submit`] on failure. The view only changes on
//! commit, so a failed write never leaves a phantom leaf behind.
//!
//! # State machine
//! ```text
//! Uninitialized --begin_loading--> Loading --finish_loading--> Ready
//! ```

use crate::allocator::{allocate_excluding, Allocation};
use crate::config::TreeConfig;
use crate::error::{ConfigError, ReconcileError};
use crate::persistence::LocalPersistence;
use crate::record::{LeafName, LeafRecord, NewLeaf, RecordId};
use crate::slot::{SlotIndex, SlotSpace};
use crate::view::{AllocationView, Placement};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Nothing loaded yet
    Uninitialized,
    /// Waiting for the remote listing
    Loading,
    /// Listing applied; live updates flowing
    Ready,
}

/// One of this client's own submissions, kept for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentAddition {
    pub name: String,
    pub slot: SlotIndex,
    pub added_at: DateTime<Utc>,
}

/// Reconciliation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Pushed records added to the view
    pub pushes_applied: u64,
    /// Pushes recognised as echoes of this client's writes
    pub echoes_suppressed: u64,
    /// Pushes repeating a record already in the view
    pub duplicates_dropped: u64,
    /// Two different names recorded against one slot
    pub collisions: u64,
    /// Records whose slot lies outside the slot space
    pub out_of_range_dropped: u64,
    /// Legacy records given a slot by position or allocation
    pub legacy_placed: u64,
}

/// What happened to a listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Records placed into the view
    pub placed: usize,
    /// Of those, legacy records placed by position
    pub legacy: usize,
    /// Records dropped for an out-of-range slot
    pub out_of_range: usize,
    /// Records skipped because their slot was already taken
    pub duplicates: usize,
    /// Leaves added to the view, in listing order
    pub added: Vec<PlacedLeaf>,
}

/// What happened to a pushed record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Added to the view
    Applied(SlotIndex),
    /// Echo of this client's own recent write; view unchanged
    Echo(SlotIndex),
    /// Same name already on that slot; view unchanged
    Duplicate(SlotIndex),
    /// A different name already holds that slot; view unchanged
    Collision { slot: SlotIndex, kept: String },
    /// Slot outside the space; dropped
    OutOfRange(i64),
    /// Legacy record with no free slot left; dropped
    NoFreeSlot,
    /// Arrived before the tree was ready; dropped
    Ignored(Phase),
}

/// Result of committing a confirmed submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Commit {
    /// Leaf shown on its slot
    Placed(SlotIndex),
    /// Another client's leaf reached the slot first; the write is stored
    /// upstream but the view keeps the earlier name
    Shadowed { slot: SlotIndex, by: String },
}

impl Commit {
    #[inline]
    #[must_use]
    pub fn slot(&self) -> SlotIndex {
        match self {
            Self::Placed(slot) | Self::Shadowed { slot, .. } => *slot,
        }
    }
}

/// A leaf on the tree, as exposed to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedLeaf {
    pub slot: SlotIndex,
    pub name: String,
}

/// Read-only copy of the reconciler state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub phase: Phase,
    pub total_slots: u16,
    pub reserved_slots: u16,
    pub next_candidate: u16,
    pub free_slots: usize,
    pub leaves: Vec<PlacedLeaf>,
    pub recent: Vec<RecentAddition>,
    pub stats: SyncStats,
}

/// Owner of the occupancy view
#[derive(Debug)]
pub struct Reconciler {
    phase: Phase,
    config: TreeConfig,
    space: SlotSpace,
    view: AllocationView,
    persistence: LocalPersistence,
    /// Slots claimed by submissions whose insert has not completed
    in_flight: BTreeMap<SlotIndex, String>,
    /// Slots this client wrote recently, for echo detection
    settling: HashMap<SlotIndex, (String, Instant)>,
    /// Slots given to legacy records; never re-derived once assigned
    legacy_slots: HashMap<RecordId, SlotIndex>,
    recent: VecDeque<RecentAddition>,
    stats: SyncStats,
}

impl Reconciler {
    /// Create a reconciler in the `Uninitialized` phase
    ///
    /// # Errors
    /// Invalid slot space in `config`
    pub fn new(config: TreeConfig, persistence: LocalPersistence) -> Result<Self, ConfigError> {
        let space = config.slot_space()?;
        Ok(Self {
            phase: Phase::Uninitialized,
            config,
            space,
            view: AllocationView::new(space),
            persistence,
            in_flight: BTreeMap::new(),
            settling: HashMap::new(),
            legacy_slots: HashMap::new(),
            recent: VecDeque::new(),
            stats: SyncStats::default(),
        })
    }

    #[inline]
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[inline]
    #[must_use]
    pub fn view(&self) -> &AllocationView {
        &self.view
    }

    #[inline]
    #[must_use]
    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Slots claimed by submissions still in flight
    #[must_use]
    pub fn in_flight(&self) -> BTreeSet<SlotIndex> {
        self.in_flight.keys().copied().collect()
    }

    /// Enter `Loading`, seeding the view from the local snapshot
    ///
    /// Returns whether a cached view was restored. Calling this outside
    /// `Uninitialized` does nothing.
    pub fn begin_loading(&mut self) -> bool {
        if self.phase != Phase::Uninitialized {
            return false;
        }
        self.phase = Phase::Loading;
        match self.persistence.load(self.space) {
            Some(view) => {
                tracing::info!(leaves = view.len(), "Restored cached tree state");
                self.view = view;
                true
            }
            None => false,
        }
    }

    /// Replace the view with the remote listing and enter `Ready`
    ///
    /// The listing is ordered by creation time. Legacy records take their
    /// position in the listing as their slot.
    pub fn finish_loading(&mut self, listing: &[LeafRecord]) -> LoadSummary {
        let mut view = AllocationView::new(self.space);
        self.legacy_slots.clear();
        let summary = self.apply_listing(&mut view, listing);
        self.view = view;
        self.phase = Phase::Ready;
        tracing::info!(
            leaves = self.view.len(),
            legacy = summary.legacy,
            dropped = summary.out_of_range,
            duplicates = summary.duplicates,
            "Loaded existing leaves"
        );
        self.persist();
        summary
    }

    /// Add any listed records missing from the view, keeping what is there
    pub fn merge_listing(&mut self, listing: &[LeafRecord]) -> LoadSummary {
        let mut view = std::mem::replace(&mut self.view, AllocationView::new(self.space));
        let summary = self.apply_listing(&mut view, listing);
        self.view = view;
        if summary.placed > 0 {
            tracing::debug!(added = summary.placed, "Merged refreshed listing");
            self.persist();
        }
        summary
    }

    fn apply_listing(&mut self, view: &mut AllocationView, listing: &[LeafRecord]) -> LoadSummary {
        let mut summary = LoadSummary::default();
        for (position, record) in listing.iter().enumerate() {
            if let Some(slot) = self.legacy_slot_of(record) {
                tracing::debug!(%slot, name = %record.name, "Legacy record already placed");
                summary.duplicates += 1;
                continue;
            }
            let raw = record
                .slot
                .unwrap_or_else(|| i64::try_from(position).unwrap_or(i64::MAX));
            let Some(slot) = self.space.slot(raw) else {
                tracing::warn!(slot = raw, name = %record.name, "Invalid leafIndex, dropping record");
                summary.out_of_range += 1;
                self.stats.out_of_range_dropped += 1;
                continue;
            };
            match view.place(slot, &record.name) {
                Placement::Added => {
                    summary.placed += 1;
                    summary.added.push(PlacedLeaf {
                        slot,
                        name: record.name.clone(),
                    });
                    if record.is_legacy() {
                        tracing::debug!(%slot, name = %record.name, "Legacy record placed by position");
                        self.legacy_slots.insert(record.id.clone(), slot);
                        summary.legacy += 1;
                        self.stats.legacy_placed += 1;
                    }
                }
                Placement::Occupied => {
                    if view.name_of(slot) != Some(record.name.as_str()) {
                        tracing::warn!(
                            %slot,
                            kept = view.name_of(slot).unwrap_or_default(),
                            dropped = %record.name,
                            "Slot recorded twice upstream, keeping earliest"
                        );
                    }
                    summary.duplicates += 1;
                }
                Placement::OutOfRange => {
                    summary.out_of_range += 1;
                    self.stats.out_of_range_dropped += 1;
                }
            }
        }
        summary
    }

    /// Validate a submission and claim the lowest free slot
    ///
    /// # Errors
    /// - `ReconcileError::NotReady` before the listing has been applied
    /// - `ReconcileError::InvalidName` for names failing validation
    /// - `ReconcileError::TreeFull` when no unreserved slot is free
    pub fn begin_submit(
        &mut self,
        name: &str,
        city: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<NewLeaf, ReconcileError> {
        if self.phase != Phase::Ready {
            return Err(ReconcileError::NotReady(self.phase));
        }
        let name = LeafName::parse(name)?;
        let claimed = self.in_flight();
        let slot = match allocate_excluding(&self.view, &claimed) {
            Allocation::Slot(slot) => slot,
            Allocation::Full => return Err(ReconcileError::TreeFull),
        };
        self.in_flight.insert(slot, name.as_str().to_string());
        tracing::debug!(%slot, name = name.as_str(), "Claimed slot for submission");
        Ok(NewLeaf::new(name, city, slot, now))
    }

    /// Record a confirmed insert in the view
    ///
    /// # Errors
    /// `ReconcileError::UnknownSubmission` if `leaf` was not claimed by
    /// [`Reconciler::begin_submit`]
    pub fn commit_submit(&mut self, leaf: &NewLeaf, now: Instant) -> Result<Commit, ReconcileError> {
        if self.in_flight.remove(&leaf.slot).is_none() {
            return Err(ReconcileError::UnknownSubmission(leaf.slot));
        }
        self.settling.insert(leaf.slot, (leaf.name.clone(), now));
        self.recent.push_front(RecentAddition {
            name: leaf.name.clone(),
            slot: leaf.slot,
            added_at: leaf.created_at,
        });
        self.recent.truncate(self.config.recent_capacity);

        let commit = match self.view.place(leaf.slot, &leaf.name) {
            Placement::Added => Commit::Placed(leaf.slot),
            Placement::Occupied | Placement::OutOfRange => {
                let holder = self.view.name_of(leaf.slot).unwrap_or_default().to_string();
                if holder == leaf.name {
                    // echo arrived before the insert completed
                    Commit::Placed(leaf.slot)
                } else {
                    tracing::warn!(
                        slot = %leaf.slot,
                        kept = %holder,
                        written = %leaf.name,
                        "Slot taken by another client while our insert was in flight"
                    );
                    self.stats.collisions += 1;
                    Commit::Shadowed {
                        slot: leaf.slot,
                        by: holder,
                    }
                }
            }
        };
        tracing::info!(slot = %leaf.slot, name = %leaf.name, "Leaf added");
        self.persist();
        Ok(commit)
    }

    /// Release the claim of a submission whose insert failed
    ///
    /// # Errors
    /// `ReconcileError::UnknownSubmission` if nothing is claimed at `slot`
    pub fn abandon_submit(&mut self, slot: SlotIndex) -> Result<(), ReconcileError> {
        self.in_flight
            .remove(&slot)
            .map(|_| ())
            .ok_or(ReconcileError::UnknownSubmission(slot))
    }

    /// Apply a record pushed by the store
    pub fn on_remote_insert(&mut self, record: &LeafRecord, now: Instant) -> PushOutcome {
        if self.phase != Phase::Ready {
            tracing::debug!(phase = ?self.phase, name = %record.name, "Push before ready, ignoring");
            return PushOutcome::Ignored(self.phase);
        }
        self.prune_settling(now);

        if let Some(slot) = self.legacy_slot_of(record) {
            tracing::debug!(%slot, name = %record.name, "Legacy record already placed, skipping");
            self.stats.duplicates_dropped += 1;
            return PushOutcome::Duplicate(slot);
        }

        let slot = match record.slot {
            Some(raw) => match self.space.slot(raw) {
                Some(slot) => slot,
                None => {
                    tracing::warn!(slot = raw, name = %record.name, "Invalid leafIndex from subscription");
                    self.stats.out_of_range_dropped += 1;
                    return PushOutcome::OutOfRange(raw);
                }
            },
            None => match allocate_excluding(&self.view, &self.in_flight()) {
                Allocation::Slot(slot) => {
                    tracing::debug!(%slot, name = %record.name, "Legacy record in subscription, using next free slot");
                    self.stats.legacy_placed += 1;
                    self.legacy_slots.insert(record.id.clone(), slot);
                    slot
                }
                Allocation::Full => {
                    tracing::warn!(name = %record.name, "No free slot for legacy record");
                    return PushOutcome::NoFreeSlot;
                }
            },
        };

        if let Some(holder) = self.view.name_of(slot) {
            let holder = holder.to_string();
            let own_echo = self
                .settling
                .get(&slot)
                .is_some_and(|(name, _)| *name == record.name);
            return if own_echo {
                tracing::debug!(%slot, "Echo of own write suppressed");
                self.stats.echoes_suppressed += 1;
                PushOutcome::Echo(slot)
            } else if holder == record.name {
                tracing::debug!(%slot, "Leaf already exists, skipping");
                self.stats.duplicates_dropped += 1;
                PushOutcome::Duplicate(slot)
            } else {
                tracing::warn!(%slot, kept = %holder, pushed = %record.name, "Slot collision, keeping first leaf");
                self.stats.collisions += 1;
                PushOutcome::Collision { slot, kept: holder }
            };
        }

        if let Some(claimant) = self.in_flight.get(&slot) {
            if *claimant == record.name {
                tracing::debug!(%slot, "Echo arrived ahead of insert completion");
            } else {
                // counted by commit_submit if our write lands too
                tracing::warn!(%slot, ours = %claimant, theirs = %record.name, "Another client took our in-flight slot");
            }
        }

        // Occupancy was checked above; place cannot refuse an in-space slot here
        let _ = self.view.place(slot, &record.name);
        self.stats.pushes_applied += 1;
        tracing::info!(%slot, name = %record.name, "Adding new leaf from subscription");
        self.persist();
        PushOutcome::Applied(slot)
    }

    /// Copy the state out for display
    #[must_use]
    pub fn snapshot(&self) -> TreeSnapshot {
        TreeSnapshot {
            phase: self.phase,
            total_slots: self.space.total(),
            reserved_slots: self.space.reserved(),
            next_candidate: self.view.next_candidate(),
            free_slots: self.view.free_allocatable(),
            leaves: self
                .view
                .iter()
                .map(|(slot, name)| PlacedLeaf {
                    slot,
                    name: name.to_string(),
                })
                .collect(),
            recent: self.recent.iter().cloned().collect(),
            stats: self.stats,
        }
    }

    fn legacy_slot_of(&self, record: &LeafRecord) -> Option<SlotIndex> {
        if record.is_legacy() {
            self.legacy_slots.get(&record.id).copied()
        } else {
            None
        }
    }

    fn prune_settling(&mut self, now: Instant) {
        let window: Duration = self.config.settle_window();
        self.settling
            .retain(|_, (_, written)| now.saturating_duration_since(*written) <= window);
    }

    fn persist(&self) {
        if let Err(e) = self.persistence.save(&self.view) {
            tracing::warn!(error = %e, "Error saving tree state");
        }
    }
}
