//! Slot allocation scenarios
//!
//! End-to-end walks through the reconciler with the default 170-slot tree
//! (reserved range 130..=169).

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::time::Instant;
use unity_core::{
    allocate, Allocation, Commit, LeafRecord, LocalPersistence, MemoryCache, Phase, PushOutcome,
    ReconcileError, Reconciler, RecordId, SlotIndex, TreeConfig,
};

fn stored(name: &str, slot: Option<i64>, minute: u32) -> LeafRecord {
    LeafRecord {
        id: RecordId::new(format!("rec-{name}")),
        name: name.to_string(),
        city: Some("Pune".to_string()),
        slot,
        created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap(),
    }
}

fn loaded(listing: &[LeafRecord]) -> Reconciler {
    let mut reconciler =
        Reconciler::new(TreeConfig::default(), LocalPersistence::in_memory()).unwrap();
    reconciler.begin_loading();
    reconciler.finish_loading(listing);
    reconciler
}

fn submit(reconciler: &mut Reconciler, name: &str) -> Result<SlotIndex, ReconcileError> {
    let leaf = reconciler.begin_submit(name, None, Utc::now())?;
    Ok(reconciler.commit_submit(&leaf, Instant::now())?.slot())
}

#[test]
fn empty_tree_first_visitor() {
    let mut reconciler = loaded(&[]);
    assert_eq!(submit(&mut reconciler, "Alice"), Ok(SlotIndex(0)));

    let view = reconciler.view();
    assert_eq!(view.occupied().collect::<Vec<_>>(), vec![SlotIndex(0)]);
    assert_eq!(view.name_of(SlotIndex(0)), Some("Alice"));
}

#[test]
fn last_unreserved_slot_then_full() {
    let listing: Vec<_> = (0..129)
        .map(|i| stored(&format!("v{i}"), Some(i), 0))
        .collect();
    let mut reconciler = loaded(&listing);

    assert_eq!(submit(&mut reconciler, "Zara"), Ok(SlotIndex(129)));
    assert_eq!(submit(&mut reconciler, "Yusuf"), Err(ReconcileError::TreeFull));
    assert!(allocate(reconciler.view()).is_full());
    // nothing in 130..=169 was handed out
    assert!(reconciler.view().occupied().all(|slot| slot.get() < 130));
}

#[test]
fn legacy_listing_uses_positions() {
    let reconciler = loaded(&[stored("Old1", None, 0), stored("Old2", None, 1)]);
    let view = reconciler.view();
    assert_eq!(view.name_of(SlotIndex(0)), Some("Old1"));
    assert_eq!(view.name_of(SlotIndex(1)), Some("Old2"));
    assert_eq!(reconciler.stats().legacy_placed, 2);
}

#[test]
fn push_for_known_slot_is_idempotent() {
    let mut reconciler = loaded(&[stored("X", Some(5), 0)]);
    let before = reconciler.view().clone();

    let outcome = reconciler.on_remote_insert(&stored("X", Some(5), 1), Instant::now());
    assert_eq!(outcome, PushOutcome::Duplicate(SlotIndex(5)));
    assert_eq!(reconciler.view(), &before);

    // replaying again changes nothing either
    reconciler.on_remote_insert(&stored("X", Some(5), 1), Instant::now());
    assert_eq!(reconciler.view(), &before);
}

#[test]
fn reserved_slots_may_be_occupied_by_listing_but_never_allocated() {
    let mut reconciler = loaded(&[stored("Decor", Some(150), 0)]);
    assert_eq!(reconciler.view().name_of(SlotIndex(150)), Some("Decor"));
    assert_eq!(allocate(reconciler.view()), Allocation::Slot(SlotIndex(0)));
    assert_eq!(submit(&mut reconciler, "Alice"), Ok(SlotIndex(0)));
}

#[test]
fn cached_state_is_superseded_by_listing() {
    let persistence = LocalPersistence::new(MemoryCache::new());
    let mut first = Reconciler::new(TreeConfig::default(), persistence).unwrap();
    first.begin_loading();
    first.finish_loading(&[stored("Cached", Some(7), 0)]);

    // second session over a cache seeded with the first session's snapshot
    let cache = MemoryCache::new();
    let seeded = LocalPersistence::new(cache);
    seeded.save(first.view()).unwrap();

    let mut second = Reconciler::new(TreeConfig::default(), seeded).unwrap();
    assert!(second.begin_loading());
    assert_eq!(second.phase(), Phase::Loading);
    assert_eq!(second.view().name_of(SlotIndex(7)), Some("Cached"));

    second.finish_loading(&[stored("Remote", Some(2), 0)]);
    assert_eq!(second.view().name_of(SlotIndex(7)), None);
    assert_eq!(second.view().name_of(SlotIndex(2)), Some("Remote"));
}

#[test]
fn invalid_names_never_claim_slots() {
    let mut reconciler = loaded(&[]);
    assert!(matches!(
        reconciler.begin_submit(" a ", None, Utc::now()),
        Err(ReconcileError::InvalidName(_))
    ));
    assert!(reconciler.in_flight().is_empty());
    assert_eq!(submit(&mut reconciler, "Al"), Ok(SlotIndex(0)));
}

#[test]
fn shadowed_commit_reports_holder() {
    let mut reconciler = loaded(&[]);
    let leaf = reconciler.begin_submit("Mine", None, Utc::now()).unwrap();
    reconciler.on_remote_insert(&stored("Theirs", Some(0), 3), Instant::now());
    let commit = reconciler.commit_submit(&leaf, Instant::now()).unwrap();
    assert_eq!(
        commit,
        Commit::Shadowed {
            slot: SlotIndex(0),
            by: "Theirs".to_string()
        }
    );
}
