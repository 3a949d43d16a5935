//! Testing utilities for the Tree of Unity workspace
//!
//! Shared fixtures and a store whose listing can be held back.

#![allow(missing_docs)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tokio::sync::Notify;
use unity_core::{
    LeafName, LeafRecord, LocalPersistence, NewLeaf, Reconciler, RecordId, SlotIndex, TreeConfig,
};
use unity_store::{Backend, InsertSink, MemoryStore, RemoteStore, StoreError, Subscription};

/// Fixed base time so listings sort predictably
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Creation time `minutes` after [`base_time`]
pub fn at_minute(minutes: i64) -> DateTime<Utc> {
    base_time() + Duration::minutes(minutes)
}

/// Record with an explicit slot, created `slot` minutes after the base time
pub fn leaf_record(name: &str, slot: i64) -> LeafRecord {
    LeafRecord {
        id: RecordId::new(format!("rec-{name}-{slot}")),
        name: name.to_string(),
        city: Some("Lagos".to_string()),
        slot: Some(slot),
        created_at: at_minute(slot),
    }
}

/// Record written before slots were stored
pub fn legacy_record(name: &str, minutes: i64) -> LeafRecord {
    LeafRecord {
        id: RecordId::new(format!("legacy-{name}")),
        name: name.to_string(),
        city: None,
        slot: None,
        created_at: at_minute(minutes),
    }
}

/// Records named `Leaf0..` on slots `0..count`
pub fn filled_records(count: u16) -> Vec<LeafRecord> {
    (0..count)
        .map(|slot| leaf_record(&format!("Leaf{slot}"), i64::from(slot)))
        .collect()
}

pub fn new_leaf(name: &str, slot: u16) -> NewLeaf {
    NewLeaf::new(
        LeafName::parse(name).unwrap(),
        Some("Lagos"),
        SlotIndex(slot),
        at_minute(i64::from(slot)),
    )
}

/// Reconciler already past loading, with `listing` applied
pub fn ready_reconciler(config: TreeConfig, listing: &[LeafRecord]) -> Reconciler {
    let mut reconciler = Reconciler::new(config, LocalPersistence::in_memory()).unwrap();
    reconciler.begin_loading();
    reconciler.finish_loading(listing);
    reconciler
}

/// Memory store whose `list_all` waits until [`GatedStore::open`]
#[derive(Debug, Clone)]
pub struct GatedStore {
    inner: MemoryStore,
    gate: Arc<Notify>,
}

impl GatedStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            gate: Arc::new(Notify::new()),
        }
    }

    pub fn open(&self) {
        // stored permit covers a listing that starts after this call
        self.gate.notify_one();
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

#[async_trait::async_trait]
impl RemoteStore for GatedStore {
    fn backend(&self) -> Backend {
        self.inner.backend()
    }

    async fn list_all(&self) -> Vec<LeafRecord> {
        self.gate.notified().await;
        self.inner.list_all().await
    }

    async fn insert(&self, leaf: NewLeaf) -> Result<LeafRecord, StoreError> {
        self.inner.insert(leaf).await
    }

    fn subscribe_to_inserts(&self, sink: InsertSink) -> Subscription {
        self.inner.subscribe_to_inserts(sink)
    }
}
