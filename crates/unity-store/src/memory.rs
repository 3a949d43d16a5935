//! In-process realtime table
//!
//! Rows live in memory; every insert is broadcast to subscribers one record
//! at a time. This is also the storage engine behind the leaves server.

use crate::config::Backend;
use crate::error::StoreError;
use crate::store::{InsertSink, RemoteStore, Subscription};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;
use ulid::Ulid;
use unity_core::{LeafRecord, NewLeaf};

const BROADCAST_CAPACITY: usize = 256;

/// Realtime leaves table held in memory
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

#[derive(Debug)]
struct MemoryInner {
    rows: RwLock<Vec<LeafRecord>>,
    inserts: broadcast::Sender<LeafRecord>,
    unique_slots: bool,
}

impl MemoryStore {
    /// Create an empty table
    ///
    /// With `unique_slots` set, inserting a slot that is already recorded
    /// fails with [`StoreError::SlotTaken`]. Legacy rows hold the slot given
    /// by their position in creation order.
    #[must_use]
    pub fn new(unique_slots: bool) -> Self {
        Self::with_rows(Vec::new(), unique_slots)
    }

    /// Create a table holding existing rows (legacy rows included)
    #[must_use]
    pub fn with_rows(rows: Vec<LeafRecord>, unique_slots: bool) -> Self {
        let (inserts, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(MemoryInner {
                rows: RwLock::new(rows),
                inserts,
                unique_slots,
            }),
        }
    }

    /// Number of stored rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.rows.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether duplicate slots are rejected
    #[inline]
    #[must_use]
    pub fn enforces_unique_slots(&self) -> bool {
        self.inner.unique_slots
    }

    /// Number of live insert subscriptions
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.inserts.receiver_count()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait::async_trait]
impl RemoteStore for MemoryStore {
    fn backend(&self) -> Backend {
        Backend::Memory
    }

    async fn list_all(&self) -> Vec<LeafRecord> {
        let mut rows = self.inner.rows.read().clone();
        rows.sort_by_key(|row| row.created_at);
        rows
    }

    async fn insert(&self, leaf: NewLeaf) -> Result<LeafRecord, StoreError> {
        let record = {
            let mut rows = self.inner.rows.write();
            let slot = i64::from(leaf.slot);
            if self.inner.unique_slots && recorded_slots(&rows).any(|taken| taken == slot) {
                return Err(StoreError::SlotTaken(leaf.slot));
            }
            let record = leaf.into_record(unity_core::RecordId::new(Ulid::new().to_string()));
            rows.push(record.clone());
            record
        };
        // no receivers is fine
        let _ = self.inner.inserts.send(record.clone());
        Ok(record)
    }

    fn subscribe_to_inserts(&self, sink: InsertSink) -> Subscription {
        let mut receiver = self.inner.inserts.subscribe();
        Subscription::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(record) => {
                        if sink.send(record).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Insert subscription lagged, some leaves were not pushed");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Slot each row holds; legacy rows hold their position in creation order
fn recorded_slots(rows: &[LeafRecord]) -> impl Iterator<Item = i64> {
    let mut ordered: Vec<_> = rows.iter().map(|row| (row.created_at, row.slot)).collect();
    ordered.sort_by_key(|(created_at, _)| *created_at);
    ordered
        .into_iter()
        .enumerate()
        .map(|(position, (_, slot))| slot.unwrap_or_else(|| i64::try_from(position).unwrap_or(i64::MAX)))
}
