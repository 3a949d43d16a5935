//! Remote store capability
//!
//! One interface over the shared, append-only `leaves` collection. Three
//! implementations share it:
//! - [`MemoryStore`](crate::MemoryStore): in-process realtime table
//! - [`EventStreamStore`](crate::EventStreamStore): REST + Server-Sent Events
//! - [`RealtimeDbStore`](crate::RealtimeDbStore): JSON tree database with a
//!   coalescing change feed

use crate::config::Backend;
use crate::error::StoreError;
use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use unity_core::{LeafRecord, NewLeaf};

/// Where pushed records are delivered
pub type InsertSink = mpsc::Sender<LeafRecord>;

/// Shared leaves collection
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    /// Which implementation this is
    fn backend(&self) -> Backend;

    /// Every stored leaf, oldest first
    ///
    /// Fails soft: transport or decoding errors are logged and produce an
    /// empty listing, indistinguishable from an empty collection.
    async fn list_all(&self) -> Vec<LeafRecord>;

    /// Store one leaf and return it with its store id
    ///
    /// # Errors
    /// Any failure; callers must not assume the write happened.
    async fn insert(&self, leaf: NewLeaf) -> Result<LeafRecord, StoreError>;

    /// Deliver inserted records to `sink` until the subscription ends
    ///
    /// Network implementations reconnect on their own after a fixed delay.
    /// The subscription ends when it is dropped, when
    /// [`Subscription::unsubscribe`] is called, or when the sink closes.
    fn subscribe_to_inserts(&self, sink: InsertSink) -> Subscription;
}

/// Handle on a running insert subscription
#[derive(Debug)]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Run a delivery loop in the background
    pub fn spawn<F>(delivery: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            task: Some(tokio::spawn(delivery)),
        }
    }

    /// Subscription that never delivers anything
    #[inline]
    #[must_use]
    pub fn inert() -> Self {
        Self { task: None }
    }

    /// Whether the delivery loop is still running
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop delivery
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}
