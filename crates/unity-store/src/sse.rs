//! REST + Server-Sent Events adapter
//!
//! Talks to a leaves server:
//! - `GET  {base}/api/leaves`        full listing (JSON array)
//! - `POST {base}/api/leaves`        insert, 409 when the slot is taken
//! - `GET  {base}/api/leaves/events` `new-leaf` events carrying one record

use crate::config::Backend;
use crate::error::StoreError;
use crate::event_stream::{follow, Flow, StreamEvent, StreamHandler};
use crate::store::{InsertSink, RemoteStore, Subscription};
use reqwest::StatusCode;
use std::time::Duration;
use unity_core::{LeafRecord, NewLeaf};

/// Event name announcing an inserted leaf
pub const NEW_LEAF_EVENT: &str = "new-leaf";

/// Leaves server client
#[derive(Debug, Clone)]
pub struct EventStreamStore {
    client: reqwest::Client,
    base_url: String,
    reconnect_delay: Duration,
}

impl EventStreamStore {
    /// Create a client for the server at `base_url`
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: &str, reconnect_delay: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            reconnect_delay,
        }
    }

    fn leaves_url(&self) -> String {
        format!("{}/api/leaves", self.base_url)
    }

    fn events_url(&self) -> String {
        format!("{}/api/leaves/events", self.base_url)
    }

    async fn fetch_all(&self) -> Result<Vec<LeafRecord>, StoreError> {
        let response = self.client.get(self.leaves_url()).send().await?;
        if !response.status().is_success() {
            return Err(StoreError::Status(response.status()));
        }
        let mut leaves: Vec<LeafRecord> = response.json().await?;
        leaves.sort_by_key(|leaf| leaf.created_at);
        Ok(leaves)
    }
}

#[async_trait::async_trait]
impl RemoteStore for EventStreamStore {
    fn backend(&self) -> Backend {
        Backend::EventStream
    }

    async fn list_all(&self) -> Vec<LeafRecord> {
        match self.fetch_all().await {
            Ok(leaves) => leaves,
            Err(e) => {
                tracing::warn!(error = %e, "Error fetching leaves");
                Vec::new()
            }
        }
    }

    async fn insert(&self, leaf: NewLeaf) -> Result<LeafRecord, StoreError> {
        let slot = leaf.slot;
        let response = self.client.post(self.leaves_url()).json(&leaf).send().await?;
        match response.status() {
            status if status.is_success() => Ok(response.json().await?),
            StatusCode::CONFLICT => Err(StoreError::SlotTaken(slot)),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(StoreError::Rejected(response.text().await.unwrap_or_default()))
            }
            status => Err(StoreError::Status(status)),
        }
    }

    fn subscribe_to_inserts(&self, sink: InsertSink) -> Subscription {
        Subscription::spawn(follow(
            self.client.clone(),
            self.events_url(),
            self.reconnect_delay,
            NewLeafForwarder { sink },
        ))
    }
}

struct NewLeafForwarder {
    sink: InsertSink,
}

#[async_trait::async_trait]
impl StreamHandler for NewLeafForwarder {
    async fn on_event(&mut self, event: StreamEvent) -> Flow {
        if !event.is(NEW_LEAF_EVENT) {
            return Flow::Continue;
        }
        match serde_json::from_str::<LeafRecord>(&event.data) {
            Ok(record) => {
                if self.sink.send(record).await.is_err() {
                    Flow::Stop
                } else {
                    Flow::Continue
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to parse new-leaf event");
                Flow::Continue
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.sink.is_closed()
    }
}
