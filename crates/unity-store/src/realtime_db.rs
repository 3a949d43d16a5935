//! Realtime JSON-tree database adapter
//!
//! Leaves live under `{db}/leaves` as an object keyed by push id. The
//! change feed (`Accept: text/event-stream` on the same path) reports that
//! *something* under the path changed, not which rows were added. Each
//! notification is answered by re-reading the collection and forwarding only
//! the newest record, so a burst of inserts between two notifications
//! collapses into one delivery.
//!
//! The database has no way to express slot uniqueness; concurrent writers
//! to one slot are both stored.

use crate::config::Backend;
use crate::error::StoreError;
use crate::event_stream::{follow, Flow, StreamEvent, StreamHandler};
use crate::store::{InsertSink, RemoteStore, Subscription};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use unity_core::{LeafRecord, NewLeaf, RecordId};

/// Row body as stored under its push id
#[derive(Debug, Deserialize)]
struct StoredBody {
    name: String,
    #[serde(default)]
    city: Option<String>,
    #[serde(rename = "leafIndex", alias = "slotIndex", default)]
    slot: Option<i64>,
    #[serde(default)]
    created_at: DateTime<Utc>,
}

impl StoredBody {
    fn into_record(self, key: String) -> LeafRecord {
        LeafRecord {
            id: RecordId::new(key),
            name: self.name,
            city: self.city,
            slot: self.slot,
            created_at: self.created_at,
        }
    }
}

/// Response to a push
#[derive(Debug, Deserialize)]
struct PushResponse {
    name: String,
}

/// JSON-tree database client
#[derive(Debug, Clone)]
pub struct RealtimeDbStore {
    client: reqwest::Client,
    database_url: String,
    reconnect_delay: Duration,
}

impl RealtimeDbStore {
    /// Create a client for the database at `database_url`
    #[must_use]
    pub fn new(client: reqwest::Client, database_url: &str, reconnect_delay: Duration) -> Self {
        Self {
            client,
            database_url: database_url.trim_end_matches('/').to_string(),
            reconnect_delay,
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/leaves.json", self.database_url)
    }

    async fn fetch_all(&self) -> Result<Vec<LeafRecord>, StoreError> {
        let response = self.client.get(self.collection_url()).send().await?;
        if !response.status().is_success() {
            return Err(StoreError::Status(response.status()));
        }
        // an empty path reads as `null`
        let rows: Option<BTreeMap<String, StoredBody>> = response.json().await?;
        let mut leaves: Vec<LeafRecord> = rows
            .unwrap_or_default()
            .into_iter()
            .map(|(key, body)| body.into_record(key))
            .collect();
        leaves.sort_by_key(|leaf| leaf.created_at);
        Ok(leaves)
    }
}

#[async_trait::async_trait]
impl RemoteStore for RealtimeDbStore {
    fn backend(&self) -> Backend {
        Backend::RealtimeDb
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
        let response = self
            .client
            .post(self.collection_url())
            .json(&leaf)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::Status(response.status()));
        }
        let pushed: PushResponse = response.json().await?;
        Ok(leaf.into_record(RecordId::new(pushed.name)))
    }

    fn subscribe_to_inserts(&self, sink: InsertSink) -> Subscription {
        Subscription::spawn(follow(
            self.client.clone(),
            self.collection_url(),
            self.reconnect_delay,
            NewestLeafForwarder {
                store: self.clone(),
                sink,
                last_delivered: None,
            },
        ))
    }
}

/// Turns change notifications into newest-record deliveries
struct NewestLeafForwarder {
    store: RealtimeDbStore,
    sink: InsertSink,
    last_delivered: Option<RecordId>,
}

#[async_trait::async_trait]
impl StreamHandler for NewestLeafForwarder {
    async fn on_event(&mut self, event: StreamEvent) -> Flow {
        match event.event_type.as_deref() {
            Some("put" | "patch") => {}
            Some("cancel" | "auth_revoked") => {
                tracing::warn!(event = ?event.event_type, "Change feed revoked by database");
                return Flow::Reconnect;
            }
            // keep-alive and anything unknown
            _ => return Flow::Continue,
        }

        let leaves = match self.store.fetch_all().await {
            Ok(leaves) => leaves,
            Err(e) => {
                tracing::warn!(error = %e, "Error reading leaves after change notification");
                return Flow::Continue;
            }
        };
        let Some(newest) = leaves.into_iter().last() else {
            return Flow::Continue;
        };
        if self.last_delivered.as_ref() == Some(&newest.id) {
            return Flow::Continue;
        }
        self.last_delivered = Some(newest.id.clone());
        if self.sink.send(newest).await.is_err() {
            return Flow::Stop;
        }
        Flow::Continue
    }

    fn is_closed(&self) -> bool {
        self.sink.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bodies_decode_with_and_without_slot() {
        let rows: BTreeMap<String, StoredBody> = serde_json::from_str(
            r#"{
                "-Nx1": {"name": "Old1", "created_at": "2024-01-01T00:00:00Z"},
                "-Nx2": {"name": "Alice", "city": "Oslo", "leafIndex": 4, "created_at": "2024-01-02T00:00:00Z"}
            }"#,
        )
        .unwrap();
        let records: Vec<_> = rows.into_iter().map(|(k, b)| b.into_record(k)).collect();
        assert!(records[0].is_legacy());
        assert_eq!(records[1].slot, Some(4));
        assert_eq!(records[1].id.as_str(), "-Nx2");
    }

    #[test]
    fn collection_url() {
        let store = RealtimeDbStore::new(
            reqwest::Client::new(),
            "https://tree.example.net/",
            Duration::from_secs(3),
        );
        assert_eq!(store.collection_url(), "https://tree.example.net/leaves.json");
    }
}
