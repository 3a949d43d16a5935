//! Leaves HTTP API
//!
//! ```text
//! GET  /api/leaves          every stored leaf, oldest first
//! POST /api/leaves          insert one leaf (201, 400, 409)
//! GET  /api/leaves/events   `new-leaf` Server-Sent Events
//! ```
//!
//! The events endpoint opens one store subscription per connection and
//! releases it when the client goes away.

use crate::error::{ErrorResponse, ServerError};
use chrono::{DateTime, Utc};
use futures::stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use unity_core::{LeafName, LeafRecord, NewLeaf, SlotSpace};
use unity_store::{RemoteStore, NEW_LEAF_EVENT};
use warp::http::StatusCode;
use warp::sse::Event;
use warp::{Filter, Rejection, Reply};

const EVENT_BUFFER: usize = 64;
const MAX_BODY_BYTES: u64 = 16 * 1024;

/// Shared state behind the routes
#[derive(Clone)]
pub struct LeavesApi {
    store: Arc<dyn RemoteStore>,
    space: SlotSpace,
    keep_alive: Duration,
}

impl std::fmt::Debug for LeavesApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeavesApi")
            .field("backend", &self.store.backend())
            .field("space", &self.space)
            .finish_non_exhaustive()
    }
}

impl LeavesApi {
    #[must_use]
    pub fn new(store: Arc<dyn RemoteStore>, space: SlotSpace) -> Self {
        Self {
            store,
            space,
            keep_alive: Duration::from_secs(15),
        }
    }

    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    fn validate(&self, body: SubmitBody) -> Result<NewLeaf, ServerError> {
        let name = LeafName::parse(&body.name)?;
        let slot = self
            .space
            .slot(body.slot)
            .ok_or(ServerError::SlotOutOfRange(body.slot))?;
        Ok(NewLeaf::new(
            name,
            body.city.as_deref(),
            slot,
            body.created_at.unwrap_or_else(Utc::now),
        ))
    }
}

/// Insert request body
#[derive(Debug, Deserialize)]
struct SubmitBody {
    name: String,
    #[serde(default)]
    city: Option<String>,
    #[serde(rename = "leafIndex", alias = "slotIndex")]
    slot: i64,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

/// All routes, with rejections rendered as JSON errors
pub fn routes(api: LeavesApi) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let list = warp::path!("api" / "leaves")
        .and(warp::get())
        .and(with_api(api.clone()))
        .and_then(list_leaves);

    let create = warp::path!("api" / "leaves")
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(with_api(api.clone()))
        .and_then(create_leaf);

    let events = warp::path!("api" / "leaves" / "events")
        .and(warp::get())
        .and(with_api(api))
        .map(leaf_events);

    list.or(create)
        .or(events)
        .recover(handle_rejection)
        .with(warp::trace::request())
}

fn with_api(api: LeavesApi) -> impl Filter<Extract = (LeavesApi,), Error = Infallible> + Clone {
    warp::any().map(move || api.clone())
}

async fn list_leaves(api: LeavesApi) -> Result<impl Reply, Infallible> {
    let leaves = api.store.list_all().await;
    tracing::debug!(count = leaves.len(), "Listing leaves");
    Ok(warp::reply::json(&leaves))
}

async fn create_leaf(body: SubmitBody, api: LeavesApi) -> Result<impl Reply, Rejection> {
    let leaf = api.validate(body).map_err(warp::reject::custom)?;
    let record = api
        .store
        .insert(leaf)
        .await
        .map_err(|e| warp::reject::custom(ServerError::from(e)))?;
    tracing::info!(
        slot = ?record.slot,
        name = %record.name,
        city = record.display_city(),
        "Leaf stored"
    );
    Ok(warp::reply::with_status(
        warp::reply::json(&record),
        StatusCode::CREATED,
    ))
}

fn leaf_events(api: LeavesApi) -> impl Reply {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let subscription = api.store.subscribe_to_inserts(tx);
    tracing::debug!("Event stream client connected");

    // the subscription lives in the stream state and ends with it
    let live = stream::unfold((rx, subscription), |(mut rx, subscription)| async move {
        let record = rx.recv().await?;
        Some((Ok::<_, Infallible>(new_leaf_event(&record)), (rx, subscription)))
    });

    warp::sse::reply(warp::sse::keep_alive().interval(api.keep_alive).stream(live))
}

/// Encode one record as a `new-leaf` event
fn new_leaf_event(record: &LeafRecord) -> Event {
    Event::default()
        .event(NEW_LEAF_EVENT)
        .id(record.id.as_str())
        .json_data(record)
        .unwrap_or_else(|_| Event::default().comment("serialization error"))
}

async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if let Some(e) = rejection.find::<ServerError>() {
        if e.is_client_error() {
            tracing::debug!(error = %e, "Request refused");
        } else {
            tracing::error!(error = %e, "Request failed");
        }
        (e.status_code(), e.to_string())
    } else if let Some(e) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "body too large".to_string())
    } else if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else {
        tracing::warn!(?rejection, "Unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorResponse::new(status, message)),
        status,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use unity_store::MemoryStore;

    fn api(store: MemoryStore) -> LeavesApi {
        LeavesApi::new(Arc::new(store), SlotSpace::default())
    }

    #[tokio::test]
    async fn empty_listing_is_an_empty_array() {
        let response = warp::test::request()
            .method("GET")
            .path("/api/leaves")
            .reply(&routes(api(MemoryStore::default())))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"[]");
    }

    #[tokio::test]
    async fn insert_then_list() {
        let filter = routes(api(MemoryStore::default()));

        let response = warp::test::request()
            .method("POST")
            .path("/api/leaves")
            .json(&serde_json::json!({"name": " Alice ", "city": "Oslo", "leafIndex": 0}))
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let record: LeafRecord = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(record.name, "Alice");
        assert_eq!(record.slot, Some(0));

        let response = warp::test::request()
            .method("GET")
            .path("/api/leaves")
            .reply(&filter)
            .await;
        let leaves: Vec<LeafRecord> = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(leaves, vec![record]);
    }

    #[tokio::test]
    async fn occupied_slot_is_a_conflict_when_unique() {
        let filter = routes(api(MemoryStore::new(true)));
        let body = serde_json::json!({"name": "Alice", "leafIndex": 3});

        let first = warp::test::request()
            .method("POST")
            .path("/api/leaves")
            .json(&body)
            .reply(&filter)
            .await;
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = warp::test::request()
            .method("POST")
            .path("/api/leaves")
            .json(&serde_json::json!({"name": "Bob", "leafIndex": 3}))
            .reply(&filter)
            .await;
        assert_eq!(second.status(), StatusCode::CONFLICT);
        let error: serde_json::Value = serde_json::from_slice(second.body()).unwrap();
        assert_eq!(error["status"], 409);
    }

    #[tokio::test]
    async fn occupied_slot_is_accepted_when_not_unique() {
        let filter = routes(api(MemoryStore::new(false)));
        for name in ["Alice", "Bob"] {
            let response = warp::test::request()
                .method("POST")
                .path("/api/leaves")
                .json(&serde_json::json!({"name": name, "leafIndex": 3}))
                .reply(&filter)
                .await;
            assert_eq!(response.status(), StatusCode::CREATED);
        }
    }

    #[tokio::test]
    async fn invalid_submissions_are_bad_requests() {
        let filter = routes(api(MemoryStore::default()));
        let bodies = [
            serde_json::json!({"name": "A", "leafIndex": 0}),
            serde_json::json!({"name": "Alice", "leafIndex": 170}),
            serde_json::json!({"name": "Alice", "leafIndex": -1}),
            serde_json::json!({"name": "Alice"}),
        ];
        for body in bodies {
            let response = warp::test::request()
                .method("POST")
                .path("/api/leaves")
                .json(&body)
                .reply(&filter)
                .await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {body}");
        }
    }

    #[tokio::test]
    async fn reserved_slots_may_be_written() {
        let response = warp::test::request()
            .method("POST")
            .path("/api/leaves")
            .json(&serde_json::json!({"name": "Guest", "leafIndex": 150}))
            .reply(&routes(api(MemoryStore::default())))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn unknown_paths_and_methods() {
        let filter = routes(api(MemoryStore::default()));
        let missing = warp::test::request().path("/api/trees").reply(&filter).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let wrong = warp::test::request()
            .method("DELETE")
            .path("/api/leaves")
            .reply(&filter)
            .await;
        assert_eq!(wrong.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn events_carry_the_record() {
        let record = unity_test_utils::leaf_record("Alice", 2);
        let rendered = new_leaf_event(&record).to_string();
        assert!(rendered.contains(NEW_LEAF_EVENT));
        assert!(rendered.contains(r#""leafIndex":2"#));
    }
}
