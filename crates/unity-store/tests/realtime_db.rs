//! Realtime database adapter against a local fake of the JSON-tree REST API

use chrono::{TimeZone, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use unity_core::{LeafName, NewLeaf, SlotIndex};
use unity_store::{RealtimeDbStore, RemoteStore};
use warp::sse::Event;
use warp::Filter;

#[derive(Clone)]
struct FakeDb {
    rows: Arc<Mutex<BTreeMap<String, serde_json::Value>>>,
    changes: broadcast::Sender<()>,
    next_key: Arc<AtomicU64>,
}

impl FakeDb {
    fn new() -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            rows: Arc::default(),
            changes,
            next_key: Arc::default(),
        }
    }
}

fn serve(db: FakeDb) -> SocketAddr {
    let with_db = warp::any().map(move || db.clone());

    let feed = warp::get()
        .and(warp::path!("leaves.json"))
        .and(warp::header::exact_ignore_case("accept", "text/event-stream"))
        .and(with_db.clone())
        .map(|db: FakeDb| {
            let receiver = db.changes.subscribe();
            let initial = futures::stream::once(async {
                Ok::<_, Infallible>(Event::default().event("put").data(r#"{"path":"/","data":null}"#))
            });
            let live = futures::stream::unfold(receiver, |mut receiver| async move {
                receiver.recv().await.ok().map(|()| {
                    let event = Event::default().event("put").data(r#"{"path":"/k","data":{}}"#);
                    (Ok::<_, Infallible>(event), receiver)
                })
            });
            warp::sse::reply(warp::sse::keep_alive().stream(initial.chain(live)))
        });

    let list = warp::get()
        .and(warp::path!("leaves.json"))
        .and(with_db.clone())
        .map(|db: FakeDb| {
            let rows = db.rows.lock();
            if rows.is_empty() {
                warp::reply::json(&serde_json::Value::Null)
            } else {
                warp::reply::json(&*rows)
            }
        });

    let push = warp::post()
        .and(warp::path!("leaves.json"))
        .and(warp::body::json())
        .and(with_db)
        .map(|body: serde_json::Value, db: FakeDb| {
            let key = format!("-K{:04}", db.next_key.fetch_add(1, Ordering::SeqCst));
            db.rows.lock().insert(key.clone(), body);
            let _ = db.changes.send(());
            warp::reply::json(&serde_json::json!({ "name": key }))
        });

    let (addr, server) = warp::serve(feed.or(list).or(push)).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    addr
}

fn leaf(name: &str, slot: u16, minute: u32) -> NewLeaf {
    NewLeaf::new(
        LeafName::parse(name).unwrap(),
        Some("Lagos"),
        SlotIndex(slot),
        Utc.with_ymd_and_hms(2024, 6, 1, 9, minute, 0).unwrap(),
    )
}

fn store_for(addr: SocketAddr) -> RealtimeDbStore {
    RealtimeDbStore::new(
        reqwest::Client::new(),
        &format!("http://{addr}"),
        Duration::from_millis(100),
    )
}

#[tokio::test]
async fn push_then_list_in_creation_order() {
    let store = store_for(serve(FakeDb::new()));
    assert!(store.list_all().await.is_empty());

    let bob = store.insert(leaf("Bob", 1, 20)).await.unwrap();
    let alice = store.insert(leaf("Alice", 0, 10)).await.unwrap();
    assert_eq!(bob.id.as_str(), "-K0000");
    assert_eq!(alice.id.as_str(), "-K0001");

    let names: Vec<_> = store.list_all().await.into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["Alice", "Bob"]);
}

#[tokio::test]
async fn change_feed_delivers_newest_record() {
    let store = store_for(serve(FakeDb::new()));
    store.insert(leaf("Alice", 0, 1)).await.unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    let _subscription = store.subscribe_to_inserts(tx);

    // initial notification reports the current newest row
    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.name, "Alice");

    store.insert(leaf("Bob", 1, 2)).await.unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.name, "Bob");
    assert_eq!(second.slot, Some(1));
}

#[tokio::test]
async fn unreachable_database_lists_empty_and_rejects_writes() {
    let store = RealtimeDbStore::new(
        reqwest::Client::new(),
        "http://127.0.0.1:9",
        Duration::from_millis(100),
    );
    assert!(store.list_all().await.is_empty());
    assert!(store.insert(leaf("Alice", 0, 0)).await.is_err());
}
