//! Event-stream client and tree service against a running leaves server

use pretty_assertions::assert_eq;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use unity_core::{LocalPersistence, Reconciler, SlotIndex, SlotSpace, TreeConfig};
use unity_server::{bind, LeavesApi};
use unity_store::{EventStreamStore, MemoryStore, RemoteStore, StoreError};
use unity_sync::{TreeEvent, TreeService};
use unity_test_utils::{leaf_record, new_leaf};

struct RunningServer {
    addr: SocketAddr,
    store: MemoryStore,
    _stop: oneshot::Sender<()>,
}

impl RunningServer {
    fn start(store: MemoryStore) -> Self {
        let (stop, stopped) = oneshot::channel::<()>();
        let api = LeavesApi::new(Arc::new(store.clone()), SlotSpace::default())
            .with_keep_alive(Duration::from_secs(1));
        let (addr, server) = bind(api, ([127, 0, 0, 1], 0).into(), async {
            let _ = stopped.await;
        })
        .unwrap();
        tokio::spawn(server);
        Self {
            addr,
            store,
            _stop: stop,
        }
    }

    fn client(&self) -> EventStreamStore {
        EventStreamStore::new(
            reqwest::Client::new(),
            &format!("http://{}", self.addr),
            Duration::from_millis(100),
        )
    }

    async fn wait_for_subscribers(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.store.subscriber_count() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("subscribers connected");
    }
}

#[tokio::test]
async fn client_lists_inserts_and_sees_conflicts() {
    let server = RunningServer::start(MemoryStore::with_rows(vec![leaf_record("Zed", 5)], true));
    let client = server.client();

    let listed = client.list_all().await;
    assert_eq!(listed, vec![leaf_record("Zed", 5)]);

    let alice = client.insert(new_leaf("Alice", 0)).await.unwrap();
    assert_eq!(alice.slot, Some(0));
    assert!(!alice.id.as_str().is_empty());

    let taken = client.insert(new_leaf("Bob", 5)).await.unwrap_err();
    assert!(matches!(taken, StoreError::SlotTaken(SlotIndex(5))));
    assert_eq!(server.store.len(), 2);
}

#[tokio::test]
async fn feed_delivers_inserts_from_other_clients() {
    let server = RunningServer::start(MemoryStore::default());
    let client = server.client();

    let (tx, mut rx) = mpsc::channel(8);
    let subscription = client.subscribe_to_inserts(tx);
    server.wait_for_subscribers(1).await;

    server.store.insert(new_leaf("Carol", 2)).await.unwrap();
    let pushed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pushed.name, "Carol");
    assert_eq!(pushed.slot, Some(2));

    subscription.unsubscribe();
}

#[tokio::test]
async fn two_trees_converge_through_the_server() {
    let server = RunningServer::start(MemoryStore::default());
    let start_tree = || {
        let reconciler = Reconciler::new(TreeConfig::new(), LocalPersistence::in_memory()).unwrap();
        TreeService::start(reconciler, Arc::new(server.client()))
    };

    let kiosk = start_tree();
    let phone = start_tree();
    let mut phone_events = phone.subscribe();
    kiosk.wait_ready().await.unwrap();
    phone.wait_ready().await.unwrap();
    server.wait_for_subscribers(2).await;

    let alice = kiosk.submit("Alice", Some("Accra")).await.unwrap();
    assert_eq!(alice.slot(), SlotIndex(0));

    let seen = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(TreeEvent::LeafAdded { slot, name, .. }) = phone_events.recv().await {
                return (slot, name);
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(seen, (SlotIndex(0), "Alice".to_string()));

    let bob = phone.submit("Bob", None).await.unwrap();
    assert_eq!(bob.slot(), SlotIndex(1));
    assert_eq!(server.store.len(), 2);
}

#[tokio::test]
async fn stale_view_recovers_from_a_taken_slot() {
    let server = RunningServer::start(MemoryStore::default());
    let reconciler = Reconciler::new(TreeConfig::new(), LocalPersistence::in_memory()).unwrap();
    let tree = TreeService::start(reconciler, Arc::new(server.client()));
    tree.wait_ready().await.unwrap();

    // written behind the tree's back, before any feed delivers it
    server.store.insert(new_leaf("Early", 0)).await.unwrap();

    let added = tree.submit("Late", None).await.unwrap();
    assert_eq!(added.slot(), SlotIndex(1));
    let names: Vec<_> = tree
        .snapshot()
        .await
        .unwrap()
        .leaves
        .into_iter()
        .map(|leaf| leaf.name)
        .collect();
    assert_eq!(names, vec!["Early", "Late"]);
}
