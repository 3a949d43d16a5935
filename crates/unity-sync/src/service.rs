//! Tree service
//!
//! One task owns the [`Reconciler`]; everything else talks to it through a
//! cloneable [`TreeHandle`]. The loop multiplexes four inputs:
//! - commands from handles (submit, snapshot, refresh, shutdown)
//! - the startup listing, fetched on its own task
//! - records pushed by the store subscription
//! - completions of store writes and refreshes
//!
//! Store calls never run on the loop itself, so a slow store delays only
//! the submission waiting on it.
//!
//! A write rejected because another client took the slot first releases
//! the claim, merges a fresh listing and tries again with the next free
//! slot, up to `max_conflict_retries` times.

use crate::error::SyncError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use unity_core::{
    Commit, LeafRecord, LoadSummary, NewLeaf, Phase, PushOutcome, Reconciler, SlotIndex,
    TreeSnapshot,
};
use unity_store::{RemoteStore, StoreError, Subscription};

const COMMAND_BUFFER: usize = 64;
const PUSH_BUFFER: usize = 256;
const EVENT_BUFFER: usize = 256;

/// A submission the store accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    /// Stored record, with its store id
    pub record: LeafRecord,
    /// How the leaf landed in the local view
    pub commit: Commit,
    /// Insert attempts, above 1 only after slot conflicts
    pub attempts: u32,
}

impl Submitted {
    #[inline]
    #[must_use]
    pub fn slot(&self) -> SlotIndex {
        self.commit.slot()
    }
}

/// Change notification for watchers
///
/// `own` marks leaves placed by this client's confirmed write. An echo that
/// overtakes its own write confirmation is reported once, as not own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeEvent {
    /// Startup listing applied
    Ready { leaves: usize, restored: bool },
    /// A leaf appeared on the tree
    LeafAdded {
        slot: SlotIndex,
        name: String,
        own: bool,
    },
    /// A second name was recorded against an occupied slot
    Collision {
        slot: SlotIndex,
        kept: String,
        rejected: String,
    },
}

#[derive(Debug)]
enum Command {
    Submit {
        name: String,
        city: Option<String>,
        reply: oneshot::Sender<Result<Submitted, SyncError>>,
    },
    Snapshot {
        reply: oneshot::Sender<TreeSnapshot>,
    },
    Refresh {
        reply: oneshot::Sender<LoadSummary>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

#[derive(Debug)]
struct PendingSubmit {
    name: String,
    city: Option<String>,
    attempts: u32,
    reply: oneshot::Sender<Result<Submitted, SyncError>>,
}

#[derive(Debug)]
enum AfterRefresh {
    Retry(PendingSubmit),
    Reply(oneshot::Sender<LoadSummary>),
}

#[derive(Debug)]
enum Completion {
    Inserted {
        pending: PendingSubmit,
        leaf: NewLeaf,
        result: Result<LeafRecord, StoreError>,
    },
    Refreshed {
        listing: Vec<LeafRecord>,
        then: AfterRefresh,
    },
}

/// Event loop owning the reconciler
pub struct TreeService {
    reconciler: Reconciler,
    store: Arc<dyn RemoteStore>,
    events: broadcast::Sender<TreeEvent>,
    completions: mpsc::Sender<Completion>,
}

impl TreeService {
    /// Spawn the service on the current runtime and start loading
    ///
    /// The reconciler should be fresh (`Uninitialized`); the service drives
    /// it through loading itself.
    pub fn start(reconciler: Reconciler, store: Arc<dyn RemoteStore>) -> TreeHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (completion_tx, completion_rx) = mpsc::channel(COMMAND_BUFFER);
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        let service = Self {
            reconciler,
            store,
            events: events.clone(),
            completions: completion_tx,
        };
        tokio::spawn(service.run(command_rx, completion_rx));

        TreeHandle {
            commands: command_tx,
            events,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut completions: mpsc::Receiver<Completion>,
    ) {
        let restored = self.reconciler.begin_loading();
        tracing::info!(backend = %self.store.backend(), restored, "Tree service starting");

        let mut listing = self.spawn_listing();
        let (push_tx, mut pushes) = mpsc::channel(PUSH_BUFFER);
        let mut subscription: Option<Subscription> = None;

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    if self.handle_command(command).is_break() {
                        break;
                    }
                }
                listed = &mut listing, if subscription.is_none() => {
                    // a panicked listing task reads as an empty listing
                    self.finish_loading(&listed.unwrap_or_default(), restored);
                    subscription = Some(self.store.subscribe_to_inserts(push_tx.clone()));
                }
                Some(record) = pushes.recv() => self.apply_push(&record),
                Some(completion) = completions.recv() => self.complete(completion),
            }
        }

        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        tracing::info!("Tree service stopped");
    }

    fn spawn_listing(&self) -> oneshot::Receiver<Vec<LeafRecord>> {
        let (tx, rx) = oneshot::channel();
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let _ = tx.send(store.list_all().await);
        });
        rx
    }

    fn finish_loading(&mut self, listing: &[LeafRecord], restored: bool) {
        self.reconciler.finish_loading(listing);
        self.emit(TreeEvent::Ready {
            leaves: self.reconciler.view().len(),
            restored,
        });
    }

    fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Submit { name, city, reply } => self.submit(PendingSubmit {
                name,
                city,
                attempts: 0,
                reply,
            }),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.reconciler.snapshot());
            }
            Command::Refresh { reply } => {
                if self.reconciler.phase() == Phase::Ready {
                    self.spawn_refresh(AfterRefresh::Reply(reply));
                } else {
                    let _ = reply.send(LoadSummary::default());
                }
            }
            Command::Shutdown { ack } => {
                let _ = ack.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn submit(&mut self, mut pending: PendingSubmit) {
        let leaf = match self
            .reconciler
            .begin_submit(&pending.name, pending.city.as_deref(), Utc::now())
        {
            Ok(leaf) => leaf,
            Err(e) => {
                tracing::debug!(name = %pending.name, error = %e, "Submission refused");
                let _ = pending.reply.send(Err(e.into()));
                return;
            }
        };
        pending.attempts += 1;

        let store = Arc::clone(&self.store);
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = store.insert(leaf.clone()).await;
            let _ = completions
                .send(Completion::Inserted {
                    pending,
                    leaf,
                    result,
                })
                .await;
        });
    }

    fn spawn_refresh(&self, then: AfterRefresh) {
        let store = Arc::clone(&self.store);
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let listing = store.list_all().await;
            let _ = completions
                .send(Completion::Refreshed { listing, then })
                .await;
        });
    }

    fn complete(&mut self, completion: Completion) {
        match completion {
            Completion::Inserted {
                pending,
                leaf,
                result,
            } => match result {
                Ok(record) => self.confirm_insert(pending, &leaf, record),
                Err(e) => self.fail_insert(pending, &leaf, e),
            },
            Completion::Refreshed { listing, then } => {
                let summary = self.reconciler.merge_listing(&listing);
                for leaf in &summary.added {
                    self.emit(TreeEvent::LeafAdded {
                        slot: leaf.slot,
                        name: leaf.name.clone(),
                        own: false,
                    });
                }
                match then {
                    AfterRefresh::Retry(pending) => self.submit(pending),
                    AfterRefresh::Reply(reply) => {
                        let _ = reply.send(summary);
                    }
                }
            }
        }
    }

    fn confirm_insert(&mut self, pending: PendingSubmit, leaf: &NewLeaf, record: LeafRecord) {
        let echoed = self.reconciler.view().name_of(leaf.slot) == Some(leaf.name.as_str());
        match self.reconciler.commit_submit(leaf, now()) {
            Ok(commit) => {
                match &commit {
                    Commit::Placed(slot) if !echoed => self.emit(TreeEvent::LeafAdded {
                        slot: *slot,
                        name: leaf.name.clone(),
                        own: true,
                    }),
                    Commit::Placed(_) => {}
                    Commit::Shadowed { slot, by } => self.emit(TreeEvent::Collision {
                        slot: *slot,
                        kept: by.clone(),
                        rejected: leaf.name.clone(),
                    }),
                }
                let _ = pending.reply.send(Ok(Submitted {
                    record,
                    commit,
                    attempts: pending.attempts,
                }));
            }
            Err(e) => {
                let _ = pending.reply.send(Err(e.into()));
            }
        }
    }

    fn fail_insert(&mut self, pending: PendingSubmit, leaf: &NewLeaf, error: StoreError) {
        if let Err(e) = self.reconciler.abandon_submit(leaf.slot) {
            tracing::warn!(slot = %leaf.slot, error = %e, "Claim already released");
        }

        if !error.is_slot_conflict() {
            tracing::error!(slot = %leaf.slot, name = %leaf.name, error = %error, "Error adding leaf");
            let _ = pending.reply.send(Err(error.into()));
            return;
        }

        let retries = self.reconciler.config().max_conflict_retries;
        if pending.attempts <= retries {
            tracing::info!(
                slot = %leaf.slot,
                attempt = pending.attempts,
                "Slot taken upstream, refreshing before retry"
            );
            self.spawn_refresh(AfterRefresh::Retry(pending));
        } else {
            tracing::warn!(
                name = %leaf.name,
                attempts = pending.attempts,
                "Giving up after repeated slot conflicts"
            );
            let attempts = pending.attempts;
            let _ = pending.reply.send(Err(SyncError::Conflict { attempts }));
        }
    }

    fn apply_push(&mut self, record: &LeafRecord) {
        match self.reconciler.on_remote_insert(record, now()) {
            PushOutcome::Applied(slot) => self.emit(TreeEvent::LeafAdded {
                slot,
                name: record.name.clone(),
                own: false,
            }),
            PushOutcome::Collision { slot, kept } => self.emit(TreeEvent::Collision {
                slot,
                kept,
                rejected: record.name.clone(),
            }),
            _ => {}
        }
    }

    fn emit(&self, event: TreeEvent) {
        // no watchers is fine
        let _ = self.events.send(event);
    }
}

/// Clock that follows tokio's paused time in tests
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Handle to a running [`TreeService`]
#[derive(Debug, Clone)]
pub struct TreeHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<TreeEvent>,
}

impl TreeHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| SyncError::Closed)?;
        rx.await.map_err(|_| SyncError::Closed)
    }

    /// Add a leaf and wait for the store to confirm it
    ///
    /// # Errors
    /// - `SyncError::Rejected` for invalid names, a full tree, or a tree
    ///   still loading
    /// - `SyncError::Store` when the write failed
    /// - `SyncError::Conflict` when retries ran out
    /// - `SyncError::Closed` when the service has stopped
    pub async fn submit(&self, name: &str, city: Option<&str>) -> Result<Submitted, SyncError> {
        self.request(|reply| Command::Submit {
            name: name.to_string(),
            city: city.map(str::to_string),
            reply,
        })
        .await?
    }

    /// Copy of the current state
    ///
    /// # Errors
    /// `SyncError::Closed` when the service has stopped
    pub async fn snapshot(&self) -> Result<TreeSnapshot, SyncError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Merge a fresh listing into the view
    ///
    /// # Errors
    /// `SyncError::Closed` when the service has stopped
    pub async fn refresh(&self) -> Result<LoadSummary, SyncError> {
        self.request(|reply| Command::Refresh { reply }).await
    }

    /// Wait until the startup listing has been applied
    ///
    /// # Errors
    /// `SyncError::Closed` when the service stops first
    pub async fn wait_ready(&self) -> Result<TreeSnapshot, SyncError> {
        let mut events = self.events.subscribe();
        loop {
            let snapshot = self.snapshot().await?;
            if snapshot.phase == Phase::Ready {
                return Ok(snapshot);
            }
            loop {
                let event = tokio::select! {
                    event = events.recv() => event,
                    () = self.commands.closed() => return Err(SyncError::Closed),
                };
                match event {
                    Ok(TreeEvent::Ready { .. }) | Err(RecvError::Lagged(_)) => break,
                    Ok(_) => {}
                    Err(RecvError::Closed) => return Err(SyncError::Closed),
                }
            }
        }
    }

    /// Receive change notifications from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.events.subscribe()
    }

    /// Stop the service and its store subscription
    ///
    /// # Errors
    /// `SyncError::Closed` when it had already stopped
    pub async fn shutdown(&self) -> Result<(), SyncError> {
        self.request(|ack| Command::Shutdown { ack }).await
    }

    /// Whether the service task is gone
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn events_serialize_tagged() {
        let event = TreeEvent::LeafAdded {
            slot: SlotIndex(4),
            name: "Alice".to_string(),
            own: true,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"leaf_added","slot":4,"name":"Alice","own":true}"#);
    }

    #[tokio::test]
    async fn requests_after_shutdown_report_closed() {
        let reconciler =
            Reconciler::new(unity_core::TreeConfig::new(), unity_core::LocalPersistence::in_memory())
                .unwrap();
        let handle = TreeService::start(reconciler, Arc::new(unity_store::MemoryStore::default()));
        handle.wait_ready().await.unwrap();

        handle.shutdown().await.unwrap();
        assert!(handle.snapshot().await.unwrap_err().is_closed());
        assert!(handle.is_closed());
    }
}
