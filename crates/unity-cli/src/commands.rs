//! Subcommand implementations

use crate::config::AppConfig;
use anyhow::Context;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use unity_core::{Commit, Reconciler, TreeSnapshot};
use unity_server::LeavesApi;
use unity_store::{Backend, MemoryStore};
use unity_sync::{TreeEvent, TreeHandle, TreeService};

/// Exit code for refusals the person submitting should see
const REFUSED: u8 = 2;

/// Run a leaves server until interrupted
pub async fn serve(config: &AppConfig) -> anyhow::Result<ExitCode> {
    let space = config.tree.slot_space().context("invalid tree configuration")?;
    let store = MemoryStore::new(config.server.unique_slots);
    let api = LeavesApi::new(Arc::new(store), space).with_keep_alive(config.server.keep_alive());

    let (addr, server) = unity_server::bind(api, config.server.bind, shutdown_signal())?;
    println!("Serving leaves on http://{addr}");
    server.await;
    Ok(ExitCode::SUCCESS)
}

/// Add one leaf
pub async fn submit(config: &AppConfig, name: &str, city: Option<&str>) -> anyhow::Result<ExitCode> {
    let tree = start_tree(config)?;
    tree.wait_ready().await?;
    let outcome = tree.submit(name, city).await;
    let _ = tree.shutdown().await;

    match outcome {
        Ok(added) => {
            match &added.commit {
                Commit::Placed(slot) => println!("{} is on leaf {slot}", added.record.name),
                Commit::Shadowed { slot, by } => println!(
                    "{} was stored on leaf {slot}, but {by} reached it first",
                    added.record.name
                ),
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_user_facing() => {
            eprintln!("{e}");
            Ok(ExitCode::from(REFUSED))
        }
        Err(e) => Err(e.into()),
    }
}

/// Print the tree once it has loaded
pub async fn show(config: &AppConfig, json: bool) -> anyhow::Result<ExitCode> {
    let tree = start_tree(config)?;
    let snapshot = tree.wait_ready().await?;
    let _ = tree.shutdown().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print!("{}", render(&snapshot));
    }
    Ok(ExitCode::SUCCESS)
}

/// Follow additions until interrupted
pub async fn watch(config: &AppConfig) -> anyhow::Result<ExitCode> {
    let tree = start_tree(config)?;
    let mut events = tree.subscribe();
    let snapshot = tree.wait_ready().await?;
    println!("{} leaves on the tree, watching for more", snapshot.leaves.len());

    let stop = shutdown_signal();
    tokio::pin!(stop);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(TreeEvent::LeafAdded { slot, name, .. }) => println!("+ leaf {slot}: {name}"),
                Ok(TreeEvent::Collision { slot, kept, rejected }) => {
                    println!("! leaf {slot}: kept {kept}, ignored {rejected}");
                }
                Ok(TreeEvent::Ready { .. }) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Watcher fell behind, some additions not printed");
                }
                Err(RecvError::Closed) => break,
            },
            () = &mut stop => break,
        }
    }
    let _ = tree.shutdown().await;
    Ok(ExitCode::SUCCESS)
}

/// Delete the local snapshot
pub fn reset_cache(config: &AppConfig) -> anyhow::Result<ExitCode> {
    let persistence = config.cache.persistence();
    if persistence.has_saved_state() {
        persistence.clear().context("removing cached tree")?;
        println!("Local tree snapshot removed");
    } else {
        println!("No local tree snapshot");
    }
    Ok(ExitCode::SUCCESS)
}

fn start_tree(config: &AppConfig) -> anyhow::Result<TreeHandle> {
    let store = unity_store::connect(&config.store).context("connecting to the leaves store")?;
    if store.backend() == Backend::Memory {
        tracing::warn!("Memory backend is private to this process; nothing is shared");
    }
    let reconciler = Reconciler::new(config.tree.clone(), config.cache.persistence())
        .context("invalid tree configuration")?;
    Ok(TreeService::start(reconciler, store))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Cannot listen for interrupt");
        std::future::pending::<()>().await;
    }
    tracing::info!("Interrupted, shutting down");
}

/// Plain-text listing of a snapshot
#[must_use]
pub fn render(snapshot: &TreeSnapshot) -> String {
    let mut out = format!(
        "{} leaves, {} free ({} slots, {} reserved)\n",
        snapshot.leaves.len(),
        snapshot.free_slots,
        snapshot.total_slots,
        snapshot.reserved_slots,
    );
    for leaf in &snapshot.leaves {
        out.push_str(&format!("{:>5}  {}\n", leaf.slot.get(), leaf.name));
    }
    if !snapshot.recent.is_empty() {
        out.push_str("recently added here:\n");
        for recent in &snapshot.recent {
            out.push_str(&format!("{:>5}  {}\n", recent.slot.get(), recent.name));
        }
    }
    out
}
