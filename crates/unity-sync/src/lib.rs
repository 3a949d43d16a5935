//! Unity Sync - tree service
//!
//! Runs the reconciler as a single event loop fed by handle commands, the
//! store subscription and completed store writes. See [`TreeService`].
//!
//! # Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use unity_core::{LocalPersistence, Reconciler, TreeConfig};
//! use unity_store::MemoryStore;
//! use unity_sync::TreeService;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let reconciler = Reconciler::new(TreeConfig::new(), LocalPersistence::in_memory())?;
//! let tree = TreeService::start(reconciler, Arc::new(MemoryStore::default()));
//! tree.wait_ready().await?;
//! let added = tree.submit("Alice", Some("Oslo")).await?;
//! assert_eq!(added.slot().get(), 0);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod service;

pub use error::SyncError;
pub use service::{Submitted, TreeEvent, TreeHandle, TreeService};
