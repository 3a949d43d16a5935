//! Unity Store - remote store adapters
//!
//! The shared `leaves` collection behind one capability trait,
//! [`RemoteStore`], with three interchangeable implementations chosen by
//! [`StoreConfig::backend`]:
//! - [`MemoryStore`]: in-process realtime table
//! - [`EventStreamStore`]: leaves server over REST + Server-Sent Events
//! - [`RealtimeDbStore`]: JSON-tree realtime database
//!
//! Reads fail soft, writes fail hard, change feeds reconnect silently.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod event_stream;
pub mod memory;
pub mod realtime_db;
pub mod sse;
pub mod store;

pub use config::{connect, Backend, StoreConfig};
pub use error::StoreError;
pub use event_stream::{EventStreamParser, StreamEvent};
pub use memory::MemoryStore;
pub use realtime_db::RealtimeDbStore;
pub use sse::{EventStreamStore, NEW_LEAF_EVENT};
pub use store::{InsertSink, RemoteStore, Subscription};

pub use reqwest::StatusCode;
