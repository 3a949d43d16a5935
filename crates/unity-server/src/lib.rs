//! Unity Server - leaves server
//!
//! Serves the shared leaves collection over HTTP for the event-stream
//! backend: a JSON listing, inserts with optional slot uniqueness, and a
//! `new-leaf` Server-Sent Events feed. Storage is any
//! [`RemoteStore`](unity_store::RemoteStore), normally the in-process
//! [`MemoryStore`](unity_store::MemoryStore).

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod routes;
pub mod server;

pub use config::ServerConfig;
pub use error::{ErrorResponse, ServerError};
pub use routes::{routes, LeavesApi};
pub use server::bind;
