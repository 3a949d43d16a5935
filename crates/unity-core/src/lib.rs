//! Unity Core - leaf slot allocation for the Tree of Unity
//!
//! Everything that decides where a visitor's leaf goes, with no I/O beyond
//! the local snapshot:
//! - The slot space and its reserved decorative range
//! - Leaf records as stored upstream
//! - The occupancy view and the lowest-free allocator
//! - Local persistence of the view
//! - The reconciler that merges cached, listed and pushed state
//!
//! # Example
//!
//! ```rust
//! use unity_core::{LocalPersistence, Reconciler, TreeConfig};
//!
//! let mut reconciler = Reconciler::new(TreeConfig::new(), LocalPersistence::in_memory()).unwrap();
//! reconciler.begin_loading();
//! reconciler.finish_loading(&[]);
//!
//! let leaf = reconciler.begin_submit("Alice", Some("Oslo"), chrono::Utc::now()).unwrap();
//! assert_eq!(leaf.slot.get(), 0);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod allocator;
pub mod config;
pub mod error;
pub mod persistence;
pub mod reconciler;
pub mod record;
pub mod slot;
pub mod view;

pub use allocator::{allocate, allocate_excluding, Allocation};
pub use config::TreeConfig;
pub use error::{CacheError, ConfigError, NameError, ReconcileError};
pub use persistence::{FileCache, KeyValueCache, LocalPersistence, MemoryCache, SavedTree, STORAGE_KEY};
pub use reconciler::{
    Commit, LoadSummary, Phase, PlacedLeaf, PushOutcome, RecentAddition, Reconciler, SyncStats,
    TreeSnapshot,
};
pub use record::{normalize_city, LeafName, LeafRecord, NewLeaf, RecordId, UNKNOWN_CITY};
pub use slot::{SlotIndex, SlotSpace};
pub use view::AllocationView;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
