//! Local persistence
//!
//! A durable client-side snapshot of the occupancy view, stored under one
//! fixed key. It only shortens the blank period after a restart: the remote
//! listing always replaces whatever was restored.
//!
//! Snapshot document:
//!
//! ```json
//! {"visibleLeaves":[0,1],"leafNames":[[0,"Alice"],[1,"Bob"]],"nextLeafIndex":2,"totalLeaves":170}
//! ```

use crate::error::CacheError;
use crate::slot::{SlotIndex, SlotSpace};
use crate::view::AllocationView;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Key the snapshot is stored under
pub const STORAGE_KEY: &str = "tree-of-unity-state";

/// Serialized form of an [`AllocationView`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedTree {
    pub visible_leaves: Vec<u16>,
    pub leaf_names: Vec<(u16, String)>,
    pub next_leaf_index: u16,
    pub total_leaves: u16,
}

impl SavedTree {
    /// Capture a view
    #[must_use]
    pub fn capture(view: &AllocationView) -> Self {
        Self {
            visible_leaves: view.occupied().map(SlotIndex::get).collect(),
            leaf_names: view
                .iter()
                .map(|(slot, name)| (slot.get(), name.to_string()))
                .collect(),
            next_leaf_index: view.next_candidate(),
            total_leaves: view.space().total(),
        }
    }

    /// Rebuild a view, or `None` if the snapshot does not describe `space`
    /// consistently
    #[must_use]
    pub fn restore(self, space: SlotSpace) -> Option<AllocationView> {
        if self.total_leaves != space.total() {
            return None;
        }
        let visible: BTreeSet<u16> = self.visible_leaves.iter().copied().collect();
        if visible.len() != self.visible_leaves.len() {
            return None;
        }
        let named: BTreeSet<u16> = self.leaf_names.iter().map(|(slot, _)| *slot).collect();
        if named.len() != self.leaf_names.len() || named != visible {
            return None;
        }
        if visible.iter().any(|slot| !space.contains(SlotIndex(*slot))) {
            return None;
        }
        Some(AllocationView::from_entries(
            space,
            self.leaf_names
                .into_iter()
                .map(|(slot, name)| (SlotIndex(slot), name)),
        ))
    }
}

/// Durable string key-value slot (the client's local storage)
pub trait KeyValueCache: Send + Sync + std::fmt::Debug {
    /// Read a value
    ///
    /// # Errors
    /// Backend read failure. A missing key is `Ok(None)`.
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Write a value, replacing any previous one
    ///
    /// # Errors
    /// Backend write failure
    fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;

    /// Remove a value; removing a missing key is not an error
    ///
    /// # Errors
    /// Backend delete failure
    fn remove(&self, key: &str) -> Result<(), CacheError>;
}

/// One JSON file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    #[inline]
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the cache files
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueCache for FileCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir)?;
        let target = self.path_for(key);
        let staging = self.dir.join(format!(".{key}.json.tmp"));
        {
            let mut file = fs::File::create(&staging)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&staging, &target)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local cache for tests and kiosks without a writable disk
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Saves and restores the occupancy view through a [`KeyValueCache`]
#[derive(Debug)]
pub struct LocalPersistence {
    cache: Box<dyn KeyValueCache>,
}

impl LocalPersistence {
    #[inline]
    #[must_use]
    pub fn new(cache: impl KeyValueCache + 'static) -> Self {
        Self {
            cache: Box::new(cache),
        }
    }

    /// Persistence backed by a [`MemoryCache`]
    #[inline]
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(MemoryCache::new())
    }

    /// Write the view under [`STORAGE_KEY`]
    ///
    /// # Errors
    /// Encoding or backend failure
    pub fn save(&self, view: &AllocationView) -> Result<(), CacheError> {
        let encoded = serde_json::to_string(&SavedTree::capture(view))?;
        self.cache.set(STORAGE_KEY, &encoded)
    }

    /// Restore the saved view; any read, parse or consistency failure yields `None`
    #[must_use]
    pub fn load(&self, space: SlotSpace) -> Option<AllocationView> {
        let raw = match self.cache.get(STORAGE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "Error loading tree state");
                return None;
            }
        };
        let saved: SavedTree = match serde_json::from_str(&raw) {
            Ok(saved) => saved,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable tree state");
                return None;
            }
        };
        let restored = saved.restore(space);
        if restored.is_none() {
            tracing::warn!("Discarding inconsistent tree state");
        }
        restored
    }

    /// Remove the saved view
    ///
    /// # Errors
    /// Backend failure
    pub fn clear(&self) -> Result<(), CacheError> {
        self.cache.remove(STORAGE_KEY)
    }

    /// Whether anything is stored under the key (valid or not)
    #[must_use]
    pub fn has_saved_state(&self) -> bool {
        match self.cache.get(STORAGE_KEY) {
            Ok(value) => value.is_some(),
            Err(e) => {
                tracing::warn!(error = %e, "Error checking saved state");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::Placement;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn sample_view() -> AllocationView {
        let mut view = AllocationView::new(SlotSpace::default());
        assert_eq!(view.place(SlotIndex(0), "Alice"), Placement::Added);
        assert_eq!(view.place(SlotIndex(2), "Bob"), Placement::Added);
        view
    }

    #[test]
    fn document_shape() {
        let saved = SavedTree::capture(&sample_view());
        let json = serde_json::to_value(&saved).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "visibleLeaves": [0, 2],
                "leafNames": [[0, "Alice"], [2, "Bob"]],
                "nextLeafIndex": 1,
                "totalLeaves": 170
            })
        );
    }

    #[test]
    fn memory_round_trip_and_clear() {
        let persistence = LocalPersistence::in_memory();
        assert!(!persistence.has_saved_state());
        assert!(persistence.load(SlotSpace::default()).is_none());

        let view = sample_view();
        persistence.save(&view).unwrap();
        assert!(persistence.has_saved_state());
        assert_eq!(persistence.load(SlotSpace::default()), Some(view));

        persistence.clear().unwrap();
        assert!(!persistence.has_saved_state());
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = LocalPersistence::new(FileCache::new(dir.path()));
        let view = sample_view();
        persistence.save(&view).unwrap();

        let reopened = LocalPersistence::new(FileCache::new(dir.path()));
        assert_eq!(reopened.load(SlotSpace::default()), Some(view));
        assert!(dir.path().join("tree-of-unity-state.json").exists());
    }

    #[test]
    fn corrupt_or_inconsistent_state_is_absent() {
        let persistence = LocalPersistence::new(MemoryCache::new());
        let space = SlotSpace::default();

        for raw in [
            "not json",
            r#"{"visibleLeaves":[0],"leafNames":[[0,"A"]],"nextLeafIndex":1,"totalLeaves":99}"#,
            r#"{"visibleLeaves":[0,1],"leafNames":[[0,"A"]],"nextLeafIndex":1,"totalLeaves":170}"#,
            r#"{"visibleLeaves":[200],"leafNames":[[200,"A"]],"nextLeafIndex":0,"totalLeaves":170}"#,
            r#"{"visibleLeaves":[-1],"leafNames":[[-1,"A"]],"nextLeafIndex":0,"totalLeaves":170}"#,
        ] {
            persistence.cache.set(STORAGE_KEY, raw).unwrap();
            assert!(persistence.load(space).is_none(), "accepted {raw}");
        }
    }

    proptest! {
        #[test]
        fn prop_round_trip_preserves_occupancy(
            entries in proptest::collection::btree_map(0u16..170, "[a-zA-Z ]{2,12}", 0..60)
        ) {
            let space = SlotSpace::default();
            let view = AllocationView::from_entries(
                space,
                entries.iter().map(|(slot, name)| (SlotIndex(*slot), name.clone())),
            );
            let restored = SavedTree::capture(&view).restore(space);
            prop_assert_eq!(restored, Some(view));
        }
    }
}
