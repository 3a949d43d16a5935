//! Application configuration
//!
//! Loaded from an optional TOML file, then overridden by command-line
//! flags and their environment variables. Every section is optional.
//!
//! ```toml
//! [tree]
//! total_slots = 170
//! reserved_slots = 40
//!
//! [store]
//! backend = "event-stream"
//! base_url = "http://kiosk.local:8787"
//!
//! [cache]
//! dir = "/var/lib/tree-of-unity"
//!
//! [server]
//! bind = "0.0.0.0:8787"
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use unity_core::{FileCache, LocalPersistence, TreeConfig};
use unity_server::ServerConfig;
use unity_store::StoreConfig;

/// Local snapshot location
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory for the snapshot file; `None` keeps it in memory only
    pub dir: Option<PathBuf>,
}

impl CacheConfig {
    /// Persistence backed by this location
    #[must_use]
    pub fn persistence(&self) -> LocalPersistence {
        match &self.dir {
            Some(dir) => LocalPersistence::new(FileCache::new(dir)),
            None => LocalPersistence::in_memory(),
        }
    }
}

/// Everything the binary can be configured with
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub tree: TreeConfig,
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Parse a TOML document
    ///
    /// # Errors
    /// Malformed TOML or unknown enum values
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Read `path`, or use defaults when no path is given
    ///
    /// # Errors
    /// Unreadable or malformed file
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config = Self::from_toml_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }
}
