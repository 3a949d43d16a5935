//! Store selection
//!
//! Picks one of the three adapters from configuration instead of from the
//! build.

use crate::error::StoreError;
use crate::memory::MemoryStore;
use crate::realtime_db::RealtimeDbStore;
use crate::sse::EventStreamStore;
use crate::store::RemoteStore;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Which adapter to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// In-process realtime table
    #[default]
    Memory,
    /// Leaves server over REST + SSE
    EventStream,
    /// JSON-tree realtime database
    RealtimeDb,
}

impl Backend {
    /// Configuration spelling
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::EventStream => "event-stream",
            Self::RealtimeDb => "realtime-db",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(Self::Memory),
            "event-stream" | "sse" => Ok(Self::EventStream),
            "realtime-db" | "rtdb" => Ok(Self::RealtimeDb),
            other => Err(format!(
                "unknown backend '{other}' (expected memory, event-stream or realtime-db)"
            )),
        }
    }
}

/// Remote store settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Adapter to use
    pub backend: Backend,
    /// Server or database URL (network backends)
    pub base_url: Option<String>,
    /// Fixed delay before a dropped change feed reconnects
    pub reconnect_delay_ms: u64,
    /// TCP connect timeout; requests themselves have none
    pub connect_timeout_ms: u64,
    /// Reject duplicate slots (memory backend)
    pub unique_slots: bool,
}

impl StoreConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a backend and URL
    #[inline]
    #[must_use]
    pub fn with_backend(mut self, backend: Backend, base_url: Option<String>) -> Self {
        self.backend = backend;
        self.base_url = base_url;
        self
    }

    /// With a reconnect delay
    #[inline]
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[inline]
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    fn require_url(&self) -> Result<&str, StoreError> {
        self.base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or(StoreError::MissingUrl(self.backend))
    }

    fn http_client(&self) -> Result<reqwest::Client, StoreError> {
        // no overall timeout: change feeds are long-lived
        Ok(reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .build()?)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            base_url: None,
            reconnect_delay_ms: 3000,
            connect_timeout_ms: 10_000,
            unique_slots: true,
        }
    }
}

/// Build the configured adapter
///
/// # Errors
/// - `StoreError::MissingUrl` for a network backend without `base_url`
/// - `StoreError::Http` if the HTTP client cannot be built
pub fn connect(config: &StoreConfig) -> Result<Arc<dyn RemoteStore>, StoreError> {
    let store: Arc<dyn RemoteStore> = match config.backend {
        Backend::Memory => Arc::new(MemoryStore::new(config.unique_slots)),
        Backend::EventStream => Arc::new(EventStreamStore::new(
            config.http_client()?,
            config.require_url()?,
            config.reconnect_delay(),
        )),
        Backend::RealtimeDb => Arc::new(RealtimeDbStore::new(
            config.http_client()?,
            config.require_url()?,
            config.reconnect_delay(),
        )),
    };
    tracing::info!(backend = %config.backend, url = ?config.base_url, "Remote store selected");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_spellings() {
        assert_eq!("sse".parse::<Backend>(), Ok(Backend::EventStream));
        assert_eq!("realtime-db".parse::<Backend>(), Ok(Backend::RealtimeDb));
        assert!("postgres".parse::<Backend>().is_err());
        assert_eq!(Backend::EventStream.to_string(), "event-stream");
    }

    #[test]
    fn config_from_json_fragment() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"backend":"realtime-db","base_url":"https://db"}"#).unwrap();
        assert_eq!(config.backend, Backend::RealtimeDb);
        assert_eq!(config.reconnect_delay(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn network_backend_requires_url() {
        let config = StoreConfig::new().with_backend(Backend::EventStream, None);
        assert!(matches!(connect(&config), Err(StoreError::MissingUrl(Backend::EventStream))));

        let memory = connect(&StoreConfig::new()).unwrap();
        assert_eq!(memory.backend(), Backend::Memory);
    }
}
