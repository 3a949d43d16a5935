//! Server-Sent Events plumbing shared by the network adapters
//!
//! - [`EventStreamParser`] turns response chunks into [`StreamEvent`]s.
//!   Bytes are buffered until a full line is available, so multi-byte
//!   characters split across chunks decode correctly.
//! - [`follow`] keeps one stream open forever, reconnecting after a fixed
//!   delay whenever it drops.

use crate::error::StoreError;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use std::time::Duration;

/// One dispatched SSE event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamEvent {
    /// `event:` field; `None` for unnamed events
    pub event_type: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
    /// `id:` field
    pub id: Option<String>,
}

impl StreamEvent {
    /// Check the event name
    #[inline]
    #[must_use]
    pub fn is(&self, name: &str) -> bool {
        self.event_type.as_deref() == Some(name)
    }
}

/// Incremental SSE decoder
#[derive(Debug, Default)]
pub struct EventStreamParser {
    pending: Vec<u8>,
    event_type: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl EventStreamParser {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk, returning every event it completes
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            let text = text.strip_suffix('\r').unwrap_or(&text).to_string();
            if let Some(event) = self.process_line(&text) {
                events.push(event);
            }
        }
        events
    }

    /// Drop partial state (after a reconnect)
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn process_line(&mut self, line: &str) -> Option<StreamEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event_type = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<StreamEvent> {
        if self.data.is_empty() && self.event_type.is_none() {
            return None;
        }
        Some(StreamEvent {
            event_type: self.event_type.take(),
            data: std::mem::take(&mut self.data).join("\n"),
            id: self.id.take(),
        })
    }
}

/// What a handler wants after seeing an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Reconnect,
    Stop,
}

/// Consumer of one followed stream
#[async_trait::async_trait]
pub(crate) trait StreamHandler: Send {
    async fn on_event(&mut self, event: StreamEvent) -> Flow;

    /// Whether the downstream subscriber has gone away
    fn is_closed(&self) -> bool;
}

/// Follow `url` until the handler stops, reconnecting after `delay`
pub(crate) async fn follow<H: StreamHandler>(
    client: reqwest::Client,
    url: String,
    delay: Duration,
    mut handler: H,
) {
    loop {
        match stream_once(&client, &url, &mut handler).await {
            Ok(Flow::Stop) => {
                tracing::debug!(url = %url, "Event stream subscriber gone");
                return;
            }
            Ok(_) => {
                tracing::info!(url = %url, "Event stream ended, will reconnect");
            }
            Err(e) => {
                tracing::warn!(
                    url = %url,
                    error = %e,
                    reconnect_in_ms = delay.as_millis(),
                    "Event stream connection failed, will reconnect"
                );
            }
        }
        if handler.is_closed() {
            return;
        }
        tokio::time::sleep(delay).await;
    }
}

async fn stream_once<H: StreamHandler>(
    client: &reqwest::Client,
    url: &str,
    handler: &mut H,
) -> Result<Flow, StoreError> {
    let response = client
        .get(url)
        .header(ACCEPT, "text/event-stream")
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(StoreError::Status(response.status()));
    }
    tracing::info!(url = %url, "Connected to event stream");

    let mut body = response.bytes_stream();
    let mut parser = EventStreamParser::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        for event in parser.feed(&chunk) {
            match handler.on_event(event).await {
                Flow::Continue => {}
                other => return Ok(other),
            }
        }
    }
    Ok(Flow::Reconnect)
}
