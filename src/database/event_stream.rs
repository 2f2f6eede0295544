//! Server-sent event decoding for realtime database streams
//!
//! # REST Reference
//! A `GET {path}.json` with `Accept: text/event-stream` answers with events:
//! - `put` - `{"path": "/a/b", "data": ...}` replaces the data at `path`
//! - `patch` - `{"path": "/a", "data": {...}}` merges children at `path`
//! - `keep-alive` - no-op
//! - `cancel` - the rules no longer allow reading the location
//! - `auth_revoked` - the auth credential expired or was revoked

use super::path::DatabasePath;
use crate::error::BackendError;
use serde::Deserialize;
use serde_json::{Map, Value};

/// One raw event from the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    pub(crate) event: String,
    pub(crate) data: String,
}

/// Incremental `text/event-stream` parser
///
/// Chunks may split lines and events at arbitrary byte offsets.
#[derive(Debug, Default)]
pub(crate) struct EventStreamParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl EventStreamParser {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every event it completes
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }

            // Comment line
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }
        events
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let data = std::mem::take(&mut self.data);
        if event.is_none() && data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data: data.join("\n"),
        })
    }
}

/// Decoded realtime database stream event
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StreamEvent {
    Put { path: DatabasePath, data: Value },
    Patch { path: DatabasePath, data: Map<String, Value> },
    KeepAlive,
    Cancel(String),
    AuthRevoked(String),
}

#[derive(Deserialize)]
struct Payload {
    path: String,
    #[serde(default)]
    data: Value,
}

impl StreamEvent {
    /// Decode a raw event; unknown event types yield `None`
    pub(crate) fn decode(raw: &SseEvent) -> Result<Option<Self>, BackendError> {
        let event = match raw.event.as_str() {
            "put" => {
                let payload: Payload = serde_json::from_str(&raw.data)?;
                StreamEvent::Put {
                    path: DatabasePath::new(&payload.path),
                    data: payload.data,
                }
            }
            "patch" => {
                let payload: Payload = serde_json::from_str(&raw.data)?;
                let Value::Object(data) = payload.data else {
                    return Err(BackendError::Decode("patch event data is not an object".to_string()));
                };
                StreamEvent::Patch {
                    path: DatabasePath::new(&payload.path),
                    data,
                }
            }
            "keep-alive" => StreamEvent::KeepAlive,
            "cancel" => StreamEvent::Cancel(reason(&raw.data, "permission denied")),
            "auth_revoked" => StreamEvent::AuthRevoked(reason(&raw.data, "credential is no longer valid")),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

/// Event data is either `null` or a JSON string
fn reason(data: &str, fallback: &str) -> String {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::String(s)) => s,
        Ok(Value::Null) => fallback.to_string(),
        _ if data.trim().is_empty() => fallback.to_string(),
        _ => data.trim().to_string(),
    }
}
