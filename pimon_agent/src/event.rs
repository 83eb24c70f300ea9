//! Wire-ready events carried by the bus. Payloads are serialized once by the
//! producer and shared between subscribers.

use std::sync::Arc;

use crate::types::{ErrorPayload, LogLine, LogSource, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Plain `data:` frame (metric snapshots, stdout lines).
    Data,
    /// `event: error` frame (failed ticks).
    Error,
    /// `event: stderr` frame.
    Stderr,
    /// `event: system` frame (relay status lines).
    System,
}

impl EventKind {
    /// SSE `event:` name; `None` for unnamed data frames.
    pub fn name(self) -> Option<&'static str> {
        match self {
            EventKind::Data => None,
            EventKind::Error => Some("error"),
            EventKind::Stderr => Some("stderr"),
            EventKind::System => Some("system"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub kind: EventKind,
    pub data: Arc<str>,
}

impl StreamEvent {
    pub fn new(kind: EventKind, data: impl Into<Arc<str>>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }

    pub fn snapshot(snapshot: &Snapshot) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_string(snapshot)?;
        Ok(Self::new(EventKind::Data, json))
    }

    pub fn error(reason: impl Into<String>) -> Self {
        let payload = ErrorPayload {
            error: reason.into(),
        };
        // A struct with one string field always serializes.
        let json = serde_json::to_string(&payload)
            .unwrap_or_else(|_| String::from(r#"{"error":"unknown"}"#));
        Self::new(EventKind::Error, json)
    }

    pub fn log(line: &LogLine) -> Self {
        let kind = match line.source {
            LogSource::Stdout => EventKind::Data,
            LogSource::Stderr => EventKind::Stderr,
            LogSource::System => EventKind::System,
        };
        Self::new(kind, line.text.as_str())
    }

    pub fn is_error(&self) -> bool {
        self.kind == EventKind::Error
    }
}
