//! Control messages posted to the worker by panel pages.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

use crate::{Result, ServiceWorkerError};

/// Commands understood by the message handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Promote the waiting worker without waiting for old pages to close.
    SkipWaiting,
    /// Reply with the current cache version.
    GetVersion,
}

impl ControlMessage {
    /// `None` for anything that is not a known command.
    pub fn parse(data: &JsonValue) -> Option<Self> {
        if !data.is_object() {
            return None;
        }
        serde_json::from_value(data.clone()).ok()
    }
}

/// Reply to `GET_VERSION`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionReply {
    pub version: String,
}

/// Sending half of a message channel handed over with a message.
#[derive(Debug, Clone)]
pub struct ReplyPort {
    tx: mpsc::UnboundedSender<JsonValue>,
}

impl ReplyPort {
    /// Create a port and the receiver the page listens on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<JsonValue>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn post_message(&self, message: JsonValue) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| ServiceWorkerError::Client("Reply port is closed".to_string()))
    }
}

/// A message event: payload plus transferred ports.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub data: JsonValue,
    pub ports: Vec<ReplyPort>,
}

impl MessageEvent {
    pub fn new(data: JsonValue) -> Self {
        Self {
            data,
            ports: Vec::new(),
        }
    }

    pub fn with_port(mut self, port: ReplyPort) -> Self {
        self.ports.push(port);
        self
    }
}

/// What the message handler did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    SkippedWaiting,
    VersionSent(String),
    /// Unknown command, or `GET_VERSION` without a port.
    Ignored,
}
