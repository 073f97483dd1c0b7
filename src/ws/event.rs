//! Typed lifecycle and data events published by [`Client`](super::Client).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::emitter::Event;

/// Connection status. A client starts [`Closed`](Self::Closed).
#[non_exhaustive]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Connecting,
    Open,
    #[default]
    Closed,
    Error,
}

impl ConnectionStatus {
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

/// How a transport closed.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseDetails {
    /// WebSocket close code (1000 = normal, 1006 = abnormal)
    pub code: u16,
    pub reason: String,
    /// Whether the closing handshake completed
    pub clean: bool,
}

impl CloseDetails {
    pub const NORMAL: u16 = 1000;
    pub const ABNORMAL: u16 = 1006;

    #[must_use]
    pub fn clean<S: Into<String>>(code: u16, reason: S) -> Self {
        Self {
            code,
            reason: reason.into(),
            clean: true,
        }
    }

    #[must_use]
    pub fn abnormal<S: Into<String>>(reason: S) -> Self {
        Self {
            code: Self::ABNORMAL,
            reason: reason.into(),
            clean: false,
        }
    }
}

impl fmt::Display for CloseDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let clean = if self.clean { "clean" } else { "unclean" };
        if self.reason.is_empty() {
            write!(f, "{clean} close (code: {})", self.code)
        } else {
            write!(f, "{clean} close (code: {}): {}", self.code, self.reason)
        }
    }
}

/// Low-level transport failure.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub message: String,
}

impl ErrorDetails {
    #[must_use]
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Conditions that are silent unless [`Config::diagnostics`](super::config::Config::diagnostics)
/// is enabled.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// An inbound frame was not valid JSON and was dropped
    MalformedMessage { raw: String, error: String },
    /// The reconnect budget is spent; no further attempt will be scheduled
    ReconnectExhausted { attempts: u32 },
}

/// Event published through the client's [`EventEmitter`](crate::emitter::EventEmitter).
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Open,
    /// A parsed inbound JSON document
    Message(Value),
    /// `None` when the close was requested through `disconnect`
    Close(Option<CloseDetails>),
    /// `None` when the transport gave no detail
    Error(Option<ErrorDetails>),
    StatusChange(ConnectionStatus),
    Diagnostic(Diagnostic),
}

/// Channel names listeners subscribe to.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    Open,
    Message,
    Close,
    Error,
    StatusChange,
    Diagnostic,
}

impl Event for SocketEvent {
    type Kind = EventKind;

    fn kind(&self) -> EventKind {
        match self {
            Self::Open => EventKind::Open,
            Self::Message(_) => EventKind::Message,
            Self::Close(_) => EventKind::Close,
            Self::Error(_) => EventKind::Error,
            Self::StatusChange(_) => EventKind::StatusChange,
            Self::Diagnostic(_) => EventKind::Diagnostic,
        }
    }

    /// Messages carrying both `type` and `status` are keyed as `{type}_{status}`.
    fn duplicate_key(&self) -> Option<String> {
        let Self::Message(Value::Object(payload)) = self else {
            return None;
        };
        let kind = key_part(payload.get("type")?)?;
        let status = key_part(payload.get("status")?)?;
        Some(format!("{kind}_{status}"))
    }
}

fn key_part(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Wire unit: a JSON object with at least a `type` field.
///
/// # Example
///
/// ```
/// use resilient_socket::ws::Message;
/// use serde_json::json;
///
/// let msg = Message::new("subscribe").with("ticket", json!("T-1"));
/// assert_eq!(
///     serde_json::to_value(&msg).unwrap(),
///     json!({ "type": "subscribe", "ticket": "T-1" })
/// );
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Message {
    #[must_use]
    pub fn new<S: Into<String>>(message_type: S) -> Self {
        Self {
            message_type: message_type.into(),
            fields: Map::new(),
        }
    }

    #[must_use]
    pub fn with<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}
