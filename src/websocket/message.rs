use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::MessageError;

/// Kind tag emitted when a connection attempt starts
pub const KIND_CONNECTING: &str = "channel.connecting";
/// Kind tag emitted once the transport handshake completes
pub const KIND_OPEN: &str = "channel.open";
/// Kind tag emitted whenever a connection ends without `disconnect`
pub const KIND_CLOSED: &str = "channel.closed";
/// Kind tag emitted when reconnection stops for good
pub const KIND_EXHAUSTED: &str = "channel.exhausted";

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth { token: String },
    Ping,
}

impl ClientMessage {
    pub fn auth(token: impl Into<String>) -> Self {
        Self::Auth {
            token: token.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A tagged JSON object received from the server.
///
/// The body is kept verbatim; only the discriminator is extracted. `type` is
/// preferred since that is what the server emits, `kind` is accepted as a
/// fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    kind: String,
    body: Value,
}

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        let body: Value = serde_json::from_str(text)?;
        Self::from_value(body)
    }

    pub fn from_value(body: Value) -> Result<Self, MessageError> {
        let object = body.as_object().ok_or(MessageError::NotAnObject)?;
        let kind = discriminator(object).ok_or(MessageError::MissingKind)?;
        Ok(Self {
            kind: kind.to_string(),
            body,
        })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The full message object, discriminator included
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// The `data` member most server messages carry
    pub fn data(&self) -> Option<&Value> {
        self.body.get("data")
    }

    pub fn into_body(self) -> Value {
        self.body
    }

    /// Decode the `data` member into a typed payload
    pub fn decode_data<T: DeserializeOwned>(&self) -> Result<T, MessageError> {
        let data = self.data().cloned().unwrap_or(Value::Null);
        Ok(serde_json::from_value(data)?)
    }

    pub fn is_lifecycle(&self) -> bool {
        is_lifecycle_kind(&self.kind)
    }
}

fn discriminator(object: &Map<String, Value>) -> Option<&str> {
    object
        .get("type")
        .and_then(Value::as_str)
        .or_else(|| object.get("kind").and_then(Value::as_str))
}

pub fn is_lifecycle_kind(kind: &str) -> bool {
    matches!(kind, KIND_CONNECTING | KIND_OPEN | KIND_CLOSED | KIND_EXHAUSTED)
}

/// Connection state changes published to observers under the reserved kinds
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Connecting {
        attempt: u32,
    },
    Open,
    Closed {
        code: Option<u16>,
        reason: String,
        will_retry: bool,
    },
    Exhausted {
        attempts: u32,
        reason: String,
    },
}

impl LifecycleEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connecting { .. } => KIND_CONNECTING,
            Self::Open => KIND_OPEN,
            Self::Closed { .. } => KIND_CLOSED,
            Self::Exhausted { .. } => KIND_EXHAUSTED,
        }
    }

    pub fn into_message(self) -> InboundMessage {
        let kind = self.kind();
        let timestamp = chrono::Utc::now().to_rfc3339();
        let body = match self {
            Self::Connecting { attempt } => json!({
                "type": kind,
                "attempt": attempt,
                "timestamp": timestamp,
            }),
            Self::Open => json!({
                "type": kind,
                "timestamp": timestamp,
            }),
            Self::Closed {
                code,
                reason,
                will_retry,
            } => json!({
                "type": kind,
                "code": code,
                "reason": reason,
                "will_retry": will_retry,
                "timestamp": timestamp,
            }),
            Self::Exhausted { attempts, reason } => json!({
                "type": kind,
                "attempts": attempts,
                "reason": reason,
                "timestamp": timestamp,
            }),
        };
        InboundMessage {
            kind: kind.to_string(),
            body,
        }
    }
}
