use thiserror::Error;

/// Errors surfaced by the channel API.
///
/// Only failures detected before any transport work is started are returned
/// to callers. Runtime failures (refused connections, drops, malformed
/// payloads) are logged and counted instead.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No tokio runtime: {0}")]
    Runtime(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Failures reported by a [`Connector`](crate::websocket::Connector) or the
/// frame sink/stream it produced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("I/O failure: {0}")]
    Io(String),

    #[error("connection closed")]
    Closed,
}

/// Inbound payload rejected before dispatch.
#[derive(Error, Debug)]
pub enum MessageError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("message has no string `type` or `kind` field")]
    MissingKind,
}

pub type Result<T> = std::result::Result<T, ChannelError>;
