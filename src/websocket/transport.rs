//! Transport seam between the channel and the network.
//!
//! The channel only speaks [`Frame`]s through a boxed sink/stream pair, which
//! lets tests drive it with in-memory channels while production uses
//! `tokio-tungstenite`.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::error::TransportError;

use super::Endpoint;

/// Close code sent when the client disconnects on purpose
pub const NORMAL_CLOSURE: u16 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    pub fn normal() -> Self {
        Self {
            code: NORMAL_CLOSURE,
            reason: "client disconnect".to_string(),
        }
    }
}

/// Application-level frames exchanged with the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// Payload that is not UTF-8 text; always rejected as malformed
    Binary(Vec<u8>),
    Close(Option<CloseInfo>),
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// An established duplex connection
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Transport {
    pub fn new<S, R>(sink: S, stream: R) -> Self
    where
        S: Sink<Frame, Error = TransportError> + Send + 'static,
        R: Stream<Item = Result<Frame, TransportError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

/// Opens transports to an endpoint
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Transport, TransportError>;
}

/// WebSocket connector backed by `tokio-tungstenite`
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Transport, TransportError> {
        let (ws, _response) = connect_async(endpoint.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (write, read) = ws.split();

        let sink = write
            .sink_map_err(|e| TransportError::Io(e.to_string()))
            .with(|frame: Frame| future::ready(Ok::<_, TransportError>(frame_to_message(frame))));

        let stream = read.filter_map(|result| future::ready(message_to_frame(result)));

        Ok(Transport::new(sink, stream))
    }
}

fn frame_to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data.into()),
        Frame::Close(info) => Message::Close(info.map(|info| CloseFrame {
            code: CloseCode::from(info.code),
            reason: info.reason.into(),
        })),
    }
}

fn message_to_frame(
    result: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<Frame, TransportError>> {
    match result {
        Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
        Ok(Message::Binary(data)) => Some(Ok(Frame::Binary(data.to_vec()))),
        Ok(Message::Close(frame)) => Some(Ok(Frame::Close(frame.map(|frame| CloseInfo {
            code: u16::from(frame.code),
            reason: frame.reason.as_str().to_owned(),
        })))),
        // tungstenite answers pings itself
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => None,
        Err(e) => Some(Err(TransportError::Io(e.to_string()))),
    }
}
