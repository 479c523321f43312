mod endpoint;
mod message;
mod transport;

pub use endpoint::Endpoint;
pub use message::{
    is_lifecycle_kind, ClientMessage, InboundMessage, LifecycleEvent, KIND_CLOSED, KIND_CONNECTING,
    KIND_EXHAUSTED, KIND_OPEN,
};
pub use transport::{
    CloseInfo, Connector, Frame, FrameSink, FrameStream, Transport, WebSocketConnector,
    NORMAL_CLOSURE,
};
