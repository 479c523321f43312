//! Reconnecting real-time notification channel for the LifeCare client.
//!
//! A [`RealtimeChannel`] keeps one WebSocket connection per signed-in user,
//! authenticates it, reconnects after losses and fans incoming messages out
//! to observers registered by message kind.

pub mod channel;
pub mod config;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod session;
pub mod telemetry;
pub mod websocket;

mod tasks;

pub use channel::{ChannelState, RealtimeChannel};
pub use config::{ChannelConfig, Settings};
pub use error::{ChannelError, Result};
pub use registry::{MessageStream, Subscription, WILDCARD_KIND};
pub use session::SessionController;
pub use websocket::{ClientMessage, Connector, InboundMessage, LifecycleEvent};
