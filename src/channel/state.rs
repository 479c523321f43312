use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::metrics::MessageMetrics;
use crate::registry::SubscriptionRegistry;
use crate::websocket::Frame;

/// Channel states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// No session; initial state and the state after `disconnect`
    Idle,
    /// A transport connection attempt is in flight
    Connecting,
    /// Transport open; the only state in which `send` transmits
    Open,
    /// Connection lost, waiting for the reconnect delay
    Closed,
    /// Reconnection gave up; idle until `connect` is called again
    Exhausted,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Idle => "idle",
            ChannelState::Connecting => "connecting",
            ChannelState::Open => "open",
            ChannelState::Closed => "closed",
            ChannelState::Exhausted => "exhausted",
        }
    }

    /// No session is running in this state
    pub fn is_idle(&self) -> bool {
        matches!(self, ChannelState::Idle | ChannelState::Exhausted)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single connection slot of a channel.
///
/// `epoch` identifies the session that owns the slot. Every mutation made by
/// a supervisor carries its epoch and is ignored once a newer `connect` or a
/// `disconnect` has moved the epoch on.
struct ConnectionSlot {
    epoch: u64,
    state: ChannelState,
    outbound: Option<mpsc::Sender<Frame>>,
}

/// State shared between the channel handle, its supervisor and heartbeat
pub(crate) struct ChannelShared {
    pub(crate) registry: Arc<SubscriptionRegistry>,
    slot: Mutex<ConnectionSlot>,
}

impl ChannelShared {
    pub(crate) fn new() -> Self {
        Self {
            registry: Arc::new(SubscriptionRegistry::new()),
            slot: Mutex::new(ConnectionSlot {
                epoch: 0,
                state: ChannelState::Idle,
                outbound: None,
            }),
        }
    }

    fn slot(&self) -> MutexGuard<'_, ConnectionSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> ChannelState {
        self.slot().state
    }

    /// Start a new session, invalidating the previous one
    pub(crate) fn begin_session(&self) -> u64 {
        let mut slot = self.slot();
        slot.epoch += 1;
        slot.state = ChannelState::Connecting;
        slot.outbound = None;
        slot.epoch
    }

    /// Invalidate the current session and return to `Idle`
    pub(crate) fn end_session(&self) {
        let mut slot = self.slot();
        slot.epoch += 1;
        slot.state = ChannelState::Idle;
        slot.outbound = None;
    }

    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.slot().epoch == epoch
    }

    /// Move to `state` if `epoch` still owns the slot
    pub(crate) fn transition(&self, epoch: u64, state: ChannelState) -> bool {
        let mut slot = self.slot();
        if slot.epoch != epoch {
            return false;
        }
        slot.state = state;
        true
    }

    /// Install the outbound queue of a freshly opened connection
    pub(crate) fn attach(&self, epoch: u64, outbound: mpsc::Sender<Frame>) -> bool {
        let mut slot = self.slot();
        if slot.epoch != epoch {
            return false;
        }
        slot.state = ChannelState::Open;
        slot.outbound = Some(outbound);
        true
    }

    /// Drop the outbound queue of a connection that ended
    pub(crate) fn detach(&self, epoch: u64) {
        let mut slot = self.slot();
        if slot.epoch == epoch {
            slot.outbound = None;
            slot.state = ChannelState::Closed;
        }
    }

    /// Best-effort, at-most-once send. Dropped with a warning unless open.
    pub(crate) fn send_value(&self, value: &Value) {
        let message_type = metric_label(value);
        let text = match serde_json::to_string(value) {
            Ok(text) => text,
            Err(e) => {
                MessageMetrics::record_dropped_serialize();
                tracing::warn!(error = %e, "Failed to serialize outbound message");
                return;
            }
        };

        let slot = self.slot();
        let outbound = match (slot.state, slot.outbound.as_ref()) {
            (ChannelState::Open, Some(outbound)) => outbound,
            (state, _) => {
                MessageMetrics::record_dropped_not_open();
                tracing::warn!(
                    state = %state,
                    message_type = %message_type,
                    "WebSocket is not connected, dropping message"
                );
                return;
            }
        };

        match outbound.try_send(Frame::Text(text)) {
            Ok(()) => MessageMetrics::record_sent(message_type),
            Err(TrySendError::Full(_)) => {
                MessageMetrics::record_dropped_buffer_full();
                tracing::warn!(message_type = %message_type, "Outbound buffer full, dropping message");
            }
            Err(TrySendError::Closed(_)) => {
                MessageMetrics::record_dropped_not_open();
                tracing::warn!(message_type = %message_type, "Connection closing, dropping message");
            }
        }
    }
}

/// Bounded label set for the sent-messages counter
fn metric_label(value: &Value) -> &'static str {
    match value.get("type").and_then(Value::as_str) {
        Some("auth") => "auth",
        Some("ping") => "ping",
        _ => "other",
    }
}
