use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::config::{AuthFailurePolicy, ChannelConfig};
use crate::metrics::{ConnectionMetrics, MessageMetrics};
use crate::websocket::{
    ClientMessage, CloseInfo, Connector, Endpoint, Frame, InboundMessage, LifecycleEvent,
    Transport,
};

use super::reconnect::{ReconnectPolicy, RetryBudget};
use super::state::{ChannelShared, ChannelState};

/// How a single connection ended
enum ConnectionEnd {
    /// `disconnect` or a newer `connect` took over
    Shutdown,
    /// The connection was lost or refused
    Closed { code: Option<u16>, reason: String },
}

/// Drives one connect session: the initial connection and every reconnect
/// until shutdown or until the retry budget runs out.
pub(crate) struct Supervisor {
    epoch: u64,
    session_id: Uuid,
    endpoint: Endpoint,
    credential: String,
    config: ChannelConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<ChannelShared>,
    shutdown: broadcast::Receiver<()>,
    budget: RetryBudget,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        epoch: u64,
        session_id: Uuid,
        endpoint: Endpoint,
        credential: String,
        config: ChannelConfig,
        connector: Arc<dyn Connector>,
        shared: Arc<ChannelShared>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let budget = RetryBudget::new(ReconnectPolicy::from(&config));
        Self {
            epoch,
            session_id,
            endpoint,
            credential,
            config,
            connector,
            shared,
            shutdown,
            budget,
        }
    }

    #[tracing::instrument(
        name = "channel.session",
        skip(self),
        fields(session_id = %self.session_id, endpoint = %self.endpoint)
    )]
    pub(crate) async fn run(mut self) {
        loop {
            if !self.shared.transition(self.epoch, ChannelState::Connecting) {
                break;
            }
            self.emit(LifecycleEvent::Connecting {
                attempt: self.budget.attempt(),
            });
            ConnectionMetrics::record_attempt();

            let connected = tokio::select! {
                _ = self.shutdown.recv() => break,
                result = self.connector.connect(&self.endpoint) => result,
            };

            let (code, reason) = match connected {
                Ok(transport) => {
                    self.budget.reset();
                    match self.run_connection(transport).await {
                        ConnectionEnd::Shutdown => break,
                        ConnectionEnd::Closed { code, reason } => {
                            tracing::info!(code = ?code, reason = %reason, "WebSocket disconnected");
                            (code, reason)
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        attempt = self.budget.attempt(),
                        "Failed to connect WebSocket"
                    );
                    (None, e.to_string())
                }
            };
            ConnectionMetrics::record_closed();

            if !self.shared.is_current(self.epoch) {
                break;
            }

            if let Some(code) = code {
                if self.config.auth_failure_policy == AuthFailurePolicy::Terminal
                    && self.config.is_auth_failure(code)
                {
                    self.emit(LifecycleEvent::Closed {
                        code: Some(code),
                        reason,
                        will_retry: false,
                    });
                    self.exhaust(format!("authentication rejected (close code {})", code));
                    break;
                }
            }

            match self.budget.next_attempt() {
                Some(delay) => {
                    self.shared.transition(self.epoch, ChannelState::Closed);
                    self.emit(LifecycleEvent::Closed {
                        code,
                        reason,
                        will_retry: true,
                    });
                    ConnectionMetrics::record_reconnect_scheduled();
                    tracing::info!(
                        attempt = self.budget.attempt(),
                        max_attempts = self.budget.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "Attempting to reconnect"
                    );

                    tokio::select! {
                        _ = self.shutdown.recv() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => {
                    self.emit(LifecycleEvent::Closed {
                        code,
                        reason,
                        will_retry: false,
                    });
                    self.exhaust(format!(
                        "max reconnection attempts reached ({})",
                        self.budget.max_attempts()
                    ));
                    break;
                }
            }
        }

        tracing::debug!("Realtime session stopped");
    }

    async fn run_connection(&mut self, transport: Transport) -> ConnectionEnd {
        let Transport {
            mut sink,
            mut stream,
        } = transport;

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(self.config.outbound_buffer);
        if !self.shared.attach(self.epoch, outbound_tx) {
            let _ = sink.send(Frame::Close(Some(CloseInfo::normal()))).await;
            return ConnectionEnd::Shutdown;
        }
        ConnectionMetrics::record_opened();
        tracing::info!("WebSocket connected");

        // Fire-and-forget authentication; rejection shows up as a close
        let auth = match ClientMessage::auth(self.credential.as_str()).to_json() {
            Ok(auth) => auth,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize authentication message");
                self.shared.detach(self.epoch);
                return ConnectionEnd::Closed {
                    code: None,
                    reason: e.to_string(),
                };
            }
        };
        if let Err(e) = sink.send(Frame::Text(auth)).await {
            tracing::warn!(error = %e, "Failed to send authentication message");
            self.shared.detach(self.epoch);
            return ConnectionEnd::Closed {
                code: None,
                reason: e.to_string(),
            };
        }
        MessageMetrics::record_sent("auth");
        self.emit(LifecycleEvent::Open);

        let end = loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    let close = sink.send(Frame::Close(Some(CloseInfo::normal())));
                    if tokio::time::timeout(self.config.close_timeout(), close).await.is_err() {
                        tracing::debug!("Timed out sending close frame");
                    }
                    break ConnectionEnd::Shutdown;
                }
                Some(frame) = outbound_rx.recv() => {
                    if let Err(e) = sink.send(frame).await {
                        tracing::warn!(error = %e, "WebSocket send failed");
                        break ConnectionEnd::Closed { code: None, reason: e.to_string() };
                    }
                }
                incoming = stream.next() => match incoming {
                    Some(Ok(Frame::Text(text))) => self.handle_text(&text),
                    Some(Ok(Frame::Binary(data))) => {
                        MessageMetrics::record_malformed();
                        tracing::warn!(bytes = data.len(), "Dropping binary WebSocket message");
                    }
                    Some(Ok(Frame::Close(info))) => {
                        let (code, reason) = match info {
                            Some(info) => (Some(info.code), info.reason),
                            None => (None, "closed by server".to_string()),
                        };
                        break ConnectionEnd::Closed { code, reason };
                    }
                    // tungstenite ends the stream after an error; the close path drives reconnection
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "WebSocket error");
                        break ConnectionEnd::Closed { code: None, reason: e.to_string() };
                    }
                    None => {
                        break ConnectionEnd::Closed { code: None, reason: "connection lost".to_string() };
                    }
                },
            }
        };

        self.shared.detach(self.epoch);
        end
    }

    fn handle_text(&self, text: &str) {
        let message = match InboundMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                MessageMetrics::record_malformed();
                tracing::warn!(error = %e, "Error parsing WebSocket message");
                return;
            }
        };

        if !self.shared.is_current(self.epoch) {
            tracing::debug!(kind = %message.kind(), "Dropping message from stale session");
            return;
        }

        MessageMetrics::record_received();
        self.shared.registry.dispatch(&message);
    }

    fn emit(&self, event: LifecycleEvent) {
        if self.shared.is_current(self.epoch) {
            self.shared.registry.dispatch(&event.into_message());
        }
    }

    fn exhaust(&self, reason: String) {
        if !self.shared.transition(self.epoch, ChannelState::Exhausted) {
            return;
        }
        ConnectionMetrics::record_exhausted();
        tracing::error!(
            attempts = self.budget.attempt(),
            reason = %reason,
            "Realtime channel gave up reconnecting"
        );
        self.emit(LifecycleEvent::Exhausted {
            attempts: self.budget.attempt(),
            reason,
        });
    }
}
