//! The realtime channel: one live connection per user session.
//!
//! `RealtimeChannel` owns a connection supervisor task (connect, authenticate,
//! reconnect with a fixed delay and a bounded run of failures), an optional
//! heartbeat task and the observer registry. All operations return
//! immediately; network work happens on the spawned tasks.

mod reconnect;
mod state;
mod supervisor;

pub use reconnect::{ReconnectPolicy, RetryBudget};
pub use state::ChannelState;

pub(crate) use state::ChannelShared;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};
use crate::metrics::MessageMetrics;
use crate::registry::{MessageStream, Observer, Subscription};
use crate::tasks::HeartbeatHandle;
use crate::websocket::{Connector, Endpoint, InboundMessage, WebSocketConnector};

use supervisor::Supervisor;

/// A running connect session
struct SessionTask {
    id: Uuid,
    identity: String,
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct RealtimeChannel {
    config: ChannelConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<ChannelShared>,
    session: Mutex<Option<SessionTask>>,
    heartbeat: Mutex<Option<HeartbeatHandle>>,
}

impl RealtimeChannel {
    /// Create a channel using `connector` to open transports
    pub fn new(config: ChannelConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            shared: Arc::new(ChannelShared::new()),
            session: Mutex::new(None),
            heartbeat: Mutex::new(None),
        }
    }

    /// Create a channel backed by the `tokio-tungstenite` WebSocket client
    pub fn websocket(config: ChannelConfig) -> Self {
        Self::new(config, Arc::new(WebSocketConnector::new()))
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    /// Identity of the running session, if any
    pub fn identity(&self) -> Option<String> {
        lock(&self.session).as_ref().map(|session| session.identity.clone())
    }

    /// Start a session for `identity`, authenticating with `credential`.
    ///
    /// Replaces any running session; its pending reconnect (if any) is
    /// cancelled. Existing subscriptions are kept. Fails without touching the
    /// running session when the configuration is invalid or when called
    /// outside a tokio runtime.
    pub fn connect(&self, identity: &str, credential: &str) -> Result<()> {
        if credential.trim().is_empty() {
            tracing::error!(identity = %identity, "Refusing to connect without a credential");
            return Err(ChannelError::InvalidCredential(
                "credential must not be empty".to_string(),
            ));
        }

        let endpoint = Endpoint::from_template(&self.config.endpoint_template, identity)
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to connect WebSocket");
                e
            })?;
        self.config.validate().map_err(|e| {
            tracing::error!(error = %e, "Refusing to connect with invalid channel configuration");
            e
        })?;
        let runtime = current_runtime()?;

        if let Some(previous) = lock(&self.session).take() {
            tracing::info!(
                session_id = %previous.id,
                identity = %previous.identity,
                "Replacing realtime session"
            );
            let _ = previous.shutdown.send(());
        }

        let epoch = self.shared.begin_session();
        let session_id = Uuid::new_v4();
        let (shutdown, shutdown_rx) = broadcast::channel(1);

        let supervisor = Supervisor::new(
            epoch,
            session_id,
            endpoint,
            credential.to_string(),
            self.config.clone(),
            self.connector.clone(),
            self.shared.clone(),
            shutdown_rx,
        );
        let handle = runtime.spawn(supervisor.run());

        tracing::info!(session_id = %session_id, identity = %identity, "Realtime session started");

        *lock(&self.session) = Some(SessionTask {
            id: session_id,
            identity: identity.to_string(),
            shutdown,
            handle,
        });

        Ok(())
    }

    /// Close the connection, cancel any pending reconnect and the heartbeat,
    /// and drop every subscription. Safe to call repeatedly.
    pub fn disconnect(&self) {
        if let Some(session) = self.stop() {
            tracing::info!(session_id = %session.id, "WebSocket disconnected");
        }
    }

    /// `disconnect`, then wait for the session task to deliver its close frame
    pub async fn shutdown(&self) {
        if let Some(session) = self.stop() {
            if let Err(e) = session.handle.await {
                tracing::warn!(error = %e, "Realtime session task failed");
            }
            tracing::info!(session_id = %session.id, "Realtime session shut down");
        }
    }

    fn stop(&self) -> Option<SessionTask> {
        let session = lock(&self.session).take();
        self.shared.end_session();
        if let Some(session) = session.as_ref() {
            let _ = session.shutdown.send(());
        }
        self.stop_heartbeat();
        self.shared.registry.clear();
        session
    }

    /// Register `observer` for messages of `kind` (or [`WILDCARD_KIND`](crate::registry::WILDCARD_KIND))
    pub fn subscribe<F>(&self, kind: &str, observer: F) -> Subscription
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.shared.registry.subscribe(kind, Arc::new(observer))
    }

    /// Register a shared observer; subscribing the same `Arc` twice under one
    /// kind registers it twice, and either handle removes both
    pub fn subscribe_observer(&self, kind: &str, observer: Arc<Observer>) -> Subscription {
        self.shared.registry.subscribe(kind, observer)
    }

    /// Messages of `kind` as a stream
    pub fn subscribe_stream(&self, kind: &str) -> MessageStream {
        MessageStream::subscribe(&self.shared.registry, kind)
    }

    pub fn observer_count(&self, kind: &str) -> usize {
        self.shared.registry.observer_count(kind)
    }

    /// Send `message` if the connection is open; otherwise drop it with a
    /// warning. Never queues, never fails.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) {
        match serde_json::to_value(message) {
            Ok(value) => self.shared.send_value(&value),
            Err(e) => {
                MessageMetrics::record_dropped_serialize();
                tracing::warn!(error = %e, "Failed to serialize outbound message");
            }
        }
    }

    /// Start the keep-alive timer, replacing any previous one. It runs until
    /// `disconnect`. Fails for a zero interval or outside a tokio runtime.
    pub fn start_heartbeat(&self) -> Result<()> {
        let interval = self.config.heartbeat_interval();
        if interval.is_zero() {
            return Err(ChannelError::Validation(
                "heartbeat_interval_ms must be greater than zero".to_string(),
            ));
        }
        let runtime = current_runtime()?;

        let heartbeat = HeartbeatHandle::spawn(interval, self.shared.clone(), &runtime);
        if let Some(previous) = lock(&self.heartbeat).replace(heartbeat) {
            previous.stop();
        }
        Ok(())
    }

    pub fn is_heartbeat_running(&self) -> bool {
        lock(&self.heartbeat)
            .as_ref()
            .map(HeartbeatHandle::is_running)
            .unwrap_or(false)
    }

    fn stop_heartbeat(&self) {
        if let Some(heartbeat) = lock(&self.heartbeat).take() {
            heartbeat.stop();
        }
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("state", &self.state())
            .field("identity", &self.identity())
            .finish()
    }
}

fn current_runtime() -> Result<Handle> {
    Handle::try_current().map_err(|e| ChannelError::Runtime(e.to_string()))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
