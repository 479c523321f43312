//! Signed-in user session on top of the realtime channel.
//!
//! Keeps the small amount of state the app shell shows: the ten most recent
//! alerts with an unread badge, the latest vital readings and the connection
//! status.

mod models;

pub use models::{AlertNotice, AlertSeverity, ConnectionStatus, VitalsUpdate};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::channel::RealtimeChannel;
use crate::error::Result;
use crate::registry::Subscription;
use crate::websocket::{
    InboundMessage, KIND_CLOSED, KIND_CONNECTING, KIND_EXHAUSTED, KIND_OPEN,
};

/// Maximum number of alerts kept in the feed
pub const ALERT_FEED_CAPACITY: usize = 10;

pub const KIND_ALERT: &str = "alert";
pub const KIND_HEALTH_UPDATE: &str = "health_update";

#[derive(Debug, Default)]
struct SessionState {
    alerts: VecDeque<AlertNotice>,
    unread: usize,
    vitals: Option<VitalsUpdate>,
    status: ConnectionStatus,
}

impl SessionState {
    fn push_alert(&mut self, alert: AlertNotice) {
        self.alerts.push_front(alert);
        self.alerts.truncate(ALERT_FEED_CAPACITY);
        self.unread += 1;
    }
}

struct ActiveSession {
    identity: String,
    token: String,
    subscriptions: Vec<Subscription>,
}

pub struct SessionController {
    channel: Arc<RealtimeChannel>,
    state: Arc<Mutex<SessionState>>,
    active: Mutex<Option<ActiveSession>>,
}

impl SessionController {
    pub fn new(channel: Arc<RealtimeChannel>) -> Self {
        Self {
            channel,
            state: Arc::new(Mutex::new(SessionState::default())),
            active: Mutex::new(None),
        }
    }

    pub fn channel(&self) -> &Arc<RealtimeChannel> {
        &self.channel
    }

    /// Open the realtime session for a signed-in user.
    ///
    /// A no-op for the identity and token already running; any other pair
    /// tears the running session down first and starts from an empty feed.
    pub fn start(&self, identity: &str, token: &str) -> Result<()> {
        {
            let active = lock(&self.active);
            if let Some(active) = active.as_ref() {
                if active.identity == identity && active.token == token {
                    tracing::debug!(identity = %identity, "Session already running");
                    return Ok(());
                }
            }
        }

        self.stop();
        *lock(&self.state) = SessionState::default();

        let subscriptions = self.subscribe_all();
        if let Err(e) = self.channel.connect(identity, token) {
            subscriptions.iter().for_each(Subscription::unsubscribe);
            return Err(e);
        }
        if let Err(e) = self.channel.start_heartbeat() {
            subscriptions.iter().for_each(Subscription::unsubscribe);
            self.channel.disconnect();
            return Err(e);
        }

        tracing::info!(identity = %identity, "Session started");
        *lock(&self.active) = Some(ActiveSession {
            identity: identity.to_string(),
            token: token.to_string(),
            subscriptions,
        });
        Ok(())
    }

    /// Remove the session observers and disconnect. Alerts received so far
    /// stay readable.
    pub fn stop(&self) {
        let Some(active) = lock(&self.active).take() else {
            return;
        };
        active
            .subscriptions
            .iter()
            .for_each(Subscription::unsubscribe);
        self.channel.disconnect();
        lock(&self.state).status = ConnectionStatus::Disconnected;
        tracing::info!(identity = %active.identity, "Session stopped");
    }

    pub fn is_running(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// Newest first
    pub fn recent_alerts(&self) -> Vec<AlertNotice> {
        lock(&self.state).alerts.iter().cloned().collect()
    }

    pub fn unread_count(&self) -> usize {
        lock(&self.state).unread
    }

    pub fn mark_all_read(&self) {
        let mut state = lock(&self.state);
        state.unread = 0;
        state.alerts.iter_mut().for_each(|alert| alert.is_read = true);
    }

    pub fn latest_vitals(&self) -> Option<VitalsUpdate> {
        lock(&self.state).vitals.clone()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        lock(&self.state).status
    }

    fn subscribe_all(&self) -> Vec<Subscription> {
        let mut subscriptions = Vec::with_capacity(6);

        let state = self.state.clone();
        subscriptions.push(self.channel.subscribe(KIND_ALERT, move |message| {
            match message.decode_data::<AlertNotice>() {
                Ok(alert) => {
                    tracing::info!(alert_id = ?alert.id, severity = ?alert.severity, "Alert received");
                    lock(&state).push_alert(alert);
                }
                Err(e) => tracing::warn!(error = %e, "Ignoring alert without a valid record"),
            }
        }));

        let state = self.state.clone();
        subscriptions.push(self.channel.subscribe(KIND_HEALTH_UPDATE, move |message| {
            match message.decode_data::<VitalsUpdate>() {
                Ok(vitals) => {
                    tracing::debug!(heart_rate = ?vitals.heart_rate, "Health update received");
                    lock(&state).vitals = Some(vitals);
                }
                Err(e) => tracing::warn!(error = %e, "Ignoring malformed health update"),
            }
        }));

        for kind in [KIND_CONNECTING, KIND_OPEN, KIND_CLOSED, KIND_EXHAUSTED] {
            let state = self.state.clone();
            subscriptions.push(self.channel.subscribe(kind, move |message| {
                lock(&state).status = status_for(message);
            }));
        }

        subscriptions
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop();
    }
}

fn status_for(event: &InboundMessage) -> ConnectionStatus {
    match event.kind() {
        KIND_CONNECTING => ConnectionStatus::Connecting,
        KIND_OPEN => ConnectionStatus::Connected,
        KIND_CLOSED => {
            let will_retry = event
                .body()
                .get("will_retry")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false);
            if will_retry {
                ConnectionStatus::Reconnecting
            } else {
                ConnectionStatus::Offline
            }
        }
        KIND_EXHAUSTED => ConnectionStatus::Offline,
        _ => ConnectionStatus::Disconnected,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
