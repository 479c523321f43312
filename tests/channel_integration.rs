//! Integration tests for the realtime channel
//!
//! The channel is driven through an in-memory connector: every accepted
//! connection hands the test a `MockServer` that sees the frames the client
//! sends and can push frames back.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;

use lifecare_realtime::config::{AuthFailurePolicy, ChannelConfig};
use lifecare_realtime::error::{ChannelError, TransportError};
use lifecare_realtime::websocket::{
    CloseInfo, Endpoint, Frame, Transport, KIND_CLOSED, KIND_CONNECTING, KIND_EXHAUSTED, KIND_OPEN,
};
use lifecare_realtime::session::{AlertSeverity, ConnectionStatus, ALERT_FEED_CAPACITY};
use lifecare_realtime::{
    ChannelState, Connector, InboundMessage, MessageStream, RealtimeChannel, SessionController,
    WILDCARD_KIND,
};

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Mock transport
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Accept,
    Refuse,
}

/// Server side of one accepted connection
struct MockServer {
    from_client: fmpsc::UnboundedReceiver<Frame>,
    to_client: fmpsc::UnboundedSender<Result<Frame, TransportError>>,
}

impl MockServer {
    async fn next_frame(&mut self) -> Option<Frame> {
        tokio::time::timeout(WAIT, self.from_client.next())
            .await
            .expect("Timed out waiting for a client frame")
    }

    fn push(&self, frame: Frame) {
        let _ = self.to_client.unbounded_send(Ok(frame));
    }

    fn push_text(&self, text: &str) {
        self.push(Frame::Text(text.to_string()));
    }
}

struct MockConnector {
    calls: AtomicUsize,
    endpoints: Mutex<Vec<String>>,
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    servers: mpsc::UnboundedSender<MockServer>,
}

impl MockConnector {
    fn new(script: Vec<Outcome>, fallback: Outcome) -> (Arc<Self>, mpsc::UnboundedReceiver<MockServer>) {
        let (servers, servers_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            calls: AtomicUsize::new(0),
            endpoints: Mutex::new(Vec::new()),
            script: Mutex::new(script.into()),
            fallback,
            servers,
        });
        (connector, servers_rx)
    }

    fn accepting() -> (Arc<Self>, mpsc::UnboundedReceiver<MockServer>) {
        Self::new(Vec::new(), Outcome::Accept)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn endpoints(&self) -> Vec<String> {
        self.endpoints.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Transport, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.endpoints.lock().unwrap().push(endpoint.to_string());

        let outcome = self.script.lock().unwrap().pop_front().unwrap_or(self.fallback);
        match outcome {
            Outcome::Refuse => Err(TransportError::Connect("connection refused".into())),
            Outcome::Accept => {
                let (client_tx, from_client) = fmpsc::unbounded::<Frame>();
                let (to_client, client_rx) = fmpsc::unbounded::<Result<Frame, TransportError>>();
                let _ = self.servers.send(MockServer {
                    from_client,
                    to_client,
                });
                let sink = client_tx.sink_map_err(|_| TransportError::Closed);
                Ok(Transport::new(sink, client_rx))
            }
        }
    }
}

fn channel_with(config: ChannelConfig, connector: Arc<MockConnector>) -> RealtimeChannel {
    RealtimeChannel::new(config, connector)
}

async fn next_server(servers: &mut mpsc::UnboundedReceiver<MockServer>) -> MockServer {
    tokio::time::timeout(WAIT, servers.recv())
        .await
        .expect("Timed out waiting for a connection")
        .expect("Connector dropped")
}

async fn next_message(stream: &mut MessageStream, wait: Duration) -> InboundMessage {
    tokio::time::timeout(wait, stream.next())
        .await
        .expect("Timed out waiting for a message")
        .expect("Stream ended")
}

/// Observer forwarding every delivery into a channel
fn forwarding() -> (
    impl Fn(&InboundMessage) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<InboundMessage>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (move |message: &InboundMessage| {
        let _ = tx.send(message.clone());
    }, rx)
}

fn auth_frame(token: &str) -> Frame {
    Frame::Text(format!(r#"{{"type":"auth","token":"{}"}}"#, token))
}

// =============================================================================
// Connection and authentication
// =============================================================================

mod connection_tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_authenticates_first() {
        let (connector, mut servers) = MockConnector::accepting();
        let channel = channel_with(ChannelConfig::default(), connector.clone());
        let mut open = channel.subscribe_stream(KIND_OPEN);

        channel.connect("u1", "t1").unwrap();

        let mut server = next_server(&mut servers).await;
        assert_eq!(server.next_frame().await, Some(auth_frame("t1")));
        assert_eq!(connector.endpoints(), vec!["ws://localhost:8000/ws/u1".to_string()]);

        next_message(&mut open, WAIT).await;
        assert_eq!(channel.state(), ChannelState::Open);

        channel.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_dropped() {
        let (connector, mut servers) = MockConnector::accepting();
        let channel = channel_with(ChannelConfig::default(), connector.clone());

        channel.send(&json!({"type": "subscribe", "channel": "vitals"}));
        assert_eq!(channel.state(), ChannelState::Idle);
        assert_eq!(connector.calls(), 0);

        // Nothing was queued for the next connection
        let mut open = channel.subscribe_stream(KIND_OPEN);
        channel.connect("u1", "t1").unwrap();
        let mut server = next_server(&mut servers).await;
        next_message(&mut open, WAIT).await;

        channel.send(&json!({"type": "subscribe", "channel": "vitals"}));

        assert_eq!(server.next_frame().await, Some(auth_frame("t1")));
        assert_eq!(
            server.next_frame().await,
            Some(Frame::Text(r#"{"channel":"vitals","type":"subscribe"}"#.to_string()))
        );

        channel.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnect_sends_normal_close() {
        let (connector, mut servers) = MockConnector::accepting();
        let channel = channel_with(ChannelConfig::default(), connector);
        let mut open = channel.subscribe_stream(KIND_OPEN);

        channel.connect("u1", "t1").unwrap();
        let mut server = next_server(&mut servers).await;
        next_message(&mut open, WAIT).await;

        channel.disconnect();
        channel.disconnect();

        assert_eq!(server.next_frame().await, Some(auth_frame("t1")));
        assert_eq!(server.next_frame().await, Some(Frame::Close(Some(CloseInfo::normal()))));
        assert_eq!(channel.state(), ChannelState::Idle);
    }

    #[tokio::test]
    async fn test_connect_again_replaces_previous_session() {
        let (connector, mut servers) = MockConnector::accepting();
        let channel = channel_with(ChannelConfig::default(), connector.clone());
        let (observer, mut received) = forwarding();
        let _sub = channel.subscribe("alert", observer);

        channel.connect("u1", "t1").unwrap();
        let mut first = next_server(&mut servers).await;
        assert_eq!(first.next_frame().await, Some(auth_frame("t1")));

        channel.connect("u2", "t2").unwrap();
        let mut second = next_server(&mut servers).await;
        assert_eq!(second.next_frame().await, Some(auth_frame("t2")));
        assert_eq!(first.next_frame().await, Some(Frame::Close(Some(CloseInfo::normal()))));

        first.push_text(r#"{"type":"alert","data":{"id":1}}"#);
        second.push_text(r#"{"type":"alert","data":{"id":2}}"#);

        let message = tokio::time::timeout(WAIT, received.recv()).await.unwrap().unwrap();
        assert_eq!(message.data(), Some(&json!({"id": 2})));
        assert_eq!(channel.identity().as_deref(), Some("u2"));
        assert_eq!(
            connector.endpoints(),
            vec!["ws://localhost:8000/ws/u1".to_string(), "ws://localhost:8000/ws/u2".to_string()]
        );

        channel.shutdown().await;
    }

    #[tokio::test]
    async fn test_identity_is_encoded_into_endpoint() {
        let (connector, mut servers) = MockConnector::accepting();
        let channel = channel_with(ChannelConfig::default(), connector.clone());

        channel.connect("jane doe/1", "t1").unwrap();
        let mut server = next_server(&mut servers).await;
        assert_eq!(server.next_frame().await, Some(auth_frame("t1")));

        assert_eq!(connector.endpoints(), vec!["ws://localhost:8000/ws/jane%20doe%2F1".to_string()]);
        assert_eq!(channel.identity().as_deref(), Some("jane doe/1"));

        channel.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_never_dials() {
        let (connector, _servers) = MockConnector::accepting();
        let config = ChannelConfig {
            outbound_buffer: 0,
            ..Default::default()
        };
        let channel = channel_with(config, connector.clone());

        assert!(matches!(channel.connect("u1", "t1"), Err(ChannelError::Validation(_))));
        tokio::task::yield_now().await;

        assert_eq!(connector.calls(), 0);
        assert_eq!(channel.state(), ChannelState::Idle);
    }
}

// =============================================================================
// Dispatch
// =============================================================================

mod dispatch_tests {
    use super::*;

    #[tokio::test]
    async fn test_alert_reaches_kind_observer() {
        let (connector, mut servers) = MockConnector::accepting();
        let channel = channel_with(ChannelConfig::default(), connector);
        let (observer, mut received) = forwarding();
        let _sub = channel.subscribe("alert", observer);

        channel.connect("u1", "t1").unwrap();
        let server = next_server(&mut servers).await;
        server.push_text(r#"{"kind":"alert","data":{"id":1}}"#);

        let message = tokio::time::timeout(WAIT, received.recv()).await.unwrap().unwrap();
        assert_eq!(message.kind(), "alert");
        assert_eq!(message.body(), &json!({"kind": "alert", "data": {"id": 1}}));

        channel.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsubscribed_observer_is_not_called() {
        let (connector, mut servers) = MockConnector::accepting();
        let channel = channel_with(ChannelConfig::default(), connector);
        let (first, mut first_rx) = forwarding();
        let (second, mut second_rx) = forwarding();
        let first_sub = channel.subscribe("health_update", first);
        let _second_sub = channel.subscribe("health_update", second);

        first_sub.unsubscribe();
        first_sub.unsubscribe();
        assert_eq!(channel.observer_count("health_update"), 1);

        channel.connect("u1", "t1").unwrap();
        let server = next_server(&mut servers).await;
        server.push_text(r#"{"type":"health_update","data":{"id":1}}"#);

        tokio::time::timeout(WAIT, second_rx.recv()).await.unwrap().unwrap();
        assert!(first_rx.try_recv().is_err());

        channel.shutdown().await;
    }

    #[tokio::test]
    async fn test_wildcard_sees_every_application_message() {
        let (connector, mut servers) = MockConnector::accepting();
        let channel = channel_with(ChannelConfig::default(), connector);
        let mut all = channel.subscribe_stream(WILDCARD_KIND);
        let mut alerts = channel.subscribe_stream("alert");

        channel.connect("u1", "t1").unwrap();
        let server = next_server(&mut servers).await;
        server.push_text(r#"{"type":"alert","data":{"id":1}}"#);
        server.push_text(r#"{"type":"health_update","data":{"heart_rate":72.0}}"#);

        // Lifecycle events are not broadcast to the wildcard
        assert_eq!(next_message(&mut all, WAIT).await.kind(), "alert");
        assert_eq!(next_message(&mut all, WAIT).await.kind(), "health_update");
        assert_eq!(next_message(&mut alerts, WAIT).await.kind(), "alert");

        channel.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_payloads_are_dropped() {
        let (connector, mut servers) = MockConnector::accepting();
        let channel = channel_with(ChannelConfig::default(), connector);
        let mut all = channel.subscribe_stream(WILDCARD_KIND);

        channel.connect("u1", "t1").unwrap();
        let server = next_server(&mut servers).await;
        server.push_text("not json");
        server.push_text("[1,2,3]");
        server.push_text(r#"{"data":{"id":1}}"#);
        server.push(Frame::Binary(vec![0xde, 0xad]));
        server.push_text(r#"{"type":"pong"}"#);

        assert_eq!(next_message(&mut all, WAIT).await.kind(), "pong");
        assert_eq!(channel.state(), ChannelState::Open);

        channel.shutdown().await;
    }

    #[tokio::test]
    async fn test_panicking_observer_does_not_block_others() {
        let (connector, mut servers) = MockConnector::accepting();
        let channel = channel_with(ChannelConfig::default(), connector);
        let _panics = channel.subscribe("alert", |_| panic!("observer failure"));
        let (observer, mut received) = forwarding();
        let _sub = channel.subscribe("alert", observer);

        channel.connect("u1", "t1").unwrap();
        let server = next_server(&mut servers).await;
        server.push_text(r#"{"type":"alert","data":{"id":1}}"#);
        server.push_text(r#"{"type":"alert","data":{"id":2}}"#);

        for id in [1, 2] {
            let message = tokio::time::timeout(WAIT, received.recv()).await.unwrap().unwrap();
            assert_eq!(message.data(), Some(&json!({"id": id})));
        }
        assert_eq!(channel.state(), ChannelState::Open);

        channel.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnect_silences_observers() {
        let (connector, mut servers) = MockConnector::accepting();
        let channel = channel_with(ChannelConfig::default(), connector);
        let (observer, mut received) = forwarding();
        let _sub = channel.subscribe("alert", observer);
        let mut open = channel.subscribe_stream(KIND_OPEN);

        channel.connect("u1", "t1").unwrap();
        let server = next_server(&mut servers).await;
        next_message(&mut open, WAIT).await;

        channel.disconnect();
        server.push_text(r#"{"type":"alert","data":{"id":1}}"#);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(received.try_recv().is_err());
        assert_eq!(channel.observer_count("alert"), 0);
        assert_eq!(channel.state(), ChannelState::Idle);
    }

    #[tokio::test]
    async fn test_message_stream_unsubscribes_on_drop() {
        let (connector, _servers) = MockConnector::accepting();
        let channel = channel_with(ChannelConfig::default(), connector);

        let stream = channel.subscribe_stream("alert");
        assert_eq!(stream.kind(), "alert");
        assert_eq!(channel.observer_count("alert"), 1);

        drop(stream);
        assert_eq!(channel.observer_count("alert"), 0);
    }
}

// =============================================================================
// Reconnection
// =============================================================================

mod reconnect_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_five_reconnects() {
        let (connector, _servers) = MockConnector::new(Vec::new(), Outcome::Refuse);
        let channel = channel_with(ChannelConfig::default(), connector.clone());
        let mut closed = channel.subscribe_stream(KIND_CLOSED);
        let mut exhausted = channel.subscribe_stream(KIND_EXHAUSTED);
        let started = tokio::time::Instant::now();

        channel.connect("u1", "t1").unwrap();

        let event = next_message(&mut exhausted, Duration::from_secs(60)).await;
        assert_eq!(event.body()["attempts"], json!(5));
        assert_eq!(connector.calls(), 6);
        assert_eq!(channel.state(), ChannelState::Exhausted);
        assert!(started.elapsed() >= Duration::from_millis(15_000));

        let mut will_retry = Vec::new();
        while let Some(event) = closed.try_recv() {
            will_retry.push(event.body()["will_retry"].as_bool().unwrap());
        }
        assert_eq!(will_retry, vec![true, true, true, true, true, false]);

        // No further attempts once exhausted
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_open_resets_budget() {
        let (connector, mut servers) = MockConnector::new(
            vec![Outcome::Refuse, Outcome::Refuse, Outcome::Accept],
            Outcome::Refuse,
        );
        let channel = channel_with(ChannelConfig::default(), connector.clone());
        let mut open = channel.subscribe_stream(KIND_OPEN);
        let mut exhausted = channel.subscribe_stream(KIND_EXHAUSTED);

        channel.connect("u1", "t1").unwrap();

        let server = next_server(&mut servers).await;
        next_message(&mut open, Duration::from_secs(60)).await;
        assert_eq!(connector.calls(), 3);

        // Server goes away
        drop(server);

        next_message(&mut exhausted, Duration::from_secs(60)).await;
        assert_eq!(connector.calls(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_waits_fixed_delay() {
        let (connector, mut servers) = MockConnector::accepting();
        let channel = channel_with(ChannelConfig::default(), connector.clone());
        let mut connecting = channel.subscribe_stream(KIND_CONNECTING);

        channel.connect("u1", "t1").unwrap();
        assert_eq!(next_message(&mut connecting, WAIT).await.body()["attempt"], json!(0));
        let server = next_server(&mut servers).await;

        let lost_at = tokio::time::Instant::now();
        server.push(Frame::Close(Some(CloseInfo {
            code: 1006,
            reason: "abnormal".into(),
        })));

        let event = next_message(&mut connecting, Duration::from_secs(10)).await;
        assert_eq!(event.body()["attempt"], json!(1));
        assert!(lost_at.elapsed() >= Duration::from_millis(3000));

        let mut server = next_server(&mut servers).await;
        assert_eq!(server.next_frame().await, Some(auth_frame("t1")));
        assert_eq!(connector.calls(), 2);

        channel.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_during_reconnect_wait() {
        let (connector, mut servers) = MockConnector::accepting();
        let channel = channel_with(ChannelConfig::default(), connector.clone());
        let (observer, mut received) = forwarding();
        let sub = channel.subscribe("health_update", observer);
        let mut still_subscribed = channel.subscribe_stream("health_update");
        let mut closed = channel.subscribe_stream(KIND_CLOSED);

        channel.connect("u1", "t1").unwrap();
        let server = next_server(&mut servers).await;
        server.push(Frame::Close(Some(CloseInfo {
            code: 1006,
            reason: "abnormal".into(),
        })));

        let event = next_message(&mut closed, WAIT).await;
        assert_eq!(event.body()["will_retry"], json!(true));
        assert_eq!(channel.state(), ChannelState::Closed);
        sub.unsubscribe();

        let server = next_server(&mut servers).await;
        assert_eq!(connector.calls(), 2);
        server.push_text(r#"{"type":"health_update","data":{"heart_rate":72}}"#);

        let message = next_message(&mut still_subscribed, WAIT).await;
        assert_eq!(message.data(), Some(&json!({"heart_rate": 72})));
        assert!(received.try_recv().is_err());
        assert_eq!(channel.observer_count("health_update"), 1);

        channel.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_reconnect() {
        let (connector, _servers) = MockConnector::new(Vec::new(), Outcome::Refuse);
        let channel = channel_with(ChannelConfig::default(), connector.clone());
        let mut closed = channel.subscribe_stream(KIND_CLOSED);

        channel.connect("u1", "t1").unwrap();
        next_message(&mut closed, WAIT).await;
        assert_eq!(connector.calls(), 1);

        channel.disconnect();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(connector.calls(), 1);
        assert_eq!(channel.state(), ChannelState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_close_retries_by_default() {
        let (connector, mut servers) = MockConnector::accepting();
        let channel = channel_with(ChannelConfig::default(), connector.clone());

        channel.connect("u1", "bad").unwrap();
        let server = next_server(&mut servers).await;
        server.push(Frame::Close(Some(CloseInfo {
            code: 4001,
            reason: "invalid token".into(),
        })));

        let _retry = next_server(&mut servers).await;
        assert_eq!(connector.calls(), 2);

        channel.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_auth_policy_stops_reconnecting() {
        let (connector, mut servers) = MockConnector::accepting();
        let config = ChannelConfig {
            auth_failure_policy: AuthFailurePolicy::Terminal,
            ..Default::default()
        };
        let channel = channel_with(config, connector.clone());
        let mut exhausted = channel.subscribe_stream(KIND_EXHAUSTED);

        channel.connect("u1", "bad").unwrap();
        let server = next_server(&mut servers).await;
        server.push(Frame::Close(Some(CloseInfo {
            code: 4001,
            reason: "invalid token".into(),
        })));

        let event = next_message(&mut exhausted, WAIT).await;
        assert!(event.body()["reason"].as_str().unwrap().contains("4001"));
        assert_eq!(channel.state(), ChannelState::Exhausted);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.calls(), 1);
    }
}

// =============================================================================
// Heartbeat
// =============================================================================

mod heartbeat_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_pings_until_disconnect() {
        let (connector, mut servers) = MockConnector::accepting();
        let channel = channel_with(ChannelConfig::default(), connector);

        channel.connect("u1", "t1").unwrap();
        channel.start_heartbeat().unwrap();
        let mut server = next_server(&mut servers).await;

        assert_eq!(server.next_frame().await, Some(auth_frame("t1")));
        let ping = tokio::time::timeout(Duration::from_secs(31), server.from_client.next())
            .await
            .expect("Heartbeat should fire");
        assert_eq!(ping, Some(Frame::Text(r#"{"type":"ping"}"#.to_string())));

        channel.disconnect();
        assert!(!channel.is_heartbeat_running());

        assert_eq!(server.next_frame().await, Some(Frame::Close(Some(CloseInfo::normal()))));
        // The connection is gone; no further pings arrive
        let rest = tokio::time::timeout(Duration::from_secs(120), server.from_client.next())
            .await
            .expect("Client sink should be dropped");
        assert_eq!(rest, None);
    }
}

// =============================================================================
// Session controller
// =============================================================================

mod session_tests {
    use super::*;

    fn session_with(connector: Arc<MockConnector>) -> SessionController {
        SessionController::new(Arc::new(channel_with(ChannelConfig::default(), connector)))
    }

    #[tokio::test]
    async fn test_alert_feed_and_unread_counter() {
        let (connector, mut servers) = MockConnector::accepting();
        let session = session_with(connector);

        session.start("u1", "t1").unwrap();
        let mut alerts = session.channel().subscribe_stream("alert");
        let server = next_server(&mut servers).await;

        for id in 1..=12 {
            server.push_text(
                &json!({
                    "type": "alert",
                    "data": {
                        "id": id,
                        "alert_type": "anomaly",
                        "message": "Heart rate above threshold",
                        "severity": "high",
                        "is_read": false,
                        "created_at": "2024-01-01T00:00:00"
                    }
                })
                .to_string(),
            );
        }
        for _ in 0..12 {
            next_message(&mut alerts, WAIT).await;
        }

        let feed = session.recent_alerts();
        assert_eq!(feed.len(), ALERT_FEED_CAPACITY);
        assert_eq!(feed[0].id, Some(12));
        assert_eq!(feed[9].id, Some(3));
        assert_eq!(feed[0].severity, Some(AlertSeverity::High));
        assert_eq!(session.unread_count(), 12);
        assert_eq!(session.connection_status(), ConnectionStatus::Connected);

        session.mark_all_read();
        assert_eq!(session.unread_count(), 0);
        assert!(session.recent_alerts().iter().all(|alert| alert.is_read));

        session.channel().shutdown().await;
    }

    #[tokio::test]
    async fn test_latest_vitals_are_kept() {
        let (connector, mut servers) = MockConnector::accepting();
        let session = session_with(connector);

        session.start("u1", "t1").unwrap();
        let mut updates = session.channel().subscribe_stream("health_update");
        let server = next_server(&mut servers).await;

        server.push_text(r#"{"type":"health_update","data":{"heart_rate":72.0,"blood_oxygen":98.0}}"#);
        server.push_text(r#"{"type":"health_update","data":{"heart_rate":75.0,"blood_oxygen":97.5}}"#);
        next_message(&mut updates, WAIT).await;
        next_message(&mut updates, WAIT).await;

        let vitals = session.latest_vitals().unwrap();
        assert_eq!(vitals.heart_rate, Some(75.0));
        assert_eq!(vitals.blood_oxygen, Some(97.5));

        session.channel().shutdown().await;
    }

    #[tokio::test]
    async fn test_restart_with_same_identity_is_noop() {
        let (connector, mut servers) = MockConnector::accepting();
        let session = session_with(connector.clone());

        session.start("u1", "t1").unwrap();
        let _server = next_server(&mut servers).await;
        session.start("u1", "t1").unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(connector.calls(), 1);
        assert!(session.is_running());

        session.stop();
    }

    #[tokio::test]
    async fn test_new_identity_tears_down_previous_session() {
        let (connector, mut servers) = MockConnector::accepting();
        let session = session_with(connector.clone());

        session.start("u1", "t1").unwrap();
        let mut first = next_server(&mut servers).await;
        assert_eq!(first.next_frame().await, Some(auth_frame("t1")));

        session.start("u2", "t2").unwrap();
        let mut second = next_server(&mut servers).await;

        assert_eq!(first.next_frame().await, Some(Frame::Close(Some(CloseInfo::normal()))));
        assert_eq!(second.next_frame().await, Some(auth_frame("t2")));
        assert_eq!(session.channel().identity().as_deref(), Some("u2"));

        session.stop();
        assert!(!session.is_running());
        assert_eq!(session.connection_status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_start_rejects_empty_token() {
        let (connector, _servers) = MockConnector::accepting();
        let session = session_with(connector.clone());

        assert!(session.start("u1", "").is_err());
        assert!(!session.is_running());
        assert_eq!(session.channel().observer_count("alert"), 0);
        assert_eq!(connector.calls(), 0);
    }
}
