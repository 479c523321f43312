use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use crate::channel::ChannelShared;

/// Background task sending `{"type":"ping"}` keep-alives through the channel.
///
/// Ticks that land while the channel is not open are dropped by the normal
/// send path. The task stops on the shutdown signal or when its sender is
/// dropped.
pub(crate) struct HeartbeatTask {
    interval: Duration,
    shared: Arc<ChannelShared>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub(crate) fn new(
        interval: Duration,
        shared: Arc<ChannelShared>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            interval,
            shared,
            shutdown,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut heartbeat_timer = tokio::time::interval(self.interval);

        // Skip immediate first tick
        heartbeat_timer.tick().await;

        tracing::info!(
            heartbeat_interval_ms = self.interval.as_millis() as u64,
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    break;
                }
                _ = heartbeat_timer.tick() => {
                    tracing::debug!(state = %self.shared.state(), "Sending heartbeat");
                    self.shared.send_value(&json!({"type": "ping"}));
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }
}

/// Owned handle to a running heartbeat
pub(crate) struct HeartbeatHandle {
    shutdown: broadcast::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

impl HeartbeatHandle {
    pub(crate) fn spawn(interval: Duration, shared: Arc<ChannelShared>, runtime: &Handle) -> Self {
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let task = HeartbeatTask::new(interval, shared, shutdown_rx);
        let handle = runtime.spawn(task.run());
        Self { shutdown, handle }
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub(crate) fn stop(self) {
        let _ = self.shutdown.send(());
        self.handle.abort();
    }
}
