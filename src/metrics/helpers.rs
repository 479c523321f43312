//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    CONNECTIONS_CLOSED_TOTAL, CONNECTIONS_OPENED_TOTAL, CONNECTION_ATTEMPTS_TOTAL,
    MESSAGES_MALFORMED_TOTAL, MESSAGES_RECEIVED_TOTAL, MESSAGES_SENT_TOTAL,
    OBSERVERS_ACTIVE, OBSERVER_FAILURES_TOTAL, RECONNECTS_EXHAUSTED_TOTAL,
    RECONNECTS_SCHEDULED_TOTAL, SENDS_DROPPED_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording connection lifecycle metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_attempt() {
        CONNECTION_ATTEMPTS_TOTAL.inc();
    }

    pub fn record_opened() {
        CONNECTIONS_OPENED_TOTAL.inc();
    }

    pub fn record_closed() {
        CONNECTIONS_CLOSED_TOTAL.inc();
    }

    pub fn record_reconnect_scheduled() {
        RECONNECTS_SCHEDULED_TOTAL.inc();
    }

    pub fn record_exhausted() {
        RECONNECTS_EXHAUSTED_TOTAL.inc();
    }
}

/// Helper struct for recording message metrics
pub struct MessageMetrics;

impl MessageMetrics {
    pub fn record_received() {
        MESSAGES_RECEIVED_TOTAL.inc();
    }

    pub fn record_malformed() {
        MESSAGES_MALFORMED_TOTAL.inc();
    }

    /// Record a message queued on an open connection
    pub fn record_sent(message_type: &str) {
        MESSAGES_SENT_TOTAL.with_label_values(&[message_type]).inc();
    }

    /// Record a send dropped because no connection was open
    pub fn record_dropped_not_open() {
        SENDS_DROPPED_TOTAL.with_label_values(&["not_open"]).inc();
    }

    /// Record a send dropped because the outbound buffer was full
    pub fn record_dropped_buffer_full() {
        SENDS_DROPPED_TOTAL.with_label_values(&["buffer_full"]).inc();
    }

    /// Record a send dropped because the message could not be serialized
    pub fn record_dropped_serialize() {
        SENDS_DROPPED_TOTAL.with_label_values(&["serialize"]).inc();
    }
}

/// Helper struct for recording observer metrics
pub struct ObserverMetrics;

impl ObserverMetrics {
    pub fn record_registered() {
        OBSERVERS_ACTIVE.inc();
    }

    pub fn record_removed(count: usize) {
        OBSERVERS_ACTIVE.sub(count as i64);
    }

    pub fn record_failure() {
        OBSERVER_FAILURES_TOTAL.inc();
    }
}
