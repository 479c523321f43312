//! Prometheus metrics for the realtime channel.
//!
//! This module provides metrics for monitoring the client side of the
//! notification channel:
//! - Connection metrics (attempts, opens, closes, reconnects, exhausted budgets)
//! - Message metrics (received, malformed, sent, dropped sends)
//! - Observer metrics (registered observers, observer failures)

mod helpers;

pub use helpers::{encode_metrics, ConnectionMetrics, MessageMetrics, ObserverMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter,
    IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "lifecare_realtime";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Transport connection attempts, initial and reconnects
    pub static ref CONNECTION_ATTEMPTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connection_attempts_total", METRIC_PREFIX),
        "Total transport connection attempts"
    ).unwrap();

    /// Connections that completed the transport handshake
    pub static ref CONNECTIONS_OPENED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total connections opened"
    ).unwrap();

    /// Connections that ended without an explicit disconnect
    pub static ref CONNECTIONS_CLOSED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_closed_total", METRIC_PREFIX),
        "Total unexpected connection closes and failed attempts"
    ).unwrap();

    /// Reconnect attempts scheduled after a close
    pub static ref RECONNECTS_SCHEDULED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_reconnects_scheduled_total", METRIC_PREFIX),
        "Total reconnect attempts scheduled"
    ).unwrap();

    /// Sessions that stopped reconnecting
    pub static ref RECONNECTS_EXHAUSTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_reconnects_exhausted_total", METRIC_PREFIX),
        "Total sessions that gave up reconnecting"
    ).unwrap();

    // ============================================================================
    // Message Metrics
    // ============================================================================

    /// Inbound messages parsed and dispatched
    pub static ref MESSAGES_RECEIVED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_received_total", METRIC_PREFIX),
        "Total inbound messages dispatched to observers"
    ).unwrap();

    /// Inbound payloads dropped because they could not be parsed
    pub static ref MESSAGES_MALFORMED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_malformed_total", METRIC_PREFIX),
        "Total inbound payloads dropped as malformed"
    ).unwrap();

    /// Outbound messages handed to an open connection
    pub static ref MESSAGES_SENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_sent_total", METRIC_PREFIX),
        "Total outbound messages queued on an open connection",
        &["type"]
    ).unwrap();

    /// Outbound messages dropped, by reason
    pub static ref SENDS_DROPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_sends_dropped_total", METRIC_PREFIX),
        "Total outbound messages dropped",
        &["reason"]
    ).unwrap();

    // ============================================================================
    // Observer Metrics
    // ============================================================================

    /// Currently registered observers across all kinds
    pub static ref OBSERVERS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_observers_active", METRIC_PREFIX),
        "Number of registered observers"
    ).unwrap();

    /// Observer invocations that panicked
    pub static ref OBSERVER_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_observer_failures_total", METRIC_PREFIX),
        "Total observer invocations that panicked"
    ).unwrap();
}
