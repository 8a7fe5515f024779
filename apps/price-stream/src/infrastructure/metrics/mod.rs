//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Upstream**: Messages received, parse errors, reconnects, connection state
//! - **Validation**: Rejected observations by source and reason
//! - **Fanout**: Events broadcast and failed client sends
//! - **Fallback**: Poll fetch outcomes and poller activity
//! - **Clients**: Open viewer connections and subscribed symbols
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::application::ports::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Returns `None` (and logs) if a recorder could not be installed. Calling
/// this again after a successful install returns the existing handle.
pub fn init_metrics() -> Option<PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Some(handle.clone());
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            register_metrics();
            let _ = PROMETHEUS_HANDLE.set(handle.clone());
            Some(handle)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install Prometheus recorder");
            None
        }
    }
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "price_stream_upstream_messages_total",
        "Total messages received from the upstream stream"
    );
    describe_counter!(
        "price_stream_upstream_parse_errors_total",
        "Total upstream frames dropped as malformed"
    );
    describe_counter!(
        "price_stream_reconnects_total",
        "Total upstream reconnection attempts"
    );
    describe_gauge!(
        "price_stream_connection_state",
        "Upstream connection state (0=disconnected .. 3=authenticated, 4=backoff)"
    );

    describe_counter!(
        "price_stream_rejections_total",
        "Total price observations rejected by the validator"
    );

    describe_counter!(
        "price_stream_broadcasts_total",
        "Total frames queued to viewer connections"
    );
    describe_counter!(
        "price_stream_send_failures_total",
        "Total viewer connections dropped on send failure"
    );

    describe_counter!(
        "price_stream_poll_fetches_total",
        "Total fallback REST price fetches by outcome"
    );
    describe_gauge!(
        "price_stream_poller_active",
        "Whether the fallback poller is running"
    );

    describe_gauge!("price_stream_clients", "Open viewer connections");
    describe_gauge!("price_stream_subscriptions", "Symbols in the subscription set");
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for upstream message kinds.
#[derive(Debug, Clone, Copy)]
pub enum MessageType {
    /// Trade frame.
    Trade,
    /// Quote frame.
    Quote,
    /// Success, subscription or other control frame.
    Control,
    /// Error frame.
    Error,
    /// Frame with an unrecognised discriminant.
    Unknown,
}

impl MessageType {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Trade => "trade",
            Self::Quote => "quote",
            Self::Control => "control",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

/// Metric labels for fallback fetch outcomes.
#[derive(Debug, Clone, Copy)]
pub enum PollOutcome {
    /// Positive price returned.
    Price,
    /// No price available.
    Empty,
    /// Request failed.
    Failed,
}

impl PollOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Empty => "empty",
            Self::Failed => "failed",
        }
    }
}

/// Record a message received from the upstream stream.
pub fn record_upstream_message(msg_type: MessageType) {
    counter!(
        "price_stream_upstream_messages_total",
        "message_type" => msg_type.as_str()
    )
    .increment(1);
}

/// Record an upstream frame dropped as malformed.
pub fn record_parse_error() {
    counter!("price_stream_upstream_parse_errors_total").increment(1);
}

/// Record an upstream reconnection attempt.
pub fn record_reconnect() {
    counter!("price_stream_reconnects_total").increment(1);
}

/// Update the upstream connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("price_stream_connection_state").set(state.as_gauge());
}

/// Record an observation rejected by the validator.
pub fn record_rejection(source: &'static str, reason: &'static str) {
    counter!(
        "price_stream_rejections_total",
        "source" => source,
        "reason" => reason
    )
    .increment(1);
}

/// Record frames queued to viewers.
pub fn record_broadcast(kind: &'static str, count: u64) {
    counter!(
        "price_stream_broadcasts_total",
        "event" => kind
    )
    .increment(count);
}

/// Record viewer connections dropped on send failure.
pub fn record_send_failures(count: u64) {
    counter!("price_stream_send_failures_total").increment(count);
}

/// Record a fallback fetch.
pub fn record_poll_fetch(outcome: PollOutcome) {
    counter!(
        "price_stream_poll_fetches_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Update the poller activity gauge.
pub fn set_poller_active(active: bool) {
    gauge!("price_stream_poller_active").set(if active { 1.0 } else { 0.0 });
}

/// Update the viewer connection gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_clients(count: usize) {
    gauge!("price_stream_clients").set(count as f64);
}

/// Update the subscription set gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(count: usize) {
    gauge!("price_stream_subscriptions").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
