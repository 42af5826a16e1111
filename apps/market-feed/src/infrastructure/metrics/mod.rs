//! Prometheus Metrics Module
//!
//! Exposes feed metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: inbound frames and decode failures
//! - **Dispatch**: events delivered to subscribers and handler failures
//! - **Connection**: connection state and reconnect attempts
//! - **Order book**: ladder rebuilds by source and suppressed refreshes
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op, so library code and tests never need a
//! recorder installed.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::orderbook::LadderSource;
use crate::domain::streaming::Channel;
use crate::infrastructure::binance::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
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
        "market_feed_frames_received_total",
        "Total text frames received from the upstream feed"
    );
    describe_counter!(
        "market_feed_decode_errors_total",
        "Total frames dropped because they could not be decoded"
    );
    describe_counter!(
        "market_feed_events_dispatched_total",
        "Total events delivered to subscriber handlers"
    );
    describe_counter!(
        "market_feed_handler_failures_total",
        "Total subscriber handler invocations that failed or panicked"
    );

    describe_gauge!(
        "market_feed_connection_state",
        "Upstream connection state (0 disconnected, 1 connecting, 2 connected)"
    );
    describe_counter!(
        "market_feed_reconnects_total",
        "Total scheduled reconnection attempts"
    );

    describe_counter!(
        "market_feed_orderbook_updates_total",
        "Total order book ladder rebuilds"
    );
    describe_counter!(
        "market_feed_orderbook_synthetic_suppressed_total",
        "Synthetic refreshes skipped because live depth was flowing"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a text frame received from the feed.
pub fn record_frame_received() {
    counter!("market_feed_frames_received_total").increment(1);
}

/// Record a frame that failed to decode.
pub fn record_decode_error() {
    counter!("market_feed_decode_errors_total").increment(1);
}

/// Record the outcome of dispatching one event.
pub fn record_dispatch(channel: Channel, delivered: usize, failed: usize) {
    if delivered > 0 {
        counter!(
            "market_feed_events_dispatched_total",
            "channel" => channel.as_str()
        )
        .increment(delivered as u64);
    }
    if failed > 0 {
        counter!(
            "market_feed_handler_failures_total",
            "channel" => channel.as_str()
        )
        .increment(failed as u64);
    }
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    let value = match state {
        ConnectionState::Disconnected => 0.0,
        ConnectionState::Connecting => 1.0,
        ConnectionState::Connected => 2.0,
    };
    gauge!("market_feed_connection_state").set(value);
}

/// Record a scheduled reconnection attempt.
pub fn record_reconnect() {
    counter!("market_feed_reconnects_total").increment(1);
}

/// Record an order book rebuild.
pub fn record_orderbook_update(source: LadderSource) {
    counter!(
        "market_feed_orderbook_updates_total",
        "source" => source.as_str()
    )
    .increment(1);
}

/// Record a skipped synthetic refresh.
pub fn record_synthetic_suppressed() {
    counter!("market_feed_orderbook_synthetic_suppressed_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================
