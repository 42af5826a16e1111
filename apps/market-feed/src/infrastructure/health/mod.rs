//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint reporting feed connection status, subscriber counts, the
//! tracked order book and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (ready while the feed is connected)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::domain::orderbook::OrderBookSnapshot;
use crate::domain::registry::RegistryStats;
use crate::infrastructure::binance::{ConnectionState, FeedConnection, FeedStatus};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream feed status.
    pub feed: FeedInfo,
    /// Subscriber counts per channel.
    pub subscribers: SubscriberInfo,
    /// Tracked order book, when one is running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orderbook: Option<OrderBookInfo>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Connected.
    Healthy,
    /// Opening, or waiting on a reconnect.
    Degraded,
    /// Disconnected with nothing scheduled.
    Unhealthy,
}

/// Upstream feed status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Connection state.
    pub state: String,
    /// Whether the feed is connected.
    pub connected: bool,
    /// Whether a reconnect is scheduled.
    pub reconnect_pending: bool,
    /// Text frames received.
    pub frames_received: u64,
    /// Frames dropped as malformed.
    pub decode_errors: u64,
    /// Reconnects scheduled.
    pub reconnect_attempts: u64,
    /// Last successful open.
    pub last_connected_at: Option<DateTime<Utc>>,
}

/// Subscriber counts.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriberInfo {
    /// Ticker handlers.
    pub ticker: usize,
    /// Order book handlers.
    pub orderbook: usize,
}

/// Top of the tracked order book.
#[derive(Debug, Clone, Serialize)]
pub struct OrderBookInfo {
    /// Tracked symbol.
    pub symbol: String,
    /// Best bid price.
    pub best_bid: Option<Decimal>,
    /// Best ask price.
    pub best_ask: Option<Decimal>,
    /// Best ask minus best bid.
    pub spread: Decimal,
    /// `live` or `synthetic`.
    pub source: Option<&'static str>,
    /// Last rebuild.
    pub updated_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    connection: Arc<FeedConnection>,
    orderbook: Option<watch::Receiver<Arc<OrderBookSnapshot>>>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, connection: Arc<FeedConnection>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            connection,
            orderbook: None,
        }
    }

    /// Report the order book published on `snapshots`.
    #[must_use]
    pub fn with_orderbook(mut self, snapshots: watch::Receiver<Arc<OrderBookSnapshot>>) -> Self {
        self.orderbook = Some(snapshots);
        self
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.connection.state() == ConnectionState::Connected {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let feed = feed_info(
        &state.connection.status(),
        state.connection.reconnect_pending(),
    );
    let subscribers = subscriber_info(&state.connection.registry().stats());
    let orderbook = state
        .orderbook
        .as_ref()
        .map(|rx| orderbook_info(&rx.borrow()));

    HealthResponse {
        status: determine_health_status(&feed),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed,
        subscribers,
        orderbook,
    }
}

fn feed_info(status: &FeedStatus, reconnect_pending: bool) -> FeedInfo {
    FeedInfo {
        state: status.state.to_string(),
        connected: status.state == ConnectionState::Connected,
        reconnect_pending,
        frames_received: status.frames_received,
        decode_errors: status.decode_errors,
        reconnect_attempts: status.reconnect_attempts,
        last_connected_at: status.last_connected_at,
    }
}

const fn subscriber_info(stats: &RegistryStats) -> SubscriberInfo {
    SubscriberInfo {
        ticker: stats.ticker,
        orderbook: stats.orderbook,
    }
}

fn orderbook_info(snapshot: &OrderBookSnapshot) -> OrderBookInfo {
    OrderBookInfo {
        symbol: snapshot.symbol.clone(),
        best_bid: snapshot.best_bid().map(|l| l.price()),
        best_ask: snapshot.best_ask().map(|l| l.price()),
        spread: snapshot.spread,
        source: snapshot.source.map(|s| s.as_str()),
        updated_at: snapshot.updated_at,
    }
}

fn determine_health_status(feed: &FeedInfo) -> HealthStatus {
    if feed.connected {
        HealthStatus::Healthy
    } else if feed.state == ConnectionState::Connecting.as_str() || feed.reconnect_pending {
        HealthStatus::Degraded
    } else {
        HealthStatus::Unhealthy
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
