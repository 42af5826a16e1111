#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Market Feed - Real-time Crypto Market Data Ingestion
//!
//! Maintains one multiplexed WebSocket connection to the Binance public
//! market streams, fans decoded events out to in-process subscribers and
//! reconstructs a ranked order-book ladder for a tracked symbol.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types and logic with no I/O
//!   - `streaming`: ticker and depth events, channels
//!   - `registry`: channel → handler fan-out with failure isolation
//!   - `orderbook`: ladder reconstruction and synthetic generator
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: the upstream transport interface
//!   - `services`: single-writer order book task
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `binance`: codec, stream URL, reconnect policy, connection, transport
//!   - `config`: environment configuration
//!   - `health`, `metrics`, `telemetry`: operational surface
//!
//! # Data Flow
//!
//! ```text
//!                   ┌────────────────┐   ticker    ┌──────────────┐
//! Binance WS ──────►│ FeedConnection │────────────►│   handlers   │
//!  (N streams)      │  decode by `e` │  orderbook  ├──────────────┤
//!                   └───────┬────────┘────────────►│ OrderBook    │──► snapshots
//!                           │ ChannelRegistry      │ Service task │
//!                           ▼                      └──────────────┘
//!                  reconnect timer (5 s)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::orderbook::{
    ApplyOutcome, LadderSource, OrderBookReconstructor, OrderBookSnapshot, PriceLevel,
};
pub use domain::registry::{
    ChannelRegistry, DispatchReport, EventHandler, HandlerError, RegistryStats, SharedHandler,
    handler_fn,
};
pub use domain::streaming::{Channel, DepthUpdate, Level, StreamEvent, TickerUpdate};

// Application
pub use application::ports::{FeedTransport, Frame, FrameStream, TransportError};
pub use application::services::{OrderBookHandle, OrderBookService, OrderBookServiceConfig};

// Binance adapter
pub use infrastructure::binance::{
    ConnectionState, FeedConnection, FeedConnectionConfig, FeedStatus, TungsteniteTransport,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, FeedConfig};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
