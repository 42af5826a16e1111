//! Market Feed Binary
//!
//! Connects to the Binance market streams, logs ticker events and keeps the
//! tracked symbol's order book current.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-feed
//! ```
//!
//! # Environment Variables
//!
//! ## Feed
//! - `FEED_BASE_URL`: stream endpoint (default: wss://stream.binance.com:9443/ws)
//! - `FEED_TICKER_SYMBOLS`: comma-separated ticker symbols (default: 8 USDT pairs)
//! - `FEED_DEPTH_SYMBOLS`: comma-separated depth symbols (default: btcusdt,ethusdt)
//! - `FEED_DEPTH_LEVELS`: 5 | 10 | 20 (default: 20)
//! - `FEED_DEPTH_SPEED_MS`: 100 | 1000 (default: 100)
//! - `FEED_RECONNECT_DELAY_MS`: reconnect delay (default: 5000)
//! - `FEED_RECONNECT_DELAY_MAX_SECS`: delay ceiling (default: 5)
//! - `FEED_RECONNECT_MULTIPLIER`: delay growth (default: 1.0)
//! - `FEED_RECONNECT_JITTER`: jitter fraction (default: 0.0)
//! - `FEED_MAX_RECONNECT_ATTEMPTS`: 0 = unlimited (default: 0)
//! - `FEED_IDLE_TIMEOUT_SECS`: idle watchdog, 0 = off (default: 60)
//!
//! ## Order book
//! - `ORDERBOOK_SYMBOL`: tracked symbol (default: BTCUSDT)
//! - `ORDERBOOK_DEPTH`: levels per side (default: 15)
//! - `ORDERBOOK_REFRESH_MS`: synthetic refresh period (default: 2000)
//! - `ORDERBOOK_BASE_PRICE`: initial anchor (default: 67234.56)
//! - `ORDERBOOK_SUPPRESS_SYNTHETIC`: skip refreshes while live (default: true)
//!
//! ## Operations
//! - `MARKET_FEED_HEALTH_PORT`: health and metrics port (default: 8083)
//! - `OTEL_ENABLED`: export spans over OTLP (default: false)
//! - `RUST_LOG`: log filter (default: market_feed=info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_feed::domain::registry::{ChannelRegistry, handler_fn};
use market_feed::domain::streaming::{Channel, StreamEvent};
use market_feed::infrastructure::health::{HealthServer, HealthServerState};
use market_feed::infrastructure::telemetry;
use market_feed::{
    FeedConfig, FeedConnection, FeedConnectionConfig, OrderBookService, OrderBookServiceConfig,
    TungsteniteTransport, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("failed to install rustls crypto provider");
    }

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting market feed");

    let _metrics_handle = init_metrics().context("failed to install Prometheus recorder")?;

    let config = FeedConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let registry = Arc::new(ChannelRegistry::new());

    // Stand-in for the presentation layer
    let ticker_logger = handler_fn(|event| {
        if let StreamEvent::Ticker(t) = event {
            tracing::info!(
                symbol = %t.symbol,
                price = %t.last_price,
                change = %t.price_change,
                change_pct = %t.change_percent,
                volume = %t.volume,
                "Ticker"
            );
        }
        Ok(())
    });
    registry.subscribe(Channel::Ticker, &ticker_logger);

    let orderbook = OrderBookService::spawn(
        Arc::clone(&registry),
        OrderBookServiceConfig::from(&config.orderbook),
    );
    let mut snapshots = orderbook.subscribe();
    let snapshot_shutdown = shutdown_token.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = snapshot_shutdown.cancelled() => break,
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let book = Arc::clone(&snapshots.borrow_and_update());
                    tracing::debug!(
                        symbol = %book.symbol,
                        best_bid = ?book.best_bid().map(|l| l.price()),
                        best_ask = ?book.best_ask().map(|l| l.price()),
                        spread = %book.spread,
                        source = ?book.source.map(|s| s.as_str()),
                        "Order book updated"
                    );
                }
            }
        }
    });

    let connection = Arc::new(FeedConnection::new(
        FeedConnectionConfig::from(&config),
        Arc::clone(&registry),
        Arc::new(TungsteniteTransport::new()),
    ));

    let health_state = Arc::new(
        HealthServerState::new(env!("CARGO_PKG_VERSION").to_string(), Arc::clone(&connection))
            .with_orderbook(orderbook.subscribe()),
    );
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    connection.connect();

    tracing::info!("Market feed ready");

    await_shutdown(shutdown_token).await;

    connection.disconnect();
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, orderbook.shutdown())
        .await
        .is_err()
    {
        tracing::warn!("Order book task did not stop in time");
    }
    drop(ticker_logger);

    tracing::info!("Market feed stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &FeedConfig) {
    tracing::info!(
        streams = config.streams.streams().len(),
        orderbook_symbol = %config.orderbook.symbol,
        reconnect_delay_ms = config.reconnect.initial_delay.as_millis(),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(url = %config.streams.url(), "Stream endpoint");
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
