//! Order Book Service Integration Tests
//!
//! Exercises the single-writer task through the registry: live updates,
//! synthetic refresh timing, suppression, scoped teardown and hostile input.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rust_decimal::Decimal;

use market_feed::{
    Channel, ChannelRegistry, DepthUpdate, LadderSource, OrderBookHandle, OrderBookService,
    OrderBookServiceConfig, StreamEvent,
};

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn make_test_depth(symbol: &str, event_ms: i64) -> StreamEvent {
    StreamEvent::Depth(DepthUpdate {
        symbol: symbol.to_string(),
        bids: vec![(dec("100.00"), dec("1.5")), (dec("99.50"), dec("2"))],
        asks: vec![(dec("100.50"), dec("0.5")), (dec("101.00"), dec("1"))],
        event_time: Utc.timestamp_millis_opt(event_ms).unwrap(),
    })
}

fn make_test_service(
    registry: &Arc<ChannelRegistry>,
    suppress_synthetic: bool,
) -> OrderBookHandle {
    let config = OrderBookServiceConfig {
        suppress_synthetic,
        ..OrderBookServiceConfig::new("BTCUSDT")
    };
    OrderBookService::spawn_with_rng(Arc::clone(registry), config, StdRng::seed_from_u64(42))
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn live_update_is_published() {
    let registry = Arc::new(ChannelRegistry::new());
    let handle = make_test_service(&registry, true);
    let mut updates = handle.subscribe();

    let report = registry.dispatch(Channel::OrderBook, &make_test_depth("BTCUSDT", 1_000));
    assert_eq!(report.delivered, 1);

    updates.changed().await.unwrap();
    let book = handle.snapshot();

    assert_eq!(book.source, Some(LadderSource::Live));
    assert_eq!(book.best_bid().unwrap().price(), dec("100.00"));
    assert_eq!(book.best_ask().unwrap().price(), dec("100.50"));
    assert_eq!(book.spread, dec("0.50"));
    assert_eq!(book.bids[1].cumulative_size(), dec("3.5"));
}

#[tokio::test(start_paused = true)]
async fn other_symbols_are_ignored() {
    let registry = Arc::new(ChannelRegistry::new());
    let handle = make_test_service(&registry, true);

    let before = handle.snapshot();

    registry.dispatch(Channel::OrderBook, &make_test_depth("ETHUSDT", 1_000));
    settle().await;

    assert_eq!(*handle.snapshot(), *before);
}

#[tokio::test(start_paused = true)]
async fn synthetic_ladder_is_present_from_spawn() {
    let registry = Arc::new(ChannelRegistry::new());
    let handle = make_test_service(&registry, true);

    let book = handle.snapshot();
    assert_eq!(book.symbol, "BTCUSDT");
    assert_eq!(book.source, Some(LadderSource::Synthetic));
    assert_eq!(book.bids.len(), 15);
    assert_eq!(book.asks.len(), 15);
    assert!(book.bids.windows(2).all(|w| w[0].price() > w[1].price()));
    assert!(book.asks.windows(2).all(|w| w[0].price() < w[1].price()));
    assert!(book.best_bid().unwrap().price() < dec("67234.56"));
    assert_eq!(
        book.spread,
        book.best_ask().unwrap().price() - book.best_bid().unwrap().price()
    );
}

#[tokio::test(start_paused = true)]
async fn synthetic_refresh_repeats_on_interval() {
    let registry = Arc::new(ChannelRegistry::new());
    let handle = make_test_service(&registry, true);
    let mut updates = handle.subscribe();
    let first = handle.snapshot();

    tokio::time::sleep(Duration::from_millis(1_900)).await;
    assert!(!updates.has_changed().unwrap());

    tokio::time::sleep(Duration::from_millis(200)).await;
    settle().await;
    assert!(updates.has_changed().unwrap());

    let book = handle.snapshot();
    assert_eq!(book.source, Some(LadderSource::Synthetic));
    assert_eq!(book.bids.len(), 15);
    // Anchored on the previous best bid
    assert!(book.best_bid().unwrap().price() < first.best_bid().unwrap().price());
}

#[tokio::test(start_paused = true)]
async fn synthetic_refresh_is_suppressed_while_live() {
    let registry = Arc::new(ChannelRegistry::new());
    let handle = make_test_service(&registry, true);

    tokio::time::sleep(Duration::from_secs(1)).await;
    registry.dispatch(Channel::OrderBook, &make_test_depth("BTCUSDT", 1_000));
    settle().await;

    // Tick at 2s lands 1s after the live update
    tokio::time::sleep(Duration::from_secs(1)).await;
    settle().await;
    let book = handle.snapshot();
    assert_eq!(book.source, Some(LadderSource::Live));
    assert_eq!(book.best_bid().unwrap().price(), dec("100.00"));

    // Tick at 4s: live has gone quiet
    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;
    let book = handle.snapshot();
    assert_eq!(book.source, Some(LadderSource::Synthetic));
    assert!(book.best_bid().unwrap().price() < dec("100.00"));
    assert!(book.best_ask().unwrap().price() > dec("100.00"));
}

#[tokio::test(start_paused = true)]
async fn without_suppression_synthetic_overwrites_live() {
    let registry = Arc::new(ChannelRegistry::new());
    let handle = make_test_service(&registry, false);

    tokio::time::sleep(Duration::from_secs(1)).await;
    registry.dispatch(Channel::OrderBook, &make_test_depth("BTCUSDT", 1_000));
    settle().await;
    assert_eq!(handle.snapshot().source, Some(LadderSource::Live));

    tokio::time::sleep(Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(handle.snapshot().source, Some(LadderSource::Synthetic));
}

#[tokio::test(start_paused = true)]
async fn stale_live_update_is_ignored() {
    let registry = Arc::new(ChannelRegistry::new());
    let handle = make_test_service(&registry, true);

    registry.dispatch(Channel::OrderBook, &make_test_depth("BTCUSDT", 2_000));
    settle().await;

    let older = StreamEvent::Depth(DepthUpdate {
        symbol: "BTCUSDT".to_string(),
        bids: vec![(dec("90.00"), dec("1"))],
        asks: vec![(dec("91.00"), dec("1"))],
        event_time: Utc.timestamp_millis_opt(1_000).unwrap(),
    });
    registry.dispatch(Channel::OrderBook, &older);
    settle().await;

    assert_eq!(handle.snapshot().best_bid().unwrap().price(), dec("100.00"));
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_unsubscribes() {
    let registry = Arc::new(ChannelRegistry::new());
    let handle = make_test_service(&registry, true);
    assert_eq!(registry.subscriber_count(Channel::OrderBook), 1);

    drop(handle);

    assert_eq!(registry.subscriber_count(Channel::OrderBook), 0);
    let report = registry.dispatch(Channel::OrderBook, &make_test_depth("BTCUSDT", 1_000));
    assert_eq!(report.delivered, 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_the_writer() {
    let registry = Arc::new(ChannelRegistry::new());
    let handle = make_test_service(&registry, true);
    let mut updates = handle.subscribe();
    let last = handle.snapshot();

    handle.shutdown().await;

    assert_eq!(registry.stats().total(), 0);
    assert!(updates.changed().await.is_err());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(**updates.borrow(), *last);
}

#[tokio::test(start_paused = true)]
async fn writer_survives_overflowing_sizes() {
    let registry = Arc::new(ChannelRegistry::new());
    let handle = make_test_service(&registry, true);

    let huge = StreamEvent::Depth(DepthUpdate {
        symbol: "BTCUSDT".to_string(),
        bids: vec![(dec("100.00"), Decimal::MAX), (dec("99.00"), Decimal::MAX)],
        asks: vec![(dec("100.50"), Decimal::MAX), (dec("101.00"), Decimal::MAX)],
        event_time: Utc.timestamp_millis_opt(1_000).unwrap(),
    });
    assert_eq!(registry.dispatch(Channel::OrderBook, &huge).delivered, 1);
    settle().await;

    let report = registry.dispatch(Channel::OrderBook, &make_test_depth("BTCUSDT", 2_000));
    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 0);
    settle().await;

    let book = handle.snapshot();
    assert_eq!(book.source, Some(LadderSource::Live));
    assert_eq!(book.bids.len(), 2);
    assert_eq!(book.bids[1].cumulative_size(), dec("3.5"));
}

#[tokio::test(start_paused = true)]
async fn zero_refresh_interval_is_clamped() {
    let registry = Arc::new(ChannelRegistry::new());
    let config = OrderBookServiceConfig {
        refresh_interval: Duration::ZERO,
        ..OrderBookServiceConfig::new("BTCUSDT")
    };
    let handle =
        OrderBookService::spawn_with_rng(Arc::clone(&registry), config, StdRng::seed_from_u64(7));

    settle().await;

    let report = registry.dispatch(Channel::OrderBook, &make_test_depth("BTCUSDT", 1_000));
    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(handle.snapshot().source, Some(LadderSource::Synthetic));
}
