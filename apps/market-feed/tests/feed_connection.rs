//! Feed Connection Integration Tests
//!
//! Drives `FeedConnection` against an in-memory transport on a paused clock:
//! idempotent connect, discriminant routing, reconnect scheduling and
//! disconnect/connect lifecycles.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use parking_lot::Mutex;

use market_feed::infrastructure::binance::ReconnectConfig;
use market_feed::{
    Channel, ChannelRegistry, ConnectionState, FeedConnection, FeedConnectionConfig,
    FeedTransport, Frame, FrameStream, SharedHandler, StreamEvent, TransportError, handler_fn,
};

const TICKER: &str = r#"{"e":"24hrTicker","E":1700000000000,"s":"BTCUSDT","p":"10.5","P":"0.02","c":"67234.56","h":"68000","l":"66000","v":"99.5"}"#;
const DEPTH: &str = r#"{"e":"depthUpdate","E":1700000000000,"s":"BTCUSDT","b":[["67234.10","1.5"]],"a":[["67234.60","0.7"]]}"#;
const UNKNOWN: &str = r#"{"e":"aggTrade","E":1700000000000,"s":"BTCUSDT","p":"1","q":"1"}"#;
const MALFORMED: &str = r#"{"e":"24hrTicker","s":"BTCUSDT""#;

// =============================================================================
// Test Transport
// =============================================================================

type Sender = mpsc::UnboundedSender<Result<Frame, TransportError>>;

#[derive(Default)]
struct ScriptedTransport {
    opens: AtomicUsize,
    failures_remaining: AtomicUsize,
    sessions: Mutex<Vec<Sender>>,
}

impl ScriptedTransport {
    fn failing(times: usize) -> Self {
        let transport = Self::default();
        transport.failures_remaining.store(times, Ordering::SeqCst);
        transport
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn sender(&self, index: usize) -> Sender {
        self.sessions.lock()[index].clone()
    }

    fn send_text(&self, text: &str) {
        let latest = self.sessions.lock().last().cloned().unwrap();
        latest.unbounded_send(Ok(Frame::Text(text.to_string()))).unwrap();
    }

    fn send_error(&self, error: TransportError) {
        let latest = self.sessions.lock().last().cloned().unwrap();
        latest.unbounded_send(Err(error)).unwrap();
    }

    /// End the latest session as if the server closed it.
    fn close_latest(&self) {
        if let Some(tx) = self.sessions.lock().last() {
            tx.close_channel();
        }
    }
}

#[async_trait]
impl FeedTransport for ScriptedTransport {
    async fn open(&self, _url: &str) -> Result<FrameStream, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::ConnectionFailed("refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded();
        self.sessions.lock().push(tx);
        Ok(Box::pin(rx))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn make_test_config() -> FeedConnectionConfig {
    FeedConnectionConfig {
        url: "ws://feed.test/ws/btcusdt@ticker/btcusdt@depth20@100ms".to_string(),
        reconnect: ReconnectConfig::default(),
        idle_timeout: Duration::ZERO,
    }
}

fn make_test_connection(
    config: FeedConnectionConfig,
    transport: &Arc<ScriptedTransport>,
) -> (Arc<FeedConnection>, Arc<ChannelRegistry>) {
    let registry = Arc::new(ChannelRegistry::new());
    let connection = Arc::new(FeedConnection::new(
        config,
        Arc::clone(&registry),
        Arc::clone(transport) as Arc<dyn FeedTransport>,
    ));
    (connection, registry)
}

fn make_recorder() -> (SharedHandler, Arc<Mutex<Vec<StreamEvent>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler = handler_fn(move |event| {
        sink.lock().push(event.clone());
        Ok(())
    });
    (handler, seen)
}

/// Let spawned tasks run without moving the clock meaningfully.
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn connect_is_idempotent() {
    let transport = Arc::new(ScriptedTransport::default());
    let (connection, _registry) = make_test_connection(make_test_config(), &transport);

    connection.connect();
    connection.connect();
    assert_eq!(connection.state(), ConnectionState::Connecting);

    settle().await;
    connection.connect();
    settle().await;

    assert_eq!(transport.opens(), 1);
    assert_eq!(connection.state(), ConnectionState::Connected);
    assert!(connection.status().last_connected_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn frames_are_routed_by_discriminant() {
    let transport = Arc::new(ScriptedTransport::default());
    let (connection, registry) = make_test_connection(make_test_config(), &transport);
    let (tickers, ticker_events) = make_recorder();
    let (books, book_events) = make_recorder();
    registry.subscribe(Channel::Ticker, &tickers);
    registry.subscribe(Channel::OrderBook, &books);

    connection.connect();
    settle().await;

    for frame in [TICKER, DEPTH, UNKNOWN, MALFORMED, TICKER] {
        transport.send_text(frame);
    }
    settle().await;

    assert_eq!(ticker_events.lock().len(), 2);
    assert_eq!(book_events.lock().len(), 1);
    assert!(matches!(book_events.lock()[0], StreamEvent::Depth(_)));

    let status = connection.status();
    assert_eq!(status.frames_received, 5);
    assert_eq!(status.decode_errors, 1);
    assert_eq!(status.state, ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn failing_handler_does_not_stop_the_session() {
    let transport = Arc::new(ScriptedTransport::default());
    let (connection, registry) = make_test_connection(make_test_config(), &transport);
    let failing = handler_fn(|_| Err(market_feed::HandlerError::new("boom")));
    let (recorder, seen) = make_recorder();
    registry.subscribe(Channel::Ticker, &failing);
    registry.subscribe(Channel::Ticker, &recorder);

    connection.connect();
    settle().await;
    transport.send_text(TICKER);
    transport.send_text(TICKER);
    settle().await;

    assert_eq!(seen.lock().len(), 2);
    assert_eq!(connection.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn forced_close_schedules_exactly_one_reconnect() {
    let transport = Arc::new(ScriptedTransport::default());
    let (connection, _registry) = make_test_connection(make_test_config(), &transport);

    connection.connect();
    settle().await;
    transport.close_latest();
    settle().await;

    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(connection.reconnect_pending());
    assert_eq!(connection.status().reconnect_attempts, 1);

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(transport.opens(), 1);

    tokio::time::sleep(Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(transport.opens(), 2);
    assert_eq!(connection.state(), ConnectionState::Connected);
    assert!(!connection.reconnect_pending());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.opens(), 2);
    assert_eq!(connection.status().reconnect_attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn transport_error_schedules_reconnect() {
    let transport = Arc::new(ScriptedTransport::default());
    let (connection, registry) = make_test_connection(make_test_config(), &transport);
    let (recorder, seen) = make_recorder();
    registry.subscribe(Channel::Ticker, &recorder);

    connection.connect();
    settle().await;
    transport.send_error(TransportError::Stream("connection reset".to_string()));
    settle().await;

    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(connection.reconnect_pending());
    assert!(seen.lock().is_empty());

    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;
    assert_eq!(connection.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn failed_opens_retry_at_fixed_interval() {
    let transport = Arc::new(ScriptedTransport::failing(2));
    let (connection, _registry) = make_test_connection(make_test_config(), &transport);

    connection.connect();
    settle().await;
    assert_eq!(transport.opens(), 1);
    assert_eq!(connection.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;
    assert_eq!(transport.opens(), 2);
    assert_eq!(connection.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;
    assert_eq!(transport.opens(), 3);
    assert_eq!(connection.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn attempt_ceiling_leaves_connection_down() {
    let transport = Arc::new(ScriptedTransport::failing(10));
    let config = FeedConnectionConfig {
        reconnect: ReconnectConfig {
            max_attempts: 1,
            ..ReconnectConfig::default()
        },
        ..make_test_config()
    };
    let (connection, _registry) = make_test_connection(config, &transport);

    connection.connect();
    settle().await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;

    assert_eq!(transport.opens(), 2);
    assert!(!connection.reconnect_pending());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.opens(), 2);
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn idle_session_is_treated_as_closed() {
    let transport = Arc::new(ScriptedTransport::default());
    let config = FeedConnectionConfig {
        idle_timeout: Duration::from_secs(30),
        ..make_test_config()
    };
    let (connection, _registry) = make_test_connection(config, &transport);

    connection.connect();
    settle().await;

    tokio::time::sleep(Duration::from_secs(20)).await;
    transport.send_text(TICKER);
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(connection.state(), ConnectionState::Connected);

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(connection.reconnect_pending());
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_reconnect_and_clears_subscriptions() {
    let transport = Arc::new(ScriptedTransport::default());
    let (connection, registry) = make_test_connection(make_test_config(), &transport);
    let (recorder, _seen) = make_recorder();
    registry.subscribe(Channel::Ticker, &recorder);

    connection.connect();
    settle().await;
    transport.close_latest();
    settle().await;
    assert!(connection.reconnect_pending());

    connection.disconnect();

    assert!(!connection.reconnect_pending());
    assert_eq!(registry.stats().total(), 0);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(transport.opens(), 1);
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn reconnect_after_disconnect_behaves_like_first_connect() {
    let transport = Arc::new(ScriptedTransport::default());
    let (connection, registry) = make_test_connection(make_test_config(), &transport);
    let (before, before_seen) = make_recorder();
    registry.subscribe(Channel::Ticker, &before);

    connection.connect();
    settle().await;
    connection.disconnect();
    settle().await;

    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert_eq!(connection.status().reconnect_attempts, 0);

    let (after, after_seen) = make_recorder();
    registry.subscribe(Channel::Ticker, &after);

    connection.connect();
    assert_eq!(connection.state(), ConnectionState::Connecting);
    settle().await;

    assert_eq!(transport.opens(), 2);
    assert_eq!(connection.state(), ConnectionState::Connected);

    // The first session is gone; only the new one delivers.
    let _ = transport.sender(0).unbounded_send(Ok(Frame::Text(TICKER.to_string())));
    transport.send_text(TICKER);
    settle().await;

    assert!(before_seen.lock().is_empty());
    assert_eq!(after_seen.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_while_connecting_discards_the_open() {
    let transport = Arc::new(ScriptedTransport::default());
    let (connection, _registry) = make_test_connection(make_test_config(), &transport);

    connection.connect();
    connection.disconnect();
    settle().await;

    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(!connection.reconnect_pending());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(transport.opens() <= 1);
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn depth_frames_rebuild_the_tracked_book() {
    use market_feed::{LadderSource, OrderBookService, OrderBookServiceConfig};
    use rust_decimal::Decimal;

    let transport = Arc::new(ScriptedTransport::default());
    let (connection, registry) = make_test_connection(make_test_config(), &transport);
    let book = OrderBookService::spawn(
        Arc::clone(&registry),
        OrderBookServiceConfig::new("btcusdt"),
    );
    let mut updates = book.subscribe();

    connection.connect();
    settle().await;
    transport.send_text(DEPTH);
    updates.changed().await.unwrap();

    let snapshot = book.snapshot();
    assert_eq!(snapshot.symbol, "BTCUSDT");
    assert_eq!(snapshot.source, Some(LadderSource::Live));
    assert_eq!(snapshot.spread, Decimal::new(50, 2));
}
