//! Application Services
//!
//! - `OrderBookService`: keeps one symbol's ladder current from live depth
//!   updates, falling back to synthetic refreshes when depth goes quiet.
//!
//! # Single writer
//!
//! Live updates arrive on the feed's session task, and the synthetic refresh
//! runs on a timer. Letting both write the ladder independently means a
//! synthetic refresh can overwrite a fresher live ladder. Here one spawned
//! task owns the [`OrderBookReconstructor`]: live updates are forwarded to it
//! over an `mpsc` channel, and the refresh interval ticks inside the same
//! `select!`, so every mutation is serialized. With suppression enabled (the
//! default) a refresh is skipped while live depth has been applied within the
//! last refresh interval. Readers get immutable snapshots through a `watch`
//! channel.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::domain::orderbook::{
    ApplyOutcome, DEFAULT_DEPTH, LadderSource, OrderBookReconstructor, OrderBookSnapshot,
};
use crate::domain::registry::{ChannelRegistry, EventHandler, HandlerError, SharedHandler};
use crate::domain::streaming::{Channel, DepthUpdate, StreamEvent};
use crate::infrastructure::config::OrderBookSettings;
use crate::infrastructure::metrics;

/// Capacity of the live update queue.
const DEFAULT_QUEUE_CAPACITY: usize = 1_024;

/// Shortest accepted synthetic refresh period.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(1);

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for [`OrderBookService`].
#[derive(Debug, Clone)]
pub struct OrderBookServiceConfig {
    /// Tracked symbol.
    pub symbol: String,
    /// Levels kept per side.
    pub depth: usize,
    /// Synthetic refresh period.
    pub refresh_interval: Duration,
    /// Anchor until the first best bid is known.
    pub base_price: Decimal,
    /// Skip synthetic refreshes while live depth is flowing.
    pub suppress_synthetic: bool,
    /// Live update queue capacity.
    pub queue_capacity: usize,
}

impl OrderBookServiceConfig {
    /// Defaults for `symbol`.
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Self::default()
        }
    }
}

impl Default for OrderBookServiceConfig {
    fn default() -> Self {
        Self::from(&OrderBookSettings::default())
    }
}

impl From<&OrderBookSettings> for OrderBookServiceConfig {
    fn from(settings: &OrderBookSettings) -> Self {
        Self {
            symbol: settings.symbol.clone(),
            depth: if settings.depth == 0 {
                DEFAULT_DEPTH
            } else {
                settings.depth
            },
            refresh_interval: settings.refresh_interval,
            base_price: settings.base_price,
            suppress_synthetic: settings.suppress_synthetic,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

// =============================================================================
// Live Update Forwarding
// =============================================================================

/// Registry handler that queues matching depth updates for the writer task.
struct DepthForwarder {
    symbol: String,
    tx: mpsc::Sender<DepthUpdate>,
}

impl EventHandler for DepthForwarder {
    fn handle(&self, event: &StreamEvent) -> Result<(), HandlerError> {
        let StreamEvent::Depth(update) = event else {
            return Ok(());
        };
        if !update.symbol.eq_ignore_ascii_case(&self.symbol) {
            return Ok(());
        }

        self.tx.try_send(update.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                HandlerError::new(format!("{} order book queue full", self.symbol))
            }
            mpsc::error::TrySendError::Closed(_) => {
                HandlerError::new(format!("{} order book stopped", self.symbol))
            }
        })
    }
}

// =============================================================================
// Service
// =============================================================================

/// Spawns single-writer order book tasks.
#[derive(Debug, Clone, Copy)]
pub struct OrderBookService;

impl OrderBookService {
    /// Start tracking `config.symbol`, fed by depth events on `registry`.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn(registry: Arc<ChannelRegistry>, config: OrderBookServiceConfig) -> OrderBookHandle {
        Self::spawn_with_rng(registry, config, StdRng::from_os_rng())
    }

    /// Like [`spawn`](Self::spawn) with a caller-supplied generator.
    ///
    /// The book starts with a synthetic ladder, so readers never see it
    /// empty. A zero refresh period is raised to one millisecond.
    #[must_use]
    pub fn spawn_with_rng<R>(
        registry: Arc<ChannelRegistry>,
        config: OrderBookServiceConfig,
        mut rng: R,
    ) -> OrderBookHandle
    where
        R: Rng + Send + 'static,
    {
        let refresh_interval = config.refresh_interval.max(MIN_REFRESH_INTERVAL);
        let mut book = OrderBookReconstructor::new(&config.symbol, config.depth, config.base_price);
        let symbol = book.symbol().to_string();

        book.refresh_synthetic(&mut rng);
        metrics::record_orderbook_update(LadderSource::Synthetic);

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let handler: SharedHandler = Arc::new(DepthForwarder {
            symbol: symbol.clone(),
            tx,
        });
        registry.subscribe(Channel::OrderBook, &handler);

        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(book.snapshot()));
        let cancel = CancellationToken::new();

        let writer = Writer {
            book,
            updates: rx,
            snapshots: snapshot_tx,
            refresh_interval,
            suppress_synthetic: config.suppress_synthetic,
            last_live: None,
        };
        let task = tokio::spawn(writer.run(rng, cancel.clone()));

        tracing::info!(
            %symbol,
            refresh_ms = refresh_interval.as_millis(),
            suppress_synthetic = config.suppress_synthetic,
            "Order book tracking started"
        );

        OrderBookHandle {
            symbol,
            registry,
            handler,
            snapshots: snapshot_rx,
            cancel,
            task: Some(task),
        }
    }
}

struct Writer {
    book: OrderBookReconstructor,
    updates: mpsc::Receiver<DepthUpdate>,
    snapshots: watch::Sender<Arc<OrderBookSnapshot>>,
    refresh_interval: Duration,
    suppress_synthetic: bool,
    last_live: Option<Instant>,
}

impl Writer {
    async fn run<R: Rng>(mut self, mut rng: R, cancel: CancellationToken) {
        let mut refresh = tokio::time::interval_at(
            Instant::now() + self.refresh_interval,
            self.refresh_interval,
        );
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                update = self.updates.recv() => {
                    let Some(update) = update else { break };
                    self.apply_live(&update);
                }
                _ = refresh.tick() => self.refresh(&mut rng),
            }
        }

        tracing::info!(symbol = %self.book.symbol(), "Order book tracking stopped");
    }

    fn apply_live(&mut self, update: &DepthUpdate) {
        match self.book.apply_update(update) {
            ApplyOutcome::Applied => {
                self.last_live = Some(Instant::now());
                metrics::record_orderbook_update(LadderSource::Live);
                self.publish();
            }
            ApplyOutcome::SymbolMismatch | ApplyOutcome::Stale => {}
        }
    }

    fn refresh<R: Rng>(&mut self, rng: &mut R) {
        if self.suppress_synthetic
            && self
                .last_live
                .is_some_and(|at| at.elapsed() < self.refresh_interval)
        {
            metrics::record_synthetic_suppressed();
            tracing::trace!(symbol = %self.book.symbol(), "Synthetic refresh suppressed");
            return;
        }

        self.book.refresh_synthetic(rng);
        metrics::record_orderbook_update(LadderSource::Synthetic);
        self.publish();
    }

    fn publish(&self) {
        self.snapshots.send_replace(Arc::new(self.book.snapshot()));
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Owner of a running order book task.
///
/// Dropping the handle unsubscribes from the registry and stops the task.
pub struct OrderBookHandle {
    symbol: String,
    registry: Arc<ChannelRegistry>,
    handler: SharedHandler,
    snapshots: watch::Receiver<Arc<OrderBookSnapshot>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for OrderBookHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderBookHandle")
            .field("symbol", &self.symbol)
            .field("stopped", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl OrderBookHandle {
    /// Tracked symbol (upper-case).
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Latest published ladder.
    #[must_use]
    pub fn snapshot(&self) -> Arc<OrderBookSnapshot> {
        Arc::clone(&self.snapshots.borrow())
    }

    /// Receiver notified on every ladder rebuild.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<OrderBookSnapshot>> {
        self.snapshots.clone()
    }

    /// Stop the task and wait for it to finish.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::warn!(symbol = %self.symbol, error = %e, "Order book task ended abnormally");
        }
    }

    fn stop(&self) {
        self.registry.unsubscribe(Channel::OrderBook, &self.handler);
        self.cancel.cancel();
    }
}

impl Drop for OrderBookHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_settings() {
        let config = OrderBookServiceConfig::from(&OrderBookSettings::default());

        assert_eq!(config.symbol, "BTCUSDT");
        assert_eq!(config.depth, DEFAULT_DEPTH);
        assert_eq!(config.refresh_interval, Duration::from_secs(2));
        assert!(config.suppress_synthetic);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn forwarder_filters_by_symbol_and_channel() {
        use chrono::Utc;

        use crate::domain::streaming::TickerUpdate;

        let (tx, mut rx) = mpsc::channel(4);
        let forwarder = DepthForwarder {
            symbol: "BTCUSDT".to_string(),
            tx,
        };

        let depth = |symbol: &str| {
            StreamEvent::Depth(DepthUpdate {
                symbol: symbol.to_string(),
                bids: vec![],
                asks: vec![],
                event_time: Utc::now(),
            })
        };
        let ticker = StreamEvent::Ticker(TickerUpdate {
            symbol: "BTCUSDT".to_string(),
            last_price: Decimal::ONE,
            price_change: Decimal::ZERO,
            change_percent: Decimal::ZERO,
            volume: Decimal::ZERO,
            high: Decimal::ONE,
            low: Decimal::ONE,
            event_time: Utc::now(),
        });

        forwarder.handle(&depth("ETHUSDT")).unwrap();
        forwarder.handle(&ticker).unwrap();
        forwarder.handle(&depth("btcusdt")).unwrap();

        assert_eq!(rx.try_recv().unwrap().symbol, "btcusdt");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn forwarder_reports_full_queue() {
        use chrono::Utc;

        let (tx, _rx) = mpsc::channel(1);
        let forwarder = DepthForwarder {
            symbol: "BTCUSDT".to_string(),
            tx,
        };
        let event = StreamEvent::Depth(DepthUpdate {
            symbol: "BTCUSDT".to_string(),
            bids: vec![],
            asks: vec![],
            event_time: Utc::now(),
        });

        assert!(forwarder.handle(&event).is_ok());
        assert!(forwarder.handle(&event).is_err());
    }
}
