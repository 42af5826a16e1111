//! Channel Registry
//!
//! Maps an event channel to the set of handlers interested in it and fans
//! each dispatched event out to every one of them.
//!
//! # Design
//!
//! - Handler identity is the `Arc` allocation: registering the same handler
//!   twice on a channel is a no-op.
//! - The registry keeps only a `Weak` reference. The component that
//!   registered a handler owns it; once dropped, the entry is pruned and
//!   never invoked again.
//! - Dispatch works on a snapshot of the handler set, so handlers may
//!   subscribe or unsubscribe from inside a dispatch.
//! - A handler that fails (error or panic) is logged and counted; the
//!   remaining handlers still run.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::domain::streaming::{Channel, StreamEvent};

// =============================================================================
// Handlers
// =============================================================================

/// Error returned by a subscriber while handling an event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("handler failed: {0}")]
pub struct HandlerError(String);

impl HandlerError {
    /// Create a handler error with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A subscriber that consumes dispatched events.
pub trait EventHandler: Send + Sync {
    /// Handle one event.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError` if the handler could not process the event.
    /// The error is isolated to this handler.
    fn handle(&self, event: &StreamEvent) -> Result<(), HandlerError>;
}

/// Shared handler reference, as owned by the subscribing component.
pub type SharedHandler = Arc<dyn EventHandler>;

/// Closure adapter returned by [`handler_fn`].
pub struct FnHandler<F>(F);

impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&StreamEvent) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, event: &StreamEvent) -> Result<(), HandlerError> {
        (self.0)(event)
    }
}

/// Wrap a closure as a shared handler.
///
/// # Example
///
/// ```rust
/// use market_feed::domain::registry::{ChannelRegistry, handler_fn};
/// use market_feed::domain::streaming::Channel;
///
/// let registry = ChannelRegistry::new();
/// let handler = handler_fn(|event| {
///     println!("{}", event.symbol());
///     Ok(())
/// });
///
/// assert!(registry.subscribe(Channel::Ticker, &handler));
/// assert!(!registry.subscribe(Channel::Ticker, &handler));
/// ```
pub fn handler_fn<F>(f: F) -> SharedHandler
where
    F: Fn(&StreamEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// Identity of a handler allocation.
type HandlerKey = usize;

fn handler_key(handler: &SharedHandler) -> HandlerKey {
    Arc::as_ptr(handler).cast::<()>().addr()
}

// =============================================================================
// Registry
// =============================================================================

/// Outcome of a single dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that completed successfully.
    pub delivered: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

/// Subscriber counts per channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Live ticker subscribers.
    pub ticker: usize,
    /// Live order book subscribers.
    pub orderbook: usize,
}

impl RegistryStats {
    /// Total subscribers across all channels.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.ticker + self.orderbook
    }
}

/// Thread-safe channel → handler set registry.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: RwLock<HashMap<Channel, HashMap<HandlerKey, Weak<dyn EventHandler>>>>,
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("stats", &self.stats())
            .finish()
    }
}

impl ChannelRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` on `channel`.
    ///
    /// Returns `false` if the same handler is already registered there.
    pub fn subscribe(&self, channel: Channel, handler: &SharedHandler) -> bool {
        let key = handler_key(handler);
        let mut channels = self.channels.write();
        let handlers = channels.entry(channel).or_default();

        // A dead entry under the same key belongs to a freed allocation.
        if handlers.get(&key).is_some_and(|h| h.strong_count() > 0) {
            return false;
        }

        handlers.insert(key, Arc::downgrade(handler));
        tracing::debug!(%channel, subscribers = handlers.len(), "Handler subscribed");
        true
    }

    /// Remove `handler` from `channel`.
    ///
    /// Returns `false` if it was not registered; that is not an error.
    pub fn unsubscribe(&self, channel: Channel, handler: &SharedHandler) -> bool {
        let key = handler_key(handler);
        let mut channels = self.channels.write();
        let Some(handlers) = channels.get_mut(&channel) else {
            return false;
        };

        let removed = handlers.remove(&key).is_some();
        if handlers.is_empty() {
            channels.remove(&channel);
        }
        if removed {
            tracing::debug!(%channel, "Handler unsubscribed");
        }
        removed
    }

    /// Invoke every handler currently registered on `channel` with `event`.
    pub fn dispatch(&self, channel: Channel, event: &StreamEvent) -> DispatchReport {
        let (live, dead) = self.snapshot(channel);
        if dead {
            self.prune(channel);
        }

        let mut report = DispatchReport::default();
        for handler in live {
            match catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    tracing::warn!(%channel, symbol = event.symbol(), error = %e, "Handler failed");
                }
                Err(_) => {
                    report.failed += 1;
                    tracing::error!(%channel, symbol = event.symbol(), "Handler panicked");
                }
            }
        }

        report
    }

    /// Remove every registration on every channel.
    pub fn clear(&self) {
        self.channels.write().clear();
        tracing::debug!("All subscriptions cleared");
    }

    /// Number of live handlers on `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.channels
            .read()
            .get(&channel)
            .map_or(0, |h| h.values().filter(|w| w.strong_count() > 0).count())
    }

    /// Subscriber counts for all channels.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            ticker: self.subscriber_count(Channel::Ticker),
            orderbook: self.subscriber_count(Channel::OrderBook),
        }
    }

    /// Upgrade the handlers of a channel, reporting whether dead ones exist.
    fn snapshot(&self, channel: Channel) -> (Vec<SharedHandler>, bool) {
        let channels = self.channels.read();
        let Some(handlers) = channels.get(&channel) else {
            return (Vec::new(), false);
        };

        let live: Vec<_> = handlers.values().filter_map(Weak::upgrade).collect();
        let dead = live.len() != handlers.len();
        (live, dead)
    }

    fn prune(&self, channel: Channel) {
        let mut channels = self.channels.write();
        if let Some(handlers) = channels.get_mut(&channel) {
            handlers.retain(|_, h| h.strong_count() > 0);
            if handlers.is_empty() {
                channels.remove(&channel);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
