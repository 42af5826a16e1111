//! Market Data Streaming Types
//!
//! Core domain types for market data: ticker updates and depth updates.
//! These types are codec-agnostic and represent the canonical
//! internal representation of decoded feed frames.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

// =============================================================================
// Channels
// =============================================================================

/// Event category used to group subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// 24h rolling ticker statistics.
    Ticker,
    /// Order book depth snapshots.
    OrderBook,
}

impl Channel {
    /// Get all channels.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Ticker, Self::OrderBook]
    }

    /// Get the channel name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::OrderBook => "orderbook",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown channel name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown channel: {0}")]
pub struct UnknownChannel(pub String);

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ticker" => Ok(Self::Ticker),
            "orderbook" => Ok(Self::OrderBook),
            other => Err(UnknownChannel(other.to_string())),
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// A single (price, size) entry of a depth update.
pub type Level = (Decimal, Decimal);

/// Rolling 24h ticker statistics for one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerUpdate {
    /// Trading pair symbol (upper case, e.g. `BTCUSDT`).
    pub symbol: String,
    /// Last traded price.
    pub last_price: Decimal,
    /// Absolute price change over the window.
    pub price_change: Decimal,
    /// Price change over the window in percent.
    pub change_percent: Decimal,
    /// Base asset volume over the window.
    pub volume: Decimal,
    /// Highest price over the window.
    pub high: Decimal,
    /// Lowest price over the window.
    pub low: Decimal,
    /// Exchange event time.
    pub event_time: DateTime<Utc>,
}

/// Top-of-book depth for one symbol.
///
/// Each side is ordered best-first as delivered by the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthUpdate {
    /// Trading pair symbol (upper case, e.g. `BTCUSDT`).
    pub symbol: String,
    /// Bid levels, best (highest) first.
    pub bids: Vec<Level>,
    /// Ask levels, best (lowest) first.
    pub asks: Vec<Level>,
    /// Exchange event time.
    pub event_time: DateTime<Utc>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Ticker statistics.
    Ticker(TickerUpdate),
    /// Depth update.
    Depth(DepthUpdate),
}

impl StreamEvent {
    /// Channel this event is dispatched on.
    #[must_use]
    pub const fn channel(&self) -> Channel {
        match self {
            Self::Ticker(_) => Channel::Ticker,
            Self::Depth(_) => Channel::OrderBook,
        }
    }

    /// Symbol the event refers to.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Ticker(t) => &t.symbol,
            Self::Depth(d) => &d.symbol,
        }
    }

    /// Exchange event time.
    #[must_use]
    pub const fn event_time(&self) -> DateTime<Utc> {
        match self {
            Self::Ticker(t) => t.event_time,
            Self::Depth(d) => d.event_time,
        }
    }
}
