//! Order Book Reconstruction
//!
//! Turns depth updates for one symbol into ranked bid and ask ladders with
//! cumulative sizes and a best-price spread.
//!
//! # Semantics
//!
//! Each depth update is treated as a complete snapshot of the top of the
//! book: both sides are rebuilt from scratch, so a level missing from an
//! update disappears from the ladder. Levels are taken in received order
//! (best first) and never re-sorted; a level that would break the strict
//! ordering of its side is dropped instead.
//!
//! When no live depth arrives, [`OrderBookReconstructor::refresh_synthetic`]
//! fills the ladder from a generator anchored on the last best bid.

mod synthetic;

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;

pub use synthetic::generate_ladder;

use crate::domain::streaming::{DepthUpdate, Level};

/// Default number of levels kept per side.
pub const DEFAULT_DEPTH: usize = 15;

// =============================================================================
// Price Levels
// =============================================================================

/// One rung of a ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLevel {
    price: Decimal,
    size: Decimal,
    cumulative_size: Decimal,
}

impl PriceLevel {
    /// Level price.
    #[must_use]
    pub const fn price(&self) -> Decimal {
        self.price
    }

    /// Size resting at this price.
    #[must_use]
    pub const fn size(&self) -> Decimal {
        self.size
    }

    /// Sum of sizes from the best level up to and including this one.
    #[must_use]
    pub const fn cumulative_size(&self) -> Decimal {
        self.cumulative_size
    }
}

/// Book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Bids, best = highest price.
    Bid,
    /// Asks, best = lowest price.
    Ask,
}

impl Side {
    /// Whether `next` may follow `prev` on this side.
    fn follows(self, prev: Decimal, next: Decimal) -> bool {
        match self {
            Self::Bid => next < prev,
            Self::Ask => next > prev,
        }
    }
}

/// Build a ladder from at most `depth` levels of `levels`.
///
/// Zero sizes are kept. Levels with a non-positive price or a negative size,
/// and levels out of order with respect to the previous kept level, are
/// skipped. The side ends at the first level whose cumulative size would
/// overflow.
#[must_use]
pub fn build_side(side: Side, levels: &[Level], depth: usize) -> Vec<PriceLevel> {
    let mut ladder: Vec<PriceLevel> = Vec::with_capacity(depth.min(levels.len()));
    let mut cumulative = Decimal::ZERO;

    for &(price, size) in levels.iter().take(depth) {
        if price <= Decimal::ZERO || size.is_sign_negative() {
            continue;
        }
        if let Some(prev) = ladder.last()
            && !side.follows(prev.price, price)
        {
            tracing::trace!(?side, %price, prev = %prev.price, "Dropping out-of-order level");
            continue;
        }

        let Some(next) = cumulative.checked_add(size) else {
            tracing::warn!(?side, %price, %size, kept = ladder.len(), "Cumulative size overflow, truncating side");
            break;
        };
        cumulative = next;
        ladder.push(PriceLevel {
            price,
            size,
            cumulative_size: cumulative,
        });
    }

    ladder
}

// =============================================================================
// Snapshot
// =============================================================================

/// Where the current ladder came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LadderSource {
    /// A depth update from the feed.
    Live,
    /// The synthetic generator.
    Synthetic,
}

impl LadderSource {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Synthetic => "synthetic",
        }
    }
}

/// Immutable copy of a reconstructor's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBookSnapshot {
    /// Tracked symbol.
    pub symbol: String,
    /// Bid ladder, best first.
    pub bids: Vec<PriceLevel>,
    /// Ask ladder, best first.
    pub asks: Vec<PriceLevel>,
    /// Best ask minus best bid.
    pub spread: Decimal,
    /// Source of the last rebuild, if any.
    pub source: Option<LadderSource>,
    /// When the ladder was last rebuilt.
    pub updated_at: Option<DateTime<Utc>>,
}

impl OrderBookSnapshot {
    /// Best bid level.
    #[must_use]
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    /// Best ask level.
    #[must_use]
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }
}

// =============================================================================
// Reconstructor
// =============================================================================

/// Result of applying a depth update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Ladders rebuilt.
    Applied,
    /// Update was for another symbol.
    SymbolMismatch,
    /// Update is older than the last applied live update.
    Stale,
}

/// Ladder state for a single symbol.
#[derive(Debug, Clone)]
pub struct OrderBookReconstructor {
    symbol: String,
    depth: usize,
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
    spread: Decimal,
    anchor: Decimal,
    source: Option<LadderSource>,
    updated_at: Option<DateTime<Utc>>,
    last_live_event: Option<DateTime<Utc>>,
}

impl OrderBookReconstructor {
    /// Create an empty book for `symbol` keeping `depth` levels per side.
    ///
    /// `anchor` seeds the synthetic generator until a best bid is known.
    #[must_use]
    pub fn new(symbol: &str, depth: usize, anchor: Decimal) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            depth,
            bids: Vec::new(),
            asks: Vec::new(),
            spread: Decimal::ZERO,
            anchor,
            source: None,
            updated_at: None,
            last_live_event: None,
        }
    }

    /// Apply a live depth update.
    pub fn apply_update(&mut self, update: &DepthUpdate) -> ApplyOutcome {
        if !update.symbol.eq_ignore_ascii_case(&self.symbol) {
            return ApplyOutcome::SymbolMismatch;
        }
        if self
            .last_live_event
            .is_some_and(|last| update.event_time < last)
        {
            tracing::debug!(symbol = %self.symbol, event_time = %update.event_time, "Ignoring stale depth update");
            return ApplyOutcome::Stale;
        }

        self.rebuild(&update.bids, &update.asks, LadderSource::Live, update.event_time);
        self.last_live_event = Some(update.event_time);
        ApplyOutcome::Applied
    }

    /// Rebuild both ladders from the synthetic generator.
    pub fn refresh_synthetic<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let (bids, asks) = generate_ladder(self.anchor, self.depth, rng);
        self.rebuild(&bids, &asks, LadderSource::Synthetic, Utc::now());
    }

    fn rebuild(
        &mut self,
        bids: &[Level],
        asks: &[Level],
        source: LadderSource,
        at: DateTime<Utc>,
    ) {
        self.bids = build_side(Side::Bid, bids, self.depth);
        self.asks = build_side(Side::Ask, asks, self.depth);

        if let (Some(bid), Some(ask)) = (self.bids.first(), self.asks.first()) {
            self.spread = ask.price - bid.price;
            self.anchor = bid.price;
        }

        self.source = Some(source);
        self.updated_at = Some(at);
    }

    /// Tracked symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Best bid level.
    #[must_use]
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    /// Best ask level.
    #[must_use]
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    /// Best ask minus best bid, as of the last update with both sides present.
    #[must_use]
    pub const fn spread(&self) -> Decimal {
        self.spread
    }

    /// Bid ladder, best first.
    #[must_use]
    pub fn bids(&self) -> &[PriceLevel] {
        &self.bids
    }

    /// Ask ladder, best first.
    #[must_use]
    pub fn asks(&self) -> &[PriceLevel] {
        &self.asks
    }

    /// Owned copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> OrderBookSnapshot {
        OrderBookSnapshot {
            symbol: self.symbol.clone(),
            bids: self.bids.clone(),
            asks: self.asks.clone(),
            spread: self.spread,
            source: self.source,
            updated_at: self.updated_at,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
