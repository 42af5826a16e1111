//! Binance WebSocket Message Types
//!
//! Wire format types for deserializing frames from Binance's public market
//! streams. Every market frame is a JSON object whose `e` field names the
//! event type; prices and quantities are decimal strings and times are epoch
//! milliseconds.
//!
//! # Message Types
//!
//! - `24hrTicker`: rolling 24h statistics for a symbol
//! - `depthUpdate`: bid/ask levels for a symbol
//!
//! # References
//!
//! - [WebSocket Market Streams](https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::streaming::{DepthUpdate, Level, TickerUpdate};

/// Discriminant value of ticker frames.
pub const TICKER_EVENT: &str = "24hrTicker";

/// Discriminant value of depth frames.
pub const DEPTH_EVENT: &str = "depthUpdate";

/// 24h rolling window ticker.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "e": "24hrTicker", "E": 1672515782136, "s": "BTCUSDT",
///   "p": "0.0015", "P": "250.00", "c": "0.0025",
///   "h": "0.0025", "l": "0.0010", "v": "10000"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerMessage {
    /// Event type (always `24hrTicker`)
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time
    #[serde(rename = "E", with = "chrono::serde::ts_milliseconds")]
    pub event_time: DateTime<Utc>,

    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// Price change
    #[serde(rename = "p")]
    pub price_change: Decimal,

    /// Price change percent
    #[serde(rename = "P")]
    pub price_change_percent: Decimal,

    /// Last price
    #[serde(rename = "c")]
    pub last_price: Decimal,

    /// High price
    #[serde(rename = "h")]
    pub high_price: Decimal,

    /// Low price
    #[serde(rename = "l")]
    pub low_price: Decimal,

    /// Total traded base asset volume
    #[serde(rename = "v")]
    pub volume: Decimal,
}

impl From<TickerMessage> for TickerUpdate {
    fn from(msg: TickerMessage) -> Self {
        Self {
            symbol: msg.symbol,
            last_price: msg.last_price,
            price_change: msg.price_change,
            change_percent: msg.price_change_percent,
            volume: msg.volume,
            high: msg.high_price,
            low: msg.low_price,
            event_time: msg.event_time,
        }
    }
}

/// Depth update.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "e": "depthUpdate", "E": 1672515782136, "s": "BNBBTC",
///   "U": 157, "u": 160,
///   "b": [["0.0024", "10"]],
///   "a": [["0.0026", "100"]]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthUpdateMessage {
    /// Event type (always `depthUpdate`)
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time
    #[serde(rename = "E", with = "chrono::serde::ts_milliseconds")]
    pub event_time: DateTime<Utc>,

    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// First update ID in event
    #[serde(rename = "U", default, skip_serializing_if = "Option::is_none")]
    pub first_update_id: Option<u64>,

    /// Final update ID in event
    #[serde(rename = "u", default, skip_serializing_if = "Option::is_none")]
    pub final_update_id: Option<u64>,

    /// Bids as `[price, quantity]`, best first
    #[serde(rename = "b", default)]
    pub bids: Vec<Level>,

    /// Asks as `[price, quantity]`, best first
    #[serde(rename = "a", default)]
    pub asks: Vec<Level>,
}

impl From<DepthUpdateMessage> for DepthUpdate {
    fn from(msg: DepthUpdateMessage) -> Self {
        Self {
            symbol: msg.symbol,
            bids: msg.bids,
            asks: msg.asks,
            event_time: msg.event_time,
        }
    }
}
