//! Configuration Module
//!
//! Typed settings for the feed, order-book tracking and operational server.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_BASE_URL, DEFAULT_IDLE_TIMEOUT, FeedConfig, OrderBookSettings,
    ReconnectSettings, ServerSettings, StreamSettings,
};
