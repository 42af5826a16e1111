//! Feed Configuration Settings
//!
//! Configuration types for the market feed, loaded from environment variables.
//!
//! Numeric values that fail to parse fall back to their defaults. Structural
//! problems (an empty stream list, a depth level the venue does not serve)
//! are reported as [`ConfigError`].

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::infrastructure::binance::streams::{
    DEFAULT_DEPTH_SYMBOLS, DEFAULT_TICKER_SYMBOLS, StreamSpec, stream_set, stream_url,
};

/// Default public market-stream endpoint.
pub const DEFAULT_BASE_URL: &str = "wss://stream.binance.com:9443/ws";

const SUPPORTED_DEPTH_LEVELS: [u16; 3] = [5, 10, 20];
const SUPPORTED_DEPTH_SPEEDS: [u16; 2] = [100, 1000];

/// Upstream stream selection.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Base WebSocket URL; stream names are appended as path segments.
    pub base_url: String,
    /// Symbols with a `@ticker` stream.
    pub ticker_symbols: Vec<String>,
    /// Symbols with a `@depth` stream.
    pub depth_symbols: Vec<String>,
    /// Levels per side requested from depth streams.
    pub depth_levels: u16,
    /// Depth stream update speed in milliseconds.
    pub depth_speed_ms: u16,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            ticker_symbols: to_owned_list(DEFAULT_TICKER_SYMBOLS),
            depth_symbols: to_owned_list(DEFAULT_DEPTH_SYMBOLS),
            depth_levels: 20,
            depth_speed_ms: 100,
        }
    }
}

impl StreamSettings {
    /// Declared streams, tickers first.
    #[must_use]
    pub fn streams(&self) -> Vec<StreamSpec> {
        stream_set(
            &self.ticker_symbols,
            &self.depth_symbols,
            self.depth_levels,
            self.depth_speed_ms,
        )
    }

    /// Full connection URL with every declared stream.
    #[must_use]
    pub fn url(&self) -> String {
        stream_url(&self.base_url, &self.streams())
    }
}

/// Reconnect backoff settings.
#[derive(Debug, Clone)]
pub struct ReconnectSettings {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay.
    pub max_delay: Duration,
    /// Growth factor per attempt (1.0 = fixed).
    pub multiplier: f64,
    /// Jitter fraction (0.0 = none).
    pub jitter_factor: f64,
    /// Attempt ceiling (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(5),
            multiplier: 1.0,
            jitter_factor: 0.0,
            max_attempts: 0, // Unlimited
        }
    }
}

/// Order-book tracking settings.
#[derive(Debug, Clone)]
pub struct OrderBookSettings {
    /// Tracked symbol.
    pub symbol: String,
    /// Levels kept per side.
    pub depth: usize,
    /// Synthetic refresh period.
    pub refresh_interval: Duration,
    /// Anchor price used until the first update arrives.
    pub base_price: Decimal,
    /// Skip synthetic refreshes while live updates are flowing.
    pub suppress_synthetic: bool,
}

impl Default for OrderBookSettings {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            depth: crate::domain::orderbook::DEFAULT_DEPTH,
            refresh_interval: Duration::from_secs(2),
            base_price: Decimal::new(6_723_456, 2),
            suppress_synthetic: true,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check and metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete feed configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Upstream stream selection.
    pub streams: StreamSettings,
    /// Reconnect backoff.
    pub reconnect: ReconnectSettings,
    /// A session with no inbound frame for this long is treated as closed.
    pub idle_timeout: Duration,
    /// Order-book tracking.
    pub orderbook: OrderBookSettings,
    /// Server ports.
    pub server: ServerSettings,
}

/// Default idle timeout.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            streams: StreamSettings::default(),
            reconnect: ReconnectSettings::default(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            orderbook: OrderBookSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl FeedConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a structural value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a structural value is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let stream_defaults = StreamSettings::default();
        let streams = StreamSettings {
            base_url: env
                .string("FEED_BASE_URL")
                .unwrap_or(stream_defaults.base_url),
            ticker_symbols: env
                .list("FEED_TICKER_SYMBOLS")
                .unwrap_or(stream_defaults.ticker_symbols),
            depth_symbols: env
                .list("FEED_DEPTH_SYMBOLS")
                .unwrap_or(stream_defaults.depth_symbols),
            depth_levels: env.parse("FEED_DEPTH_LEVELS", stream_defaults.depth_levels),
            depth_speed_ms: env.parse("FEED_DEPTH_SPEED_MS", stream_defaults.depth_speed_ms),
        };

        if streams.ticker_symbols.is_empty() && streams.depth_symbols.is_empty() {
            return Err(ConfigError::EmptyStreamList);
        }
        if !SUPPORTED_DEPTH_LEVELS.contains(&streams.depth_levels) {
            return Err(ConfigError::InvalidValue {
                key: "FEED_DEPTH_LEVELS".to_string(),
                value: streams.depth_levels.to_string(),
                reason: "expected one of 5, 10, 20",
            });
        }
        if !SUPPORTED_DEPTH_SPEEDS.contains(&streams.depth_speed_ms) {
            return Err(ConfigError::InvalidValue {
                key: "FEED_DEPTH_SPEED_MS".to_string(),
                value: streams.depth_speed_ms.to_string(),
                reason: "expected 100 or 1000",
            });
        }

        let reconnect_defaults = ReconnectSettings::default();
        let reconnect = ReconnectSettings {
            initial_delay: env.millis("FEED_RECONNECT_DELAY_MS", reconnect_defaults.initial_delay),
            max_delay: env.secs(
                "FEED_RECONNECT_DELAY_MAX_SECS",
                reconnect_defaults.max_delay,
            ),
            multiplier: env.parse("FEED_RECONNECT_MULTIPLIER", reconnect_defaults.multiplier),
            jitter_factor: env
                .parse("FEED_RECONNECT_JITTER", reconnect_defaults.jitter_factor)
                .clamp(0.0, 1.0),
            max_attempts: env.parse(
                "FEED_MAX_RECONNECT_ATTEMPTS",
                reconnect_defaults.max_attempts,
            ),
        };

        if reconnect.initial_delay.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "FEED_RECONNECT_DELAY_MS".to_string(),
                value: "0".to_string(),
                reason: "reconnect delay must be positive",
            });
        }

        let book_defaults = OrderBookSettings::default();
        let orderbook = OrderBookSettings {
            symbol: env
                .string("ORDERBOOK_SYMBOL")
                .map_or(book_defaults.symbol, |s| s.to_uppercase()),
            depth: env.parse("ORDERBOOK_DEPTH", book_defaults.depth),
            refresh_interval: env.millis("ORDERBOOK_REFRESH_MS", book_defaults.refresh_interval),
            base_price: env.parse("ORDERBOOK_BASE_PRICE", book_defaults.base_price),
            suppress_synthetic: env
                .string("ORDERBOOK_SUPPRESS_SYNTHETIC")
                .map_or(book_defaults.suppress_synthetic, |v| parse_bool(&v)),
        };

        if orderbook.depth == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ORDERBOOK_DEPTH".to_string(),
                value: "0".to_string(),
                reason: "depth must be positive",
            });
        }
        if orderbook.refresh_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "ORDERBOOK_REFRESH_MS".to_string(),
                value: "0".to_string(),
                reason: "refresh interval must be positive",
            });
        }

        let server = ServerSettings {
            health_port: env.parse(
                "MARKET_FEED_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        Ok(Self {
            streams,
            reconnect,
            idle_timeout: env.secs("FEED_IDLE_TIMEOUT_SECS", DEFAULT_IDLE_TIMEOUT),
            orderbook,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Neither ticker nor depth symbols were configured.
    #[error("no streams configured: set FEED_TICKER_SYMBOLS or FEED_DEPTH_SYMBOLS")]
    EmptyStreamList,
    /// Environment variable holds a value outside the accepted set.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
        /// What was expected.
        reason: &'static str,
    },
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn list(&self, key: &str) -> Option<Vec<String>> {
        (self.0)(key).map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_lowercase)
                .collect()
        })
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> T {
        self.string(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn to_owned_list(symbols: &[&str]) -> Vec<String> {
    symbols.iter().map(ToString::to_string).collect()
}
