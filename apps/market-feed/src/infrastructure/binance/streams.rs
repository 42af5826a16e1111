//! Stream declarations.
//!
//! The set of symbol/stream pairs is fixed at connection time and baked
//! into the connection URL as `{base}/{stream}/{stream}/...`.

use std::fmt;

/// Kind of market stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// `<symbol>@ticker`
    Ticker,
    /// `<symbol>@depth<levels>@<speed>ms`
    Depth {
        /// Levels per side (5, 10 or 20).
        levels: u16,
        /// Update speed in milliseconds (100 or 1000).
        speed_ms: u16,
    },
}

/// One symbol/stream pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    symbol: String,
    kind: StreamKind,
}

impl StreamSpec {
    /// Ticker stream for `symbol`.
    #[must_use]
    pub fn ticker(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_lowercase(),
            kind: StreamKind::Ticker,
        }
    }

    /// Depth stream for `symbol`.
    #[must_use]
    pub fn depth(symbol: &str, levels: u16, speed_ms: u16) -> Self {
        Self {
            symbol: symbol.to_lowercase(),
            kind: StreamKind::Depth { levels, speed_ms },
        }
    }

    /// Lower-case symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Stream kind.
    #[must_use]
    pub const fn kind(&self) -> StreamKind {
        self.kind
    }
}

impl fmt::Display for StreamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            StreamKind::Ticker => write!(f, "{}@ticker", self.symbol),
            StreamKind::Depth { levels, speed_ms } => {
                write!(f, "{}@depth{levels}@{speed_ms}ms", self.symbol)
            }
        }
    }
}

/// Symbols with a ticker stream in the default set.
pub const DEFAULT_TICKER_SYMBOLS: &[&str] = &[
    "btcusdt", "ethusdt", "solusdt", "adausdt", "dotusdt", "avaxusdt", "maticusdt", "linkusdt",
];

/// Symbols with a depth stream in the default set.
pub const DEFAULT_DEPTH_SYMBOLS: &[&str] = &["btcusdt", "ethusdt"];

/// Build the stream list from ticker and depth symbol sets.
#[must_use]
pub fn stream_set<S: AsRef<str>>(
    ticker_symbols: &[S],
    depth_symbols: &[S],
    depth_levels: u16,
    depth_speed_ms: u16,
) -> Vec<StreamSpec> {
    ticker_symbols
        .iter()
        .map(|s| StreamSpec::ticker(s.as_ref()))
        .chain(
            depth_symbols
                .iter()
                .map(|s| StreamSpec::depth(s.as_ref(), depth_levels, depth_speed_ms)),
        )
        .collect()
}

/// Default pre-declared stream list.
#[must_use]
pub fn default_streams() -> Vec<StreamSpec> {
    stream_set(DEFAULT_TICKER_SYMBOLS, DEFAULT_DEPTH_SYMBOLS, 20, 100)
}

/// Join `streams` onto `base_url`.
#[must_use]
pub fn stream_url(base_url: &str, streams: &[StreamSpec]) -> String {
    let path = streams
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("/");
    format!("{}/{path}", base_url.trim_end_matches('/'))
}
