//! Domain Layer - Core streaming types and business logic.
//!
//! This layer contains the core domain types for market data ingestion
//! with no I/O. Everything here is usable from a single thread or shared
//! behind an `Arc`.

/// Market data event types (tickers, depth updates).
pub mod streaming;

/// Channel registry and subscriber fan-out.
pub mod registry;

/// Order book ladder reconstruction.
pub mod orderbook;
