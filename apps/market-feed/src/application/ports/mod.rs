//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `FeedTransport`: opens the upstream streaming connection and yields
//!   inbound frames until the connection ends.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

/// An inbound unit from the upstream connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text payload to be decoded.
    Text(String),
    /// A control frame (ping/pong) that only proves the link is alive.
    Heartbeat,
}

/// Transport-level failure. Never surfaced to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be opened.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The open connection failed.
    #[error("stream error: {0}")]
    Stream(String),

    /// The peer closed the connection.
    #[error("connection closed")]
    Closed,
}

/// Stream of inbound frames. Ends when the connection ends.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// Opens upstream streaming connections.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// Open a connection to `url`.
    ///
    /// Dropping the returned stream closes the connection.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectionFailed` if the connection cannot
    /// be established.
    async fn open(&self, url: &str) -> Result<FrameStream, TransportError>;
}
