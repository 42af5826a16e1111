//! Binance Market Stream Adapter
//!
//! One multiplexed WebSocket carrying ticker and depth streams for a fixed
//! symbol set:
//!
//! - **messages**: wire types for `24hrTicker` and `depthUpdate` frames
//! - **codec**: routes frames on the `e` discriminant
//! - **streams**: stream names and the connection URL
//! - **reconnect**: backoff policy
//! - **connection**: connection lifecycle and dispatch
//! - **transport**: `tokio-tungstenite` implementation of the transport port

pub mod codec;
pub mod connection;
pub mod messages;
pub mod reconnect;
pub mod streams;
pub mod transport;

pub use codec::{CodecError, JsonCodec};
pub use connection::{ConnectionState, FeedConnection, FeedConnectionConfig, FeedStatus};
pub use messages::{DepthUpdateMessage, TickerMessage};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use streams::{StreamKind, StreamSpec, default_streams, stream_set, stream_url};
pub use transport::TungsteniteTransport;
