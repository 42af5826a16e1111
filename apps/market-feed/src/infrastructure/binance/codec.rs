//! Stream Codec Module
//!
//! Decodes Binance text frames into domain [`StreamEvent`]s.
//!
//! Frames are routed on the `e` discriminant:
//!
//! - `24hrTicker` → [`StreamEvent::Ticker`]
//! - `depthUpdate` → [`StreamEvent::Depth`]
//! - anything else (or no `e` at all, e.g. command acknowledgements) is
//!   not an error: decoding yields `None`.
//!
//! Frames from the combined-stream endpoint arrive wrapped as
//! `{"stream": "<name>", "data": {...}}`; the envelope is unwrapped first.

use serde_json::Value;

use super::messages::{DEPTH_EVENT, DepthUpdateMessage, TICKER_EVENT, TickerMessage};
use crate::domain::streaming::StreamEvent;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for Binance market streams.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame.
    ///
    /// Returns `Ok(None)` for frames with an unknown or missing discriminant.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object or a known event
    /// type has missing or malformed fields.
    pub fn decode(&self, text: &str) -> Result<Option<StreamEvent>, CodecError> {
        let value: Value = serde_json::from_str(text.trim())?;
        let payload = Self::unwrap_envelope(value);

        if !payload.is_object() {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}",
                preview(text)
            )));
        }

        let event = match payload.get("e").and_then(Value::as_str) {
            Some(TICKER_EVENT) => {
                let m: TickerMessage = serde_json::from_value(payload)?;
                StreamEvent::Ticker(m.into())
            }
            Some(DEPTH_EVENT) => {
                let m: DepthUpdateMessage = serde_json::from_value(payload)?;
                StreamEvent::Depth(m.into())
            }
            other => {
                tracing::trace!(event_type = ?other, "Ignoring unhandled message type");
                return Ok(None);
            }
        };

        Ok(Some(event))
    }

    fn unwrap_envelope(value: Value) -> Value {
        match value {
            Value::Object(mut map) if map.contains_key("stream") && map.contains_key("data") => {
                map.remove("data").unwrap_or(Value::Null)
            }
            other => other,
        }
    }
}

fn preview(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(50)
        .map_or(text.len(), |(idx, _)| idx);
    &text[..end]
}
