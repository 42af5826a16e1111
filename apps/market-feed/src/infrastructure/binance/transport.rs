//! WebSocket transport backed by `tokio-tungstenite`.
//!
//! Pings are answered inline and surface as [`Frame::Heartbeat`]. A close
//! frame or the end of the socket ends the frame stream; a protocol error is
//! yielded once and then the stream ends.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use crate::application::ports::{FeedTransport, Frame, FrameStream, TransportError};

/// Production [`FeedTransport`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteTransport;

impl TungsteniteTransport {
    /// Create a transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FeedTransport for TungsteniteTransport {
    async fn open(&self, url: &str) -> Result<FrameStream, TransportError> {
        let (ws_stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        tracing::debug!(status = %response.status(), "WebSocket handshake complete");

        let (write, read) = ws_stream.split();

        let frames = futures_util::stream::unfold(Some((write, read)), |state| async move {
            let (mut write, mut read) = state?;

            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        return Some((Ok(Frame::Text(text.as_str().to_owned())), Some((write, read))));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            return Some((Err(TransportError::Stream(e.to_string())), None));
                        }
                        return Some((Ok(Frame::Heartbeat), Some((write, read))));
                    }
                    Some(Ok(Message::Pong(_))) => {
                        return Some((Ok(Frame::Heartbeat), Some((write, read))));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(frame = ?frame, "Server sent close frame");
                        return None;
                    }
                    Some(Ok(Message::Binary(_) | Message::Frame(_))) => {
                        // Market streams are text-only
                    }
                    Some(Err(e)) => {
                        return Some((Err(TransportError::Stream(e.to_string())), None));
                    }
                    None => return None,
                }
            }
        });

        Ok(Box::pin(frames))
    }
}
