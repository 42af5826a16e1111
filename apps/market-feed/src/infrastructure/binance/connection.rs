//! Feed Connection
//!
//! Owns the single multiplexed upstream connection, decodes inbound frames
//! and routes the resulting events through the [`ChannelRegistry`].
//!
//! # Design
//!
//! - `connect()` and `disconnect()` never block: opening and reading happen
//!   on a spawned session task, and teardown is a token cancellation.
//! - Each `connect()` starts a new session generation. Completions and
//!   frames from a superseded session are ignored, so `disconnect()`
//!   followed by `connect()` behaves exactly like the first call.
//! - At most one reconnect timer is pending at any time. A successful open
//!   or `disconnect()` cancels it.
//! - Mutable state lives behind a `parking_lot::Mutex` that is never held
//!   across an `.await`.
//!
//! # State machine
//!
//! ```text
//! Disconnected --connect()--> Connecting --open ok--> Connected
//!      ^                          |                      |
//!      |                      open failed          close / error / idle
//!      +--------------------------+----------------------+
//!                (reconnect timer armed unless disconnect() was called)
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::codec::JsonCodec;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{FeedTransport, Frame, FrameStream, TransportError};
use crate::domain::registry::ChannelRegistry;
use crate::infrastructure::config::{DEFAULT_IDLE_TIMEOUT, FeedConfig};
use crate::infrastructure::metrics;

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of the upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection and no open in progress.
    #[default]
    Disconnected,
    /// An open is in progress.
    Connecting,
    /// Frames are flowing.
    Connected,
}

impl ConnectionState {
    /// Lower-case state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for [`FeedConnection`].
#[derive(Debug, Clone)]
pub struct FeedConnectionConfig {
    /// Full stream URL, including every declared stream.
    pub url: String,
    /// Reconnect backoff.
    pub reconnect: ReconnectConfig,
    /// A session with no inbound frame for this long is treated as closed.
    pub idle_timeout: Duration,
}

impl FeedConnectionConfig {
    /// Configuration with default backoff and idle timeout.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl From<&FeedConfig> for FeedConnectionConfig {
    fn from(config: &FeedConfig) -> Self {
        Self {
            url: config.streams.url(),
            reconnect: ReconnectConfig::from(&config.reconnect),
            idle_timeout: config.idle_timeout,
        }
    }
}

// =============================================================================
// Status
// =============================================================================

/// Point-in-time view of the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedStatus {
    /// Current state.
    pub state: ConnectionState,
    /// Text frames received across all sessions.
    pub frames_received: u64,
    /// Frames dropped because they could not be decoded.
    pub decode_errors: u64,
    /// Successful opens across all sessions.
    pub connections_opened: u64,
    /// Reconnects scheduled across all sessions.
    pub reconnect_attempts: u64,
    /// When the current or most recent session opened.
    pub last_connected_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Counters {
    frames_received: AtomicU64,
    decode_errors: AtomicU64,
    connections_opened: AtomicU64,
    reconnect_attempts: AtomicU64,
}

// =============================================================================
// Feed Connection
// =============================================================================

#[derive(Debug)]
struct Inner {
    state: ConnectionState,
    generation: u64,
    session: Option<CancellationToken>,
    reconnect_timer: Option<CancellationToken>,
    policy: ReconnectPolicy,
    last_connected_at: Option<DateTime<Utc>>,
}

impl Inner {
    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "Connection state changed");
            self.state = state;
            metrics::set_connection_state(state);
        }
    }
}

enum SessionEnd {
    Cancelled,
    Closed,
    IdleTimeout,
    Failed(TransportError),
}

/// The single upstream connection.
///
/// Construct once at startup, share as `Arc<FeedConnection>` and shut down
/// with [`disconnect`](Self::disconnect).
pub struct FeedConnection {
    config: FeedConnectionConfig,
    registry: Arc<ChannelRegistry>,
    transport: Arc<dyn FeedTransport>,
    codec: JsonCodec,
    counters: Counters,
    inner: Mutex<Inner>,
}

impl fmt::Debug for FeedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedConnection")
            .field("url", &self.config.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl FeedConnection {
    /// Create a disconnected connection.
    #[must_use]
    pub fn new(
        config: FeedConnectionConfig,
        registry: Arc<ChannelRegistry>,
        transport: Arc<dyn FeedTransport>,
    ) -> Self {
        let policy = ReconnectPolicy::new(config.reconnect.clone());
        Self {
            config,
            registry,
            transport,
            codec: JsonCodec::new(),
            counters: Counters::default(),
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                generation: 0,
                session: None,
                reconnect_timer: None,
                policy,
                last_connected_at: None,
            }),
        }
    }

    /// Open the connection if it is not already open or opening.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(self: &Arc<Self>) {
        let (generation, cancel) = {
            let mut inner = self.inner.lock();
            if inner.state != ConnectionState::Disconnected {
                tracing::debug!(state = %inner.state, "Connect ignored");
                return;
            }

            inner.generation += 1;
            let cancel = CancellationToken::new();
            inner.session = Some(cancel.clone());
            inner.set_state(ConnectionState::Connecting);
            (inner.generation, cancel)
        };

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_session(generation, cancel).await });
    }

    /// Close the connection, cancel any pending reconnect and clear every
    /// subscription. A later [`connect`](Self::connect) starts fresh.
    pub fn disconnect(&self) {
        {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.policy.reset();
            inner.set_state(ConnectionState::Disconnected);
            if let Some(timer) = inner.reconnect_timer.take() {
                timer.cancel();
            }
            if let Some(session) = inner.session.take() {
                session.cancel();
            }
        }
        self.registry.clear();

        tracing::info!("Feed disconnected");
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Whether a reconnect is waiting on its timer.
    #[must_use]
    pub fn reconnect_pending(&self) -> bool {
        self.inner.lock().reconnect_timer.is_some()
    }

    /// Point-in-time status.
    #[must_use]
    pub fn status(&self) -> FeedStatus {
        let (state, last_connected_at) = {
            let inner = self.inner.lock();
            (inner.state, inner.last_connected_at)
        };

        FeedStatus {
            state,
            frames_received: self.counters.frames_received.load(Ordering::Relaxed),
            decode_errors: self.counters.decode_errors.load(Ordering::Relaxed),
            connections_opened: self.counters.connections_opened.load(Ordering::Relaxed),
            reconnect_attempts: self.counters.reconnect_attempts.load(Ordering::Relaxed),
            last_connected_at,
        }
    }

    /// The registry events are dispatched through.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// The stream URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.config.url
    }

    // =========================================================================
    // Session
    // =========================================================================

    async fn run_session(self: Arc<Self>, generation: u64, cancel: CancellationToken) {
        tracing::info!(url = %self.config.url, generation, "Connecting to market stream");

        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            result = self.transport.open(&self.config.url) => result,
        };

        let mut frames = match opened {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(error = %e, generation, "Failed to open market stream");
                self.on_session_end(generation);
                return;
            }
        };

        if !self.on_open(generation) {
            return;
        }

        match self.pump(&mut frames, &cancel).await {
            SessionEnd::Cancelled => {
                tracing::debug!(generation, "Session cancelled");
            }
            SessionEnd::Closed => {
                tracing::info!(generation, "Market stream closed");
                self.on_session_end(generation);
            }
            SessionEnd::IdleTimeout => {
                tracing::warn!(
                    generation,
                    idle_secs = self.config.idle_timeout.as_secs(),
                    "No frames within idle timeout"
                );
                self.on_session_end(generation);
            }
            SessionEnd::Failed(e) => {
                tracing::warn!(error = %e, generation, "Market stream error");
                self.on_session_end(generation);
            }
        }
    }

    async fn pump(&self, frames: &mut FrameStream, cancel: &CancellationToken) -> SessionEnd {
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return SessionEnd::Cancelled,
                next = self.next_frame(frames) => next,
            };

            match next {
                None => return SessionEnd::IdleTimeout,
                Some(None | Some(Err(TransportError::Closed))) => return SessionEnd::Closed,
                Some(Some(Err(e))) => return SessionEnd::Failed(e),
                Some(Some(Ok(Frame::Heartbeat))) => {}
                Some(Some(Ok(Frame::Text(text)))) => {
                    if cancel.is_cancelled() {
                        return SessionEnd::Cancelled;
                    }
                    self.handle_text(&text);
                }
            }
        }
    }

    /// `None` when the idle timeout elapses first. A zero timeout disables
    /// the watchdog.
    async fn next_frame(
        &self,
        frames: &mut FrameStream,
    ) -> Option<Option<Result<Frame, TransportError>>> {
        if self.config.idle_timeout.is_zero() {
            return Some(frames.next().await);
        }
        tokio::time::timeout(self.config.idle_timeout, frames.next())
            .await
            .ok()
    }

    fn handle_text(&self, text: &str) {
        self.counters.frames_received.fetch_add(1, Ordering::Relaxed);
        metrics::record_frame_received();

        match self.codec.decode(text) {
            Ok(Some(event)) => {
                let channel = event.channel();
                let report = self.registry.dispatch(channel, &event);
                metrics::record_dispatch(channel, report.delivered, report.failed);
            }
            Ok(None) => {}
            Err(e) => {
                self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                metrics::record_decode_error();
                tracing::warn!(error = %e, "Dropping malformed frame");
            }
        }
    }

    /// Returns `false` if the session was superseded while opening.
    fn on_open(&self, generation: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.state != ConnectionState::Connecting {
            return false;
        }

        inner.set_state(ConnectionState::Connected);
        inner.policy.reset();
        inner.last_connected_at = Some(Utc::now());
        if let Some(timer) = inner.reconnect_timer.take() {
            timer.cancel();
        }
        drop(inner);

        self.counters
            .connections_opened
            .fetch_add(1, Ordering::Relaxed);
        tracing::info!(generation, "Market stream connected");
        true
    }

    fn on_session_end(self: &Arc<Self>, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }

        inner.session = None;
        inner.set_state(ConnectionState::Disconnected);
        self.schedule_reconnect(&mut inner);
    }

    fn schedule_reconnect(self: &Arc<Self>, inner: &mut Inner) {
        if inner.reconnect_timer.is_some() {
            tracing::debug!("Reconnect already pending");
            return;
        }

        let Some(delay) = inner.policy.next_delay() else {
            tracing::error!(
                attempts = inner.policy.attempt_count(),
                "Reconnect attempts exhausted, staying disconnected"
            );
            return;
        };

        let attempt = inner.policy.attempt_count();
        self.counters
            .reconnect_attempts
            .fetch_add(1, Ordering::Relaxed);
        metrics::record_reconnect();
        tracing::info!(attempt, delay_ms = delay.as_millis(), "Scheduling reconnect");

        let timer = CancellationToken::new();
        inner.reconnect_timer = Some(timer.clone());

        let this = Arc::clone(self);
        tokio::spawn(async move { this.reconnect_after(delay, timer).await });
    }

    async fn reconnect_after(self: Arc<Self>, delay: Duration, timer: CancellationToken) {
        tokio::select! {
            () = timer.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }

        {
            let mut inner = self.inner.lock();
            // Cancellation always happens under this lock, so an uncancelled
            // token still owns the slot.
            if timer.is_cancelled() {
                return;
            }
            inner.reconnect_timer = None;
        }

        self.connect();
    }
}
