//! Message-framed, full-duplex connection to the Sonogram server.
//!
//! A [`Channel`] is a [`FrameSink`] plus a [`FrameSource`]. Each frame is one
//! complete protocol message; implementations are responsible for
//! reassembling messages that arrive in pieces.
//!
//! | Endpoint | Implementation |
//! |----------|----------------|
//! | `ws://host:port/`, `wss://...` | [`ws`] (tokio-tungstenite) |
//! | pipe path | [`pipe`] over [`lines`] |

pub mod frame;
pub mod lines;
pub mod pipe;
pub mod ws;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{Result, SonogramError};

/// Outbound half of a channel.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one complete text frame.
    ///
    /// # Errors
    /// `SonogramError::Send` on any transport failure; nothing is dropped silently.
    async fn send_frame(&mut self, text: String) -> Result<()>;

    /// Flush and close the outbound direction.
    async fn close(&mut self) -> Result<()>;
}

/// Inbound half of a channel.
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next complete frame. `Ok(None)` once the peer has closed.
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>>;
}

/// A connected, framed, bidirectional link.
pub struct Channel {
    peer: String,
    sink: Box<dyn FrameSink>,
    source: Box<dyn FrameSource>,
}

impl Channel {
    pub fn new(
        peer: impl Into<String>,
        sink: Box<dyn FrameSink>,
        source: Box<dyn FrameSource>,
    ) -> Self {
        Self {
            peer: peer.into(),
            sink,
            source,
        }
    }

    /// Human-readable address of the other end.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub async fn send(&mut self, text: String) -> Result<()> {
        self.sink.send_frame(text).await
    }

    /// Receive one whole message, waiting at most `timeout` when given.
    ///
    /// # Errors
    /// - `ReceiveTimeout` when the deadline passes first.
    /// - `ChannelClosed` when the peer has closed the connection.
    /// - `Receive` on transport failure.
    pub async fn receive_message(&mut self, timeout: Option<Duration>) -> Result<Vec<u8>> {
        let next = self.source.next_frame();
        let frame = match timeout {
            Some(limit) => tokio::time::timeout(limit, next)
                .await
                .map_err(|_| SonogramError::ReceiveTimeout(limit))?,
            None => next.await,
        };
        frame?.ok_or(SonogramError::ChannelClosed)
    }

    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await
    }

    /// Separate the halves so reading and writing can proceed concurrently.
    pub fn split(self) -> (Box<dyn FrameSink>, Box<dyn FrameSource>) {
        (self.sink, self.source)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// Where the server lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Full `ws://` or `wss://` URL.
    WebSocket(String),
    /// Unix socket or Windows named pipe path.
    Pipe(PathBuf),
}

impl Endpoint {
    /// `ws(s)://<host>:<port>/`.
    pub fn websocket(host: &str, port: u16, tls: bool) -> Self {
        let scheme = if tls { "wss" } else { "ws" };
        Endpoint::WebSocket(format!("{scheme}://{host}:{port}/"))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::WebSocket(url) => f.write_str(url),
            Endpoint::Pipe(path) => write!(f, "pipe:{}", path.display()),
        }
    }
}

/// Open a channel to `endpoint`. A single attempt.
pub async fn connect(endpoint: &Endpoint) -> Result<Channel> {
    match endpoint {
        Endpoint::WebSocket(url) => ws::connect(url).await,
        Endpoint::Pipe(path) => pipe::connect(path).await,
    }
}

/// Bounded reconnect schedule for the initial connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total connection attempts, including the first. Minimum 1.
    pub max_attempts: u32,
    /// Delay after the first failure; doubles after each further failure.
    pub initial_backoff: Duration,
    /// Ceiling for the doubled delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    /// One attempt, no retry.
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Delay before attempt `failed + 1`, after `failed` failures (1-based).
    pub fn backoff(&self, failed: u32) -> Duration {
        let exponent = failed.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_backoff)
    }
}

/// [`connect`] with retries per `policy`. Returns the last error when every
/// attempt fails.
pub async fn connect_with_retry(endpoint: &Endpoint, policy: &RetryPolicy) -> Result<Channel> {
    let attempts = policy.max_attempts.max(1);
    let mut failed = 0;
    loop {
        match connect(endpoint).await {
            Ok(channel) => {
                info!(peer = channel.peer(), attempt = failed + 1, "connected");
                return Ok(channel);
            }
            Err(e) => {
                failed += 1;
                if failed >= attempts {
                    return Err(e);
                }
                let delay = policy.backoff(failed);
                warn!("connect attempt {failed}/{attempts} failed ({e}); retrying in {delay:?}");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
