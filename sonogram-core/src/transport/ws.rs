//! WebSocket transport.
//!
//! `tokio-tungstenite` based; one protocol message per text frame. The
//! WebSocket layer joins continuation frames into whole messages and answers
//! pings itself.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsFrame};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info};

use super::{Channel, FrameSink, FrameSource};
use crate::error::{Result, SonogramError};

/// Open a WebSocket connection to `url` (`ws://` or `wss://`).
///
/// Resolves once the opening handshake has completed. No retry is attempted.
pub async fn connect(url: &str) -> Result<Channel> {
    info!(%url, "opening websocket");

    let (stream, response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| SonogramError::Connect {
            endpoint: url.to_string(),
            reason: e.to_string(),
        })?;
    debug!(status = %response.status(), "websocket handshake complete");

    Ok(from_stream(url, stream))
}

/// Wrap an already-upgraded stream.
pub fn from_stream<S>(peer: &str, stream: WebSocketStream<S>) -> Channel
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (write, read) = stream.split();
    Channel::new(peer, Box::new(WsSink { write }), Box::new(WsSource { read }))
}

struct WsSink<S> {
    write: SplitSink<WebSocketStream<S>, WsFrame>,
}

#[async_trait]
impl<S> FrameSink for WsSink<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    async fn send_frame(&mut self, text: String) -> Result<()> {
        self.write
            .send(WsFrame::text(text))
            .await
            .map_err(|e| SonogramError::Send(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        match self.write.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(SonogramError::Send(e.to_string())),
        }
    }
}

struct WsSource<S> {
    read: SplitStream<WebSocketStream<S>>,
}

#[async_trait]
impl<S> FrameSource for WsSource<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        while let Some(frame) = self.read.next().await {
            match frame {
                Ok(WsFrame::Text(text)) => return Ok(Some(text.as_str().as_bytes().to_vec())),
                Ok(WsFrame::Binary(data)) => return Ok(Some(data.to_vec())),
                Ok(WsFrame::Close(reason)) => {
                    debug!(?reason, "websocket closed by peer");
                    return Ok(None);
                }
                Ok(_) => {} // ping/pong handled by tungstenite
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return Ok(None),
                Err(e) => return Err(SonogramError::Receive(e.to_string())),
            }
        }
        Ok(None)
    }
}
