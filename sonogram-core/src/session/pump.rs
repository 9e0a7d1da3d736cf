//! Background tasks that move frames between the session loop and a channel.
//!
//! The writer owns the `FrameSink` and sends queued messages strictly in
//! enqueue order, one frame at a time. The reader owns the `FrameSource` and
//! forwards decoded messages; it stops after the first transport error or at
//! end of stream.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{Result, SonogramError};
use crate::protocol::{self, Format, Message};
use crate::transport::{FrameSink, FrameSource};

/// Sending half of the outbound queue.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    tx: mpsc::Sender<Message>,
}

impl OutboundQueue {
    /// Enqueue `message`, waiting if the queue is full.
    ///
    /// # Errors
    /// `SonogramError::Send` once the writer task has stopped.
    pub async fn push(&self, message: Message) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|e| SonogramError::Send(format!("writer stopped; `{}` dropped", e.0.action())))
    }
}

/// Spawn the writer task.
///
/// The task finishes with the number of messages sent once every
/// `OutboundQueue` clone is dropped and the queue is drained, closing the sink
/// on the way out. It finishes early with the error if a send fails.
pub fn spawn_writer(
    sink: Box<dyn FrameSink>,
    format: Format,
    capacity: usize,
) -> (OutboundQueue, JoinHandle<Result<u64>>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = tokio::spawn(write_loop(sink, rx, format));
    (OutboundQueue { tx }, handle)
}

async fn write_loop(
    mut sink: Box<dyn FrameSink>,
    mut rx: mpsc::Receiver<Message>,
    format: Format,
) -> Result<u64> {
    let mut sent = 0u64;
    while let Some(message) = rx.recv().await {
        let frame = protocol::encode(&message, format)?;
        debug!(action = message.action(), "sending {frame}");
        sink.send_frame(frame).await?;
        sent += 1;
    }
    sink.close().await?;
    debug!(sent, "outbound queue drained");
    Ok(sent)
}

/// Spawn the reader task. The receiver yields `None` after the peer ends the
/// stream or after a transport error has been delivered.
pub fn spawn_reader(
    source: Box<dyn FrameSource>,
    capacity: usize,
) -> (mpsc::Receiver<Result<Message>>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = tokio::spawn(read_loop(source, tx));
    (rx, handle)
}

async fn read_loop(mut source: Box<dyn FrameSource>, tx: mpsc::Sender<Result<Message>>) {
    loop {
        let item = match source.next_frame().await {
            Ok(Some(frame)) => {
                trace!(bytes = frame.len(), "inbound frame");
                protocol::decode(&frame)
            }
            Ok(None) => {
                debug!("peer ended the inbound stream");
                return;
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        };
        if tx.send(item).await.is_err() {
            return;
        }
    }
}
