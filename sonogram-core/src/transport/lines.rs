//! Newline-framed transport over any async byte stream.
//!
//! Used for the named-pipe variant of the protocol: each frame is one line
//! of UTF-8 JSON terminated by `\n`.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::debug;

use super::frame::FrameAssembler;
use super::{Channel, FrameSink, FrameSource};
use crate::error::{Result, SonogramError};

/// Upper bound on a single frame. Larger frames are reported, not cut.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Wrap a byte stream as a line-framed [`Channel`].
pub fn line_channel<S>(peer: impl Into<String>, stream: S) -> Channel
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read, write) = tokio::io::split(stream);
    Channel::new(
        peer,
        Box::new(LineSink { write }),
        Box::new(LineSource {
            read,
            assembler: FrameAssembler::default(),
        }),
    )
}

pub struct LineSink<S> {
    write: WriteHalf<S>,
}

#[async_trait]
impl<S> FrameSink for LineSink<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn send_frame(&mut self, text: String) -> Result<()> {
        // Raw line breaks in JSON text are only ever whitespace, so folding
        // them keeps pretty-printed frames on one line.
        let mut line = text.replace(['\r', '\n'], " ");
        line.push('\n');
        self.write
            .write_all(line.as_bytes())
            .await
            .map_err(|e| SonogramError::Send(e.to_string()))?;
        self.write
            .flush()
            .await
            .map_err(|e| SonogramError::Send(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.write
            .shutdown()
            .await
            .map_err(|e| SonogramError::Send(e.to_string()))
    }
}

pub struct LineSource<S> {
    read: ReadHalf<S>,
    assembler: FrameAssembler,
}

#[async_trait]
impl<S> FrameSource for LineSource<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            while let Some(frame) = self.assembler.next_frame() {
                if !frame.is_empty() {
                    return Ok(Some(frame));
                }
            }

            if self.assembler.pending() > MAX_FRAME_BYTES {
                return Err(SonogramError::Receive(format!(
                    "frame exceeds {MAX_FRAME_BYTES} bytes"
                )));
            }

            let n = self
                .read
                .read(self.assembler.spare())
                .await
                .map_err(|e| SonogramError::Receive(e.to_string()))?;

            if n == 0 {
                if self.assembler.pending() > 0 {
                    return Err(SonogramError::Receive("stream ended mid-frame".into()));
                }
                debug!("line transport reached end of stream");
                return Ok(None);
            }
            self.assembler.commit(n);
        }
    }
}
