//! Reassembly of delimiter-terminated frames from arbitrary read boundaries.
//!
//! ```text
//! read() ──► spare() ──► commit(n) ──► next_frame() ──► Some(frame) | None
//!               ▲                                            │
//!               └──── buffer doubled when full ◄─────────────┘
//! ```
//!
//! Bytes are appended into a growable buffer; a frame is released only once
//! its terminating delimiter has arrived. The buffer doubles whenever it is
//! full, so a frame is never cut short regardless of its size.

/// Starting buffer size. Grammar frames are typically a few KiB.
pub const INITIAL_CAPACITY: usize = 1024;

/// Newline, the frame terminator of the line transport.
pub const LINE_DELIMITER: u8 = b'\n';

pub struct FrameAssembler {
    buf: Vec<u8>,
    /// Bytes of `buf` holding received data.
    filled: usize,
    /// Prefix of `buf[..filled]` already searched for the delimiter.
    scanned: usize,
    delimiter: u8,
}

impl FrameAssembler {
    pub fn new(delimiter: u8) -> Self {
        Self {
            buf: vec![0; INITIAL_CAPACITY],
            filled: 0,
            scanned: 0,
            delimiter,
        }
    }

    /// Writable tail of the buffer. Doubles the buffer first if it is full,
    /// so the returned slice is never empty.
    pub fn spare(&mut self) -> &mut [u8] {
        if self.filled == self.buf.len() {
            let doubled = self.buf.len() * 2;
            self.buf.resize(doubled, 0);
        }
        &mut self.buf[self.filled..]
    }

    /// Mark `n` bytes of the last [`spare`](Self::spare) slice as received.
    pub fn commit(&mut self, n: usize) {
        self.filled = (self.filled + n).min(self.buf.len());
    }

    /// Copy `bytes` in, growing as needed.
    pub fn push(&mut self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            let spare = self.spare();
            let n = spare.len().min(bytes.len());
            spare[..n].copy_from_slice(&bytes[..n]);
            self.commit(n);
            bytes = &bytes[n..];
        }
    }

    /// Pop the next complete frame, without its delimiter (and without a
    /// trailing `\r`, so CRLF peers work too).
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let offset = self.buf[self.scanned..self.filled]
            .iter()
            .position(|b| *b == self.delimiter);

        let Some(offset) = offset else {
            self.scanned = self.filled;
            return None;
        };

        let end = self.scanned + offset;
        let mut frame = self.buf[..end].to_vec();
        if frame.last() == Some(&b'\r') {
            frame.pop();
        }

        self.buf.copy_within(end + 1..self.filled, 0);
        self.filled -= end + 1;
        self.scanned = 0;
        Some(frame)
    }

    /// Bytes received but not yet released as a frame.
    pub fn pending(&self) -> usize {
        self.filled
    }

    /// Current buffer size.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(LINE_DELIMITER)
    }
}
