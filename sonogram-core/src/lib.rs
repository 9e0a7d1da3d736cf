//! # sonogram-core
//!
//! Recognizer-side client for the Sonogram voice-coding protocol.
//!
//! ## Architecture
//!
//! ```text
//! RecognitionEngine (own thread) ─► ResultSink ─► Session loop ─► RecognitionMessage
//!            ▲                                        │                 │
//!   RecognitionAdapter ◄── grammar / mode switches ───┘          writer task
//!                                                                       │
//!                     server ◄──────────── Channel (WebSocket | line pipe)
//! ```
//!
//! The server sends a command grammar once on request; every recognized
//! utterance goes back as its semantic payload. Switching between command
//! and dictation mode happens entirely on this side.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod error;
pub mod protocol;
pub mod recognition;
pub mod session;
pub mod transport;

// Convenience re-exports for downstream crates
pub use error::{Result, SonogramError};
pub use protocol::{Format, Message, SemanticValue};
pub use recognition::{
    CommandGrammar, EngineHandle, RecognitionEngine, RecognitionResult, ResultSink, TextEngine,
};
pub use session::{
    Mode, Session, SessionConfig, SessionState, SessionStatusEvent, UtteranceSource,
};
pub use transport::{Endpoint, RetryPolicy};
