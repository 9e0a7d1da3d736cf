use std::time::Duration;

use thiserror::Error;

/// All errors produced by sonogram-core.
#[derive(Debug, Error)]
pub enum SonogramError {
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("no message received within {0:?}")]
    ReceiveTimeout(Duration),

    #[error("connection closed by peer")]
    ChannelClosed,

    #[error("malformed message: {0}")]
    Decode(String),

    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error("unexpected `{actual}` message while waiting for `{expected}`")]
    UnexpectedMessage {
        expected: &'static str,
        actual: String,
    },

    #[error("grammar load failed: {0}")]
    GrammarLoad(String),

    #[error("engine cannot stream live audio")]
    StreamingUnsupported,

    #[error("recognition engine error: {0}")]
    Engine(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SonogramError {
    /// Whether the session can keep running after this error.
    ///
    /// Only inbound decode failures and grammar reload failures are
    /// recoverable once the session is ready; everything else ends it.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SonogramError::Decode(_) | SonogramError::GrammarLoad(_))
    }
}

pub type Result<T> = std::result::Result<T, SonogramError>;
