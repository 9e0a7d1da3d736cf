//! Speech recognition engine abstraction.
//!
//! The `RecognitionEngine` trait decouples the session from any specific
//! recognizer (OS speech API, the bundled [`TextEngine`], scripted test
//! doubles). The session only ever talks to it through
//! [`RecognitionAdapter`], which enforces the one-active-grammar rule and
//! restores the previous grammar when a load fails.
//!
//! `&mut self` on every method expresses that engines are stateful (loaded
//! grammars, stream handles). All calls are serialised through
//! `EngineHandle`'s `parking_lot::Mutex`.

pub mod adapter;
pub mod jsgf;
pub mod text;

pub use adapter::RecognitionAdapter;
pub use text::TextEngine;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::SemanticValue;

/// One recognized utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    /// Recognized text, words separated by single spaces.
    pub text: String,
    /// Structured meaning attached by the grammar.
    pub semantics: SemanticValue,
}

/// A command grammar received from the server.
///
/// Shared as `Arc<CommandGrammar>`; switching modes reloads the same `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandGrammar {
    /// Language id the grammar was requested for.
    pub lang: String,
    /// Grammar definition text in the engine's markup (JSGF for `TextEngine`).
    pub text: String,
}

impl CommandGrammar {
    pub fn new(lang: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            lang: lang.into(),
            text: text.into(),
        }
    }
}

/// Which grammar an engine currently has loaded.
#[derive(Debug, Clone, Default)]
pub enum ActiveGrammar {
    #[default]
    None,
    Command(Arc<CommandGrammar>),
    /// Unconstrained free-text recognition.
    Dictation,
}

impl ActiveGrammar {
    /// Identity comparison: command grammars match only if they are the same `Arc`.
    pub fn is_same(&self, other: &ActiveGrammar) -> bool {
        match (self, other) {
            (ActiveGrammar::None, ActiveGrammar::None) => true,
            (ActiveGrammar::Dictation, ActiveGrammar::Dictation) => true,
            (ActiveGrammar::Command(a), ActiveGrammar::Command(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Delivery point for results produced on an engine's own thread.
///
/// Results from every producer funnel into one queue, so the session sees
/// them one at a time in arrival order.
#[derive(Clone)]
pub struct ResultSink(mpsc::UnboundedSender<RecognitionResult>);

impl ResultSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RecognitionResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }

    /// Hand a result to the session. `false` once the session has gone away.
    pub fn deliver(&self, result: RecognitionResult) -> bool {
        self.0.send(result).is_ok()
    }
}

impl fmt::Debug for ResultSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSink").finish_non_exhaustive()
    }
}

/// Contract for speech recognition backends.
pub trait RecognitionEngine: Send + 'static {
    /// Drop every loaded grammar.
    fn unload_all(&mut self);

    /// Compile `grammar` and make it the active grammar.
    ///
    /// # Errors
    /// `SonogramError::GrammarLoad` if the grammar text is malformed.
    fn load_grammar(&mut self, grammar: &CommandGrammar) -> Result<()>;

    /// Switch to unconstrained dictation.
    fn load_dictation_grammar(&mut self) -> Result<()>;

    /// Whether `start_streaming` can succeed.
    fn supports_streaming(&self) -> bool {
        true
    }

    /// Begin continuous recognition from live audio on the engine's own
    /// thread, delivering every utterance to `sink` until stopped.
    ///
    /// # Errors
    /// `SonogramError::StreamingUnsupported` for engines without live audio.
    fn start_streaming(&mut self, sink: ResultSink) -> Result<()>;

    /// Stop continuous recognition. No-op when not streaming.
    fn stop_streaming(&mut self);

    /// Recognize a textual utterance against the active grammar.
    ///
    /// Returns `Ok(None)` when the utterance is rejected by the grammar.
    fn recognize_once(&mut self, input: &str) -> Result<Option<RecognitionResult>>;
}

/// Thread-safe reference-counted handle to any `RecognitionEngine` implementor.
#[derive(Clone)]
pub struct EngineHandle(pub Arc<Mutex<dyn RecognitionEngine>>);

impl EngineHandle {
    /// Wrap any `RecognitionEngine` in an `EngineHandle`.
    pub fn new<E: RecognitionEngine>(engine: E) -> Self {
        Self(Arc::new(Mutex::new(engine)))
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle").finish_non_exhaustive()
    }
}
