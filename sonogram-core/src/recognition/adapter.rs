//! `RecognitionAdapter`: the session's only view of the engine.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::{
    ActiveGrammar, CommandGrammar, EngineHandle, RecognitionEngine, RecognitionResult, ResultSink,
};
use crate::error::{Result, SonogramError};

/// Wraps an engine with grammar bookkeeping.
///
/// At most one grammar is active at a time. A failed load leaves the
/// previously active grammar in place; the adapter never ends up
/// grammar-less because of a bad grammar.
#[derive(Debug)]
pub struct RecognitionAdapter {
    engine: EngineHandle,
    active: ActiveGrammar,
    streaming: bool,
}

impl RecognitionAdapter {
    pub fn new(engine: EngineHandle) -> Self {
        Self {
            engine,
            active: ActiveGrammar::None,
            streaming: false,
        }
    }

    /// Grammar currently loaded in the engine.
    pub fn active(&self) -> &ActiveGrammar {
        &self.active
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Whether the engine can recognize live audio.
    pub fn supports_streaming(&self) -> bool {
        self.engine.0.lock().supports_streaming()
    }

    /// Replace whatever is loaded with `grammar`.
    ///
    /// # Errors
    /// `SonogramError::GrammarLoad` if the engine rejects the grammar; the
    /// previous grammar is active again when this returns.
    pub fn load_grammar(&mut self, grammar: Arc<CommandGrammar>) -> Result<()> {
        info!(lang = %grammar.lang, bytes = grammar.text.len(), "loading command grammar");
        self.switch_to(ActiveGrammar::Command(grammar))
    }

    /// Replace whatever is loaded with the dictation grammar.
    pub fn load_dictation_grammar(&mut self) -> Result<()> {
        info!("loading dictation grammar");
        self.switch_to(ActiveGrammar::Dictation)
    }

    pub fn start_streaming(&mut self, sink: ResultSink) -> Result<()> {
        self.engine.0.lock().start_streaming(sink)?;
        self.streaming = true;
        info!("recognition stream started");
        Ok(())
    }

    pub fn stop_streaming(&mut self) {
        if self.streaming {
            self.engine.0.lock().stop_streaming();
            self.streaming = false;
            info!("recognition stream stopped");
        }
    }

    pub fn recognize_once(&self, input: &str) -> Result<Option<RecognitionResult>> {
        self.engine.0.lock().recognize_once(input)
    }

    /// Stop streaming and unload every grammar. Used on shutdown.
    pub fn release(&mut self) {
        self.stop_streaming();
        self.engine.0.lock().unload_all();
        self.active = ActiveGrammar::None;
        debug!("recognition grammars released");
    }

    fn switch_to(&mut self, next: ActiveGrammar) -> Result<()> {
        let mut engine = self.engine.0.lock();
        engine.unload_all();

        match apply(&mut *engine, &next) {
            Ok(()) => {
                self.active = next;
                Ok(())
            }
            Err(e) => {
                warn!("grammar load failed ({e}); restoring previous grammar");
                engine.unload_all();
                if let Err(restore) = apply(&mut *engine, &self.active) {
                    error!("previous grammar could not be restored: {restore}");
                    self.active = ActiveGrammar::None;
                }
                Err(match e {
                    SonogramError::GrammarLoad(_) => e,
                    other => SonogramError::GrammarLoad(other.to_string()),
                })
            }
        }
    }
}

fn apply(engine: &mut dyn RecognitionEngine, grammar: &ActiveGrammar) -> Result<()> {
    match grammar {
        ActiveGrammar::None => Ok(()),
        ActiveGrammar::Command(g) => engine.load_grammar(g),
        ActiveGrammar::Dictation => engine.load_dictation_grammar(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::TextEngine;

    const GRAMMAR: &str = "#JSGF V1.0; grammar t; public <cmd> = open {action} file {target};";

    fn adapter() -> RecognitionAdapter {
        RecognitionAdapter::new(EngineHandle::new(TextEngine::new()))
    }

    #[test]
    fn loads_and_recognizes_with_command_grammar() {
        let mut adapter = adapter();
        let grammar = Arc::new(CommandGrammar::new("default", GRAMMAR));
        adapter.load_grammar(Arc::clone(&grammar)).unwrap();

        assert!(adapter
            .active()
            .is_same(&ActiveGrammar::Command(grammar)));
        let result = adapter.recognize_once("open file").unwrap().unwrap();
        assert_eq!(result.text, "open file");
        assert_eq!(
            serde_json::to_string(&result.semantics).unwrap(),
            r#"{"action":"open","target":"file"}"#
        );
    }

    #[test]
    fn malformed_grammar_keeps_previous_grammar_active() {
        let mut adapter = adapter();
        let good = Arc::new(CommandGrammar::new("default", GRAMMAR));
        adapter.load_grammar(Arc::clone(&good)).unwrap();

        let bad = Arc::new(CommandGrammar::new("default", "public <x> = ;"));
        let err = adapter.load_grammar(bad).unwrap_err();

        assert!(matches!(err, SonogramError::GrammarLoad(_)), "{err}");
        assert!(adapter.active().is_same(&ActiveGrammar::Command(good)));
        assert!(adapter.recognize_once("open file").unwrap().is_some());
    }

    #[test]
    fn malformed_first_grammar_leaves_nothing_loaded() {
        let mut adapter = adapter();
        let bad = Arc::new(CommandGrammar::new("default", "not a grammar"));
        assert!(adapter.load_grammar(bad).is_err());
        assert!(matches!(adapter.active(), ActiveGrammar::None));
    }

    #[test]
    fn dictation_replaces_command_grammar() {
        let mut adapter = adapter();
        adapter
            .load_grammar(Arc::new(CommandGrammar::new("default", GRAMMAR)))
            .unwrap();
        adapter.load_dictation_grammar().unwrap();

        assert!(matches!(adapter.active(), ActiveGrammar::Dictation));
        let result = adapter.recognize_once("  hello   there ").unwrap().unwrap();
        assert_eq!(result.text, "hello there");
    }

    #[test]
    fn text_engine_cannot_stream() {
        let mut adapter = adapter();
        let (sink, _rx) = ResultSink::channel();
        assert!(!adapter.supports_streaming());
        let err = adapter.start_streaming(sink).unwrap_err();
        assert!(matches!(err, SonogramError::StreamingUnsupported));
        assert!(!adapter.is_streaming());
    }

    #[test]
    fn release_unloads_everything() {
        let mut adapter = adapter();
        adapter
            .load_grammar(Arc::new(CommandGrammar::new("default", GRAMMAR)))
            .unwrap();
        adapter.release();
        assert!(matches!(adapter.active(), ActiveGrammar::None));
        assert!(adapter.recognize_once("open file").is_err());
    }
}
