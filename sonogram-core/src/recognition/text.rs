//! `TextEngine`: emulated recognizer that works on typed utterances.
//!
//! Used for `--read` mode and in tests. Command grammars are JSGF (see
//! [`jsgf`](super::jsgf)); dictation accepts any text and returns it as the
//! scalar semantics. There is no audio path, so live streaming is refused.

use tracing::debug;

use super::jsgf::CompiledGrammar;
use super::{CommandGrammar, RecognitionEngine, RecognitionResult, ResultSink};
use crate::error::{Result, SonogramError};
use crate::protocol::SemanticValue;

enum Loaded {
    Nothing,
    Command(CompiledGrammar),
    Dictation,
}

pub struct TextEngine {
    loaded: Loaded,
}

impl TextEngine {
    pub fn new() -> Self {
        Self {
            loaded: Loaded::Nothing,
        }
    }
}

impl Default for TextEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RecognitionEngine for TextEngine {
    fn unload_all(&mut self) {
        self.loaded = Loaded::Nothing;
    }

    fn load_grammar(&mut self, grammar: &CommandGrammar) -> Result<()> {
        let compiled = CompiledGrammar::compile(&grammar.text)?;
        debug!(
            grammar = compiled.name(),
            public_rules = compiled.public_rules().len(),
            "TextEngine grammar compiled"
        );
        self.loaded = Loaded::Command(compiled);
        Ok(())
    }

    fn load_dictation_grammar(&mut self) -> Result<()> {
        self.loaded = Loaded::Dictation;
        Ok(())
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    fn start_streaming(&mut self, _sink: ResultSink) -> Result<()> {
        Err(SonogramError::StreamingUnsupported)
    }

    fn stop_streaming(&mut self) {}

    fn recognize_once(&mut self, input: &str) -> Result<Option<RecognitionResult>> {
        match &self.loaded {
            Loaded::Nothing => Err(SonogramError::Engine("no grammar loaded".into())),
            Loaded::Command(grammar) => Ok(grammar.recognize(input)),
            Loaded::Dictation => {
                let text = input.split_whitespace().collect::<Vec<_>>().join(" ");
                if text.is_empty() {
                    return Ok(None);
                }
                Ok(Some(RecognitionResult {
                    semantics: SemanticValue::text(text.clone()),
                    text,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dictation_returns_text_as_scalar_semantics() {
        let mut engine = TextEngine::new();
        engine.load_dictation_grammar().unwrap();
        let result = engine.recognize_once("dear  diary").unwrap().unwrap();
        assert_eq!(result.text, "dear diary");
        assert_eq!(
            serde_json::to_string(&result.semantics).unwrap(),
            r#""dear diary""#
        );
        assert!(engine.recognize_once("   ").unwrap().is_none());
    }

    #[test]
    fn rejected_utterance_yields_none() {
        let mut engine = TextEngine::new();
        engine
            .load_grammar(&CommandGrammar::new(
                "default",
                "#JSGF V1.0; grammar g; public <a> = yes;",
            ))
            .unwrap();
        assert!(engine.recognize_once("no").unwrap().is_none());
    }

    #[test]
    fn cannot_stream() {
        let mut engine = TextEngine::new();
        assert!(!engine.supports_streaming());
        let (sink, _rx) = ResultSink::channel();
        assert!(matches!(
            engine.start_streaming(sink),
            Err(SonogramError::StreamingUnsupported)
        ));
    }

    #[test]
    fn recognizing_without_grammar_is_an_engine_error() {
        let mut engine = TextEngine::new();
        assert!(matches!(
            engine.recognize_once("hello"),
            Err(SonogramError::Engine(_))
        ));
    }
}
