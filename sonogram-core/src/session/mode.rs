//! Command/dictation mode switching.
//!
//! Switching is decided locally from recognized content; the server is never
//! consulted. Entering a mode always reloads that mode's grammar, so entering
//! the current mode again changes nothing observable.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::recognition::{CommandGrammar, RecognitionAdapter, RecognitionResult};

/// Which grammar the session is recognizing with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Server-supplied command grammar.
    Command,
    /// Unconstrained free text.
    Dictation,
}

/// Triggers for leaving each mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModePolicy {
    /// Text that ends dictation when it appears in a dictated utterance
    /// (case-insensitive substring match).
    pub stop_phrase: String,
    /// Value of the `action` semantic that starts dictation.
    pub dictation_action: String,
}

impl Default for ModePolicy {
    fn default() -> Self {
        Self {
            stop_phrase: "q k".into(),
            dictation_action: "insert".into(),
        }
    }
}

pub struct ModeController {
    mode: Mode,
    command_grammar: Arc<CommandGrammar>,
    policy: ModePolicy,
}

impl ModeController {
    /// Starts in command mode. The caller has already loaded `command_grammar`.
    pub fn new(command_grammar: Arc<CommandGrammar>, policy: ModePolicy) -> Self {
        Self {
            mode: Mode::Command,
            command_grammar,
            policy,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn command_grammar(&self) -> &Arc<CommandGrammar> {
        &self.command_grammar
    }

    /// The mode `result` asks for, if it asks for a change.
    pub fn transition_for(&self, result: &RecognitionResult) -> Option<Mode> {
        match self.mode {
            Mode::Dictation
                if result
                    .text
                    .to_lowercase()
                    .contains(&self.policy.stop_phrase.to_lowercase()) =>
            {
                Some(Mode::Command)
            }
            Mode::Command
                if result.semantics.get("action").and_then(|v| v.as_str())
                    == Some(self.policy.dictation_action.as_str()) =>
            {
                Some(Mode::Dictation)
            }
            _ => None,
        }
    }

    /// Load the grammar for `mode` and make it current.
    ///
    /// # Errors
    /// `GrammarLoad` if the adapter rejects the grammar; mode and active
    /// grammar are unchanged in that case.
    pub fn enter(&mut self, mode: Mode, adapter: &mut RecognitionAdapter) -> Result<()> {
        match mode {
            Mode::Command => adapter.load_grammar(Arc::clone(&self.command_grammar))?,
            Mode::Dictation => adapter.load_dictation_grammar()?,
        }
        debug!(from = ?self.mode, to = ?mode, "mode entered");
        self.mode = mode;
        Ok(())
    }

    /// Apply the mode change a result asks for. Returns the new mode when it changed.
    pub fn on_result(
        &mut self,
        result: &RecognitionResult,
        adapter: &mut RecognitionAdapter,
    ) -> Result<Option<Mode>> {
        let Some(target) = self.transition_for(result) else {
            return Ok(None);
        };
        self.enter(target, adapter)?;
        Ok(Some(target))
    }

    /// Swap in a new command grammar from the server.
    ///
    /// In command mode it is loaded at once. In dictation mode it is
    /// test-loaded and dictation restored, so a bad grammar is rejected now
    /// rather than on the way back to command mode.
    ///
    /// # Errors
    /// `GrammarLoad` if `grammar` is rejected; nothing changes. If dictation
    /// cannot be restored afterwards the new grammar stays loaded, the
    /// controller drops back to command mode and the error is returned.
    pub fn replace_command_grammar(
        &mut self,
        grammar: Arc<CommandGrammar>,
        adapter: &mut RecognitionAdapter,
    ) -> Result<()> {
        adapter.load_grammar(Arc::clone(&grammar))?;
        self.command_grammar = grammar;
        if self.mode == Mode::Dictation {
            if let Err(e) = adapter.load_dictation_grammar() {
                warn!("dictation not restored after grammar update; back to command mode");
                self.mode = Mode::Command;
                return Err(e);
            }
        }
        Ok(())
    }
}
