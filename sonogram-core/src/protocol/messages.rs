//! Messages exchanged with the Sonogram server.
//!
//! | `action` | Fields | Direction |
//! |----------|--------|-----------|
//! | `identify` | `role` | client → server |
//! | `requestGrammar` | `lang` | client → server |
//! | `grammar` | `grammar` | server → client |
//! | `recognition` | `semantics` | client → server |

use serde::{Deserialize, Serialize};

use super::semantics::SemanticValue;

/// Every wire message, discriminated by its `action` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Message {
    Identify(IdentificationMessage),
    RequestGrammar(RequestGrammarMessage),
    Grammar(GrammarMessage),
    Recognition(RecognitionMessage),
}

impl Message {
    /// All recognised `action` discriminators.
    pub const ACTIONS: [&'static str; 4] = ["identify", "requestGrammar", "grammar", "recognition"];

    /// The `action` discriminator this message is sent with.
    pub fn action(&self) -> &'static str {
        match self {
            Message::Identify(_) => "identify",
            Message::RequestGrammar(_) => "requestGrammar",
            Message::Grammar(_) => "grammar",
            Message::Recognition(_) => "recognition",
        }
    }
}

/// Announces which side of the conversation this connection is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentificationMessage {
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Recognizer,
    Editor,
}

/// Asks the server for the grammar of a language (e.g. a programming language id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestGrammarMessage {
    pub lang: String,
}

/// Grammar definition text for the recognition engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrammarMessage {
    pub grammar: String,
}

/// Structured meaning of one recognized utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionMessage {
    pub semantics: SemanticValue,
}

impl From<IdentificationMessage> for Message {
    fn from(msg: IdentificationMessage) -> Self {
        Message::Identify(msg)
    }
}

impl From<RequestGrammarMessage> for Message {
    fn from(msg: RequestGrammarMessage) -> Self {
        Message::RequestGrammar(msg)
    }
}

impl From<GrammarMessage> for Message {
    fn from(msg: GrammarMessage) -> Self {
        Message::Grammar(msg)
    }
}

impl From<RecognitionMessage> for Message {
    fn from(msg: RecognitionMessage) -> Self {
        Message::Recognition(msg)
    }
}
