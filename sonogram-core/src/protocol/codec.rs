//! JSON text encoding of [`Message`]s.

use tracing::trace;

use super::messages::Message;
use crate::error::{Result, SonogramError};

/// Output layout for encoded messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Compact,
    /// Indented JSON, used when debugging the conversation.
    Pretty,
}

/// Serialize a message to a UTF-8 JSON text frame.
pub fn encode(message: &Message, format: Format) -> Result<String> {
    let encoded = match format {
        Format::Compact => serde_json::to_string(message),
        Format::Pretty => serde_json::to_string_pretty(message),
    };
    encoded.map_err(|e| SonogramError::Encode(e.to_string()))
}

/// Parse one complete frame into a [`Message`].
///
/// # Errors
/// `SonogramError::Decode` when the payload is not UTF-8 JSON, is not an
/// object, has no string `action`, names an unknown action, or carries
/// fields of the wrong shape for its action.
pub fn decode(bytes: &[u8]) -> Result<Message> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| SonogramError::Decode(format!("payload is not UTF-8: {e}")))?;
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| SonogramError::Decode(format!("payload is not JSON: {e}")))?;

    let action = value
        .as_object()
        .ok_or_else(|| SonogramError::Decode("expected a JSON object".into()))?
        .get("action")
        .ok_or_else(|| SonogramError::Decode("missing `action` field".into()))?
        .as_str()
        .ok_or_else(|| SonogramError::Decode("`action` must be a string".into()))?
        .to_string();

    if !Message::ACTIONS.contains(&action.as_str()) {
        return Err(SonogramError::Decode(format!("unknown action `{action}`")));
    }

    trace!(%action, "decoding message");
    serde_json::from_value(value)
        .map_err(|e| SonogramError::Decode(format!("invalid `{action}` message: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{GrammarMessage, RecognitionMessage, SemanticValue};

    const JSGF: &str = "#JSGF V1.0; grammar test; public <t> = hello;";

    #[test]
    fn grammar_message_survives_round_trip() {
        let msg = Message::from(GrammarMessage {
            grammar: JSGF.into(),
        });
        let encoded = encode(&msg, Format::Compact).unwrap();
        match decode(encoded.as_bytes()).unwrap() {
            Message::Grammar(g) => assert_eq!(g.grammar, JSGF),
            other => panic!("expected grammar message, got {other:?}"),
        }
    }

    #[test]
    fn recognition_message_encodes_semantics_tree() {
        let msg = Message::from(RecognitionMessage {
            semantics: SemanticValue::object()
                .with("action", "insert")
                .with("target", "foo"),
        });
        let encoded = encode(&msg, Format::Compact).unwrap();
        assert_eq!(
            encoded,
            r#"{"action":"recognition","semantics":{"action":"insert","target":"foo"}}"#
        );
    }

    #[test]
    fn pretty_format_is_indented() {
        let msg = Message::from(GrammarMessage {
            grammar: "g".into(),
        });
        let encoded = encode(&msg, Format::Pretty).unwrap();
        assert!(encoded.contains("\n  \"grammar\": \"g\""), "{encoded}");
    }

    #[test]
    fn rejects_non_json() {
        let err = decode(b"grammar please").unwrap_err();
        assert!(matches!(err, SonogramError::Decode(_)));
    }

    #[test]
    fn rejects_missing_action() {
        let err = decode(br#"{"grammar":"x"}"#).unwrap_err();
        assert!(err.to_string().contains("missing `action`"), "{err}");
    }

    #[test]
    fn rejects_unknown_action() {
        let err = decode(br#"{"action":"recognize","message":"x"}"#).unwrap_err();
        assert!(err.to_string().contains("unknown action `recognize`"), "{err}");
    }

    #[test]
    fn rejects_wrong_field_shape() {
        let err = decode(br#"{"action":"grammar","grammar":42}"#).unwrap_err();
        assert!(matches!(err, SonogramError::Decode(_)));
    }

    #[test]
    fn rejects_invalid_utf8() {
        let err = decode(&[0xff, 0xfe, 0x7b]).unwrap_err();
        assert!(err.to_string().contains("UTF-8"), "{err}");
    }
}
