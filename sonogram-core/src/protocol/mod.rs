//! Wire protocol spoken with the Sonogram server.
//!
//! Messages are JSON objects tagged by an `action` field; field names are
//! lower camel case.

pub mod codec;
pub mod messages;
pub mod semantics;

pub use codec::{decode, encode, Format};
pub use messages::{
    GrammarMessage, IdentificationMessage, Message, RecognitionMessage, RequestGrammarMessage,
    Role,
};
pub use semantics::{Scalar, SemanticValue};
