//! Error types for the protocol layer.
//!
//! Every variant describes one message that could not be encoded or decoded.
//! None of them is fatal for the connection: the receiver logs the error,
//! drops that single message, and keeps reading.

/// Errors that can occur while encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame is not valid UTF-8.
    #[error("frame is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// A message had the wrong number of fields for its token.
    ///
    /// This is the "structurally malformed" case: the token was recognized
    /// but its fields cannot be mapped onto the event.
    #[error("{token}: expected {expected} fields, found {found}")]
    FieldCount {
        token: &'static str,
        expected: usize,
        found: usize,
    },

    /// A numeric field did not parse.
    #[error("{field}: not a number: {value:?}")]
    BadNumber { field: &'static str, value: String },

    /// A boolean field was not one of the accepted spellings.
    #[error("{field}: not a flag: {value:?}")]
    BadFlag { field: &'static str, value: String },

    /// A field contains a separator or is otherwise unusable on the wire.
    #[error("{field}: invalid value {value:?}")]
    InvalidField { field: &'static str, value: String },

    /// An entity batch carried no snapshots.
    #[error("entity batch from {sender} has no snapshots")]
    EmptyBatch { sender: String },

    /// The nickname and client-id lists of a roster differ in length.
    #[error("roster mismatch: {nicknames} nicknames, {client_ids} client ids")]
    RosterMismatch { nicknames: usize, client_ids: usize },

    /// A level document could not be serialized.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// A level payload is not the JSON document the caller expected.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),
}
