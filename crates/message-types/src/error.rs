//! Error types for the message-types crate.

use thiserror::Error;

/// Errors that can occur while encoding or decoding messages.
#[derive(Error, Debug)]
pub enum MessageTypesError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected message code: expected {expected}, got {actual}")]
    UnexpectedCode { expected: String, actual: String },

    #[error("Failed to decode payload for message code '{code}': {source}")]
    PayloadDecode {
        code: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Record has no value")]
    MissingValue,
}

/// Result type alias for message-types operations.
pub type Result<T> = std::result::Result<T, MessageTypesError>;
