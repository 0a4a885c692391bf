//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize a control message.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize a control message.
    #[error("deserialization failed: {0}")]
    Deserialization(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}

/// Result type alias using ProtocolError.
pub type Result<T> = std::result::Result<T, ProtocolError>;
