//! Error types for protocol operations
//!
//! Provides error types for serialization, deserialization, and message validation.

use std::fmt;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors that can occur while encoding, decoding, or validating wire messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// JSON serialization/deserialization error
    SerializationError(String),

    /// A message populated none of the tags it must carry
    EmptyMessage,

    /// A message populated more than one tag
    ConflictingTags(Vec<&'static str>),

    /// A field held a value that violates the data model
    InvalidField {
        /// Dotted path of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Self::EmptyMessage => write!(f, "Invalid message: no operation field is set"),
            Self::ConflictingTags(tags) => {
                write!(f, "Invalid message: multiple fields set ({})", tags.join(", "))
            }
            Self::InvalidField { field, reason } => {
                write!(f, "Invalid field '{}': {}", field, reason)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}
