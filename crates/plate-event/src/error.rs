//! Event validation and codec errors.

use thiserror::Error;

/// Result alias for event operations.
pub type Result<T> = std::result::Result<T, EventError>;

/// Errors raised while building, encoding or decoding a detection event.
#[derive(Error, Debug)]
pub enum EventError {
    #[error("confidence {0} is outside [0, 1]")]
    InvalidConfidence(f64),

    #[error("plate label is empty")]
    EmptyLabel,

    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("serialization error: {0}")]
    Serialization(#[source] serde_json::Error),
}

impl EventError {
    /// Whether the error came from an inbound message that failed to parse or validate.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}
