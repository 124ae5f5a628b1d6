use thiserror::Error;

/// Errors raised by a session state store backend.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("failed to serialize value for key '{key}': {message}")]
    Serialization { key: String, message: String },

    #[error("failed to deserialize value for key '{key}': {message}")]
    Deserialization { key: String, message: String },
}
