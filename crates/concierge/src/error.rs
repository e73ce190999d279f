//! Error types for Concierge

use thiserror::Error;

use crate::dispatch::DispatchError;
use crate::provider::ProviderError;

/// Main error type for Concierge operations
#[derive(Error, Debug)]
pub enum ConciergeError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Remote provider errors (embedding, generation, retrieval)
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Embedding dispatch errors
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Inbound message or session validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Session lookup and feedback errors
    #[error("Session error: {0}")]
    Session(#[from] crate::conversation::SessionError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General errors
    #[error("{0}")]
    General(String),
}

impl From<serde_json::Error> for ConciergeError {
    fn from(e: serde_json::Error) -> Self {
        ConciergeError::Serialization(e.to_string())
    }
}

/// Rejections of an inbound chat message.
///
/// These are returned before any provider is called, so an invalid
/// request never consumes quota.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Message is empty or whitespace only
    #[error("Message cannot be empty")]
    EmptyMessage,

    /// Message is longer than the configured limit
    #[error("Message is {len} characters, limit is {max}")]
    MessageTooLong { len: usize, max: usize },

    /// Session id failed validation
    #[error("Invalid session id: {0}")]
    InvalidSessionId(#[from] crate::conversation::SessionIdError),
}

/// Result type alias for Concierge operations
pub type Result<T> = std::result::Result<T, ConciergeError>;
