//! Chat Error Types

use thiserror::Error;

use crate::config::ConfigError;

/// Chat-specific errors
#[derive(Error, Debug)]
pub enum ChatError {
    // Transport errors
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    TransportError(String),

    // API errors
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Response contained no message")]
    EmptyResponse,

    // Local errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Failed to write chat history: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChatError::Timeout
        } else if err.is_connect() {
            ChatError::ConnectionFailed(err.to_string())
        } else if err.is_decode() {
            ChatError::SerializationError(err.to_string())
        } else {
            ChatError::TransportError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::SerializationError(err.to_string())
    }
}

impl From<url::ParseError> for ChatError {
    fn from(err: url::ParseError) -> Self {
        ChatError::InvalidConfig(ConfigError::InvalidUrl(err))
    }
}

/// Result type alias for chat operations
pub type ChatResult<T> = Result<T, ChatError>;
