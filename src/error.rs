//! Error types for the Juno client library.

use thiserror::Error;

/// Errors surfaced by the history, streaming and storage layers.
#[derive(Debug, Error)]
pub enum JunoError {
    /// Network failure before a response was received (DNS, connect, timeout, body read).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The backend reported that the named conversation does not exist.
    #[error("conversation '{name}' not found")]
    NotFound { name: String },

    /// A response or stored document could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Local key-value storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Setup was attempted with a missing field.
    #[error("missing required field: {0}")]
    InvalidCredentials(&'static str),

    /// Bad configuration value (unparseable backend URL and the like).
    #[error("configuration error: {0}")]
    Config(String),
}

impl JunoError {
    /// True when the failure means "nothing there" rather than "could not ask".
    pub fn is_not_found(&self) -> bool {
        matches!(self, JunoError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, JunoError>;
