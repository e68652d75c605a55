//! Error types for formcalc-core

use thiserror::Error;

/// Result type alias using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in formcalc-core
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid cell reference format
    #[error("Invalid cell reference: {0}")]
    InvalidAddress(String),

    /// Persisted table text is not valid JSON
    #[error("Invalid table JSON: {0}")]
    TableJson(#[from] serde_json::Error),

    /// Persisted table text is JSON but not an array of rows
    #[error("Table value must be a JSON array, got {0}")]
    NotATable(&'static str),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a new "other" error with a message
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Error::Other(msg.into())
    }
}
