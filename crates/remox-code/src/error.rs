//! Error types for code distribution

use thiserror::Error;

/// Code distribution errors
#[derive(Debug, Error)]
pub enum CodeError {
    /// A module name or resource path is malformed
    #[error("Invalid module identity: {0}")]
    InvalidIdentity(String),

    /// Server lifecycle or request handling error
    #[error("Server error: {0}")]
    Server(String),

    /// Fetching from a remote code source failed at the transport level
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// A module archive could not be packed or unpacked
    #[error("Archive error: {0}")]
    Archive(String),

    /// The instrumentation collaborator reported a failure
    #[error("Instrumentation error: {0}")]
    Instrumentation(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for CodeError {
    fn from(err: reqwest::Error) -> Self {
        Self::Fetch(err.to_string())
    }
}
