//! Error types for the Remox library

use thiserror::Error;

/// Main error type for Remox operations
#[derive(Debug, Error)]
pub enum RemoxError {
    /// Transport-related errors (the management connection is unavailable
    /// or dropped mid-call; never retried automatically)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Overload resolution matched zero or more than one signature
    #[error("Unresolvable overload for operation [{operation}] with {arity} argument(s): {matched} candidate(s) matched")]
    Overload {
        /// The operation name being resolved
        operation: String,
        /// The caller-supplied argument count
        arity: usize,
        /// How many candidates survived type filtering
        matched: usize,
    },

    /// Shipped code could not be reconstructed on the remote side
    /// (the code never ran)
    #[error("Code resolution error: {0}")]
    CodeResolution(String),

    /// Shipped code ran and raised; carries the original failure
    #[error("Execution error: {0}")]
    Execution(String),

    /// No such managed object is registered
    #[error("No such object: {0}")]
    NoSuchObject(String),

    /// The named operation does not exist on the managed object
    #[error("No such operation [{operation}] on [{object}]")]
    NoSuchOperation {
        /// The target object id
        object: String,
        /// The operation name
        operation: String,
    },

    /// The named attribute does not exist or is not accessible as requested
    #[error("No such attribute [{attribute}] on [{object}]")]
    NoSuchAttribute {
        /// The target object id
        object: String,
        /// The attribute name
        attribute: String,
    },

    /// Malformed metadata while building a managed object handle; a handle
    /// with incomplete metadata is unsafe to expose
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A mobile code unit was used in a way its state forbids
    #[error("Invalid code unit state: {0}")]
    UnitState(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<remox_code::CodeError> for RemoxError {
    fn from(err: remox_code::CodeError) -> Self {
        match err {
            remox_code::CodeError::Io(e) => Self::Io(e),
            remox_code::CodeError::Fetch(msg) => Self::CodeResolution(msg),
            other => Self::CodeResolution(other.to_string()),
        }
    }
}

#[cfg(feature = "rmp-serde")]
impl From<rmp_serde::encode::Error> for RemoxError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Serialization(format!("MessagePack encode error: {}", err))
    }
}

#[cfg(feature = "rmp-serde")]
impl From<rmp_serde::decode::Error> for RemoxError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Serialization(format!("MessagePack decode error: {}", err))
    }
}

impl From<serde_json::Error> for RemoxError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON error: {}", err))
    }
}
