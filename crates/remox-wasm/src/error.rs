//! WASM-specific error types

use thiserror::Error;

/// WASM-specific errors
#[derive(Debug, Error)]
pub enum WasmError {
    /// Module loading error
    #[error("Module loading error: {0}")]
    ModuleLoad(String),

    /// Invalid module format
    #[error("Invalid module format: {0}")]
    InvalidFormat(String),

    /// Linking or instantiation error; the code never ran
    #[error("Link error: {0}")]
    Link(String),

    /// Execution error; the code ran and failed
    #[error("Execution error: {0}")]
    Execution(String),

    /// A host call issued by the guest failed
    #[error("Host call error: {0}")]
    Host(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
