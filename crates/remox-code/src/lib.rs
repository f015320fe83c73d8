//! # Remox Code
//!
//! The code-distribution half of Remox: an in-memory repository of module
//! bytecode indexed by identity and wire resource name, an HTTP server that
//! hands those bytes to remote loaders on demand, and the fetch-side code
//! sources remote loaders resolve through.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Error types for code distribution
pub mod error;

/// Module identities and wire resource names
pub mod identity;

/// The in-memory bytecode repository
pub mod repository;

/// The instrumentation collaborator boundary
pub mod instrument;

/// Packing and unpacking module archives
pub mod archive;

/// Advertised-host selection for the distribution server
pub mod host;

/// The HTTP code distribution server
pub mod server;

/// Fetch-side code sources for remote loaders
pub mod fetch;

pub use error::CodeError;
pub use fetch::{ChainedCodeSource, CodeSource};
pub use identity::ModuleIdentity;
pub use instrument::{CodeCollector, Instrumentation, NullInstrumentation};
pub use repository::{CodeEntry, CodeRepository, ModuleResolver};
pub use server::{CodeServer, CodeServerConfig, ServerStatus};

/// Result type alias for code distribution operations
pub type Result<T> = std::result::Result<T, CodeError>;
