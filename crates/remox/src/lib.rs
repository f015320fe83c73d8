//! # Remox
//!
//! A Rust library for dynamic access to a process's management surface and
//! for shipping mobile code units to a remote process for execution there.
//!
//! Remox models managed objects as handles built from remotely reported
//! metadata, resolves operation overloads against caller arguments at
//! runtime, and serializes WebAssembly-backed code units across the
//! management connection after stripping their captured execution context.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use remox_code as code;

/// Error types for the Remox library
pub mod error;

/// Protocol values exchanged with managed objects
pub mod value;

/// Type descriptors and assignability rules
pub mod descriptor;

/// Operation signatures and overload resolution
pub mod resolve;

/// The management connection facade and object metadata model
pub mod connection;

/// Managed object handles
pub mod handle;

/// Mobile code units and the dehydrator
pub mod unit;

/// Wire codec for shipped payloads
pub mod codec;

/// In-process management server
pub mod local;

/// Session surface for attach, exec and gateway installation
pub mod session;

pub use connection::{ManagementConnection, ObjectDescriptor, ObjectId};
pub use descriptor::TypeDescriptor;
pub use error::RemoxError;
pub use handle::ObjectHandle;
pub use local::{LocalServer, ManagedResource};
pub use resolve::OperationSignature;
pub use session::{MxSession, MxSessionBuilder};
pub use unit::{CodeUnit, Dehydrator};
pub use value::Value;

/// Result type alias for Remox operations
pub type Result<T> = std::result::Result<T, RemoxError>;
