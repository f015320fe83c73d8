//! # Remox WASM
//!
//! WebAssembly runtime support for Remox mobile code units: module loading
//! and validation, and a fuel-limited execution runtime whose host-call
//! bridge injects the management surface into guest code.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// WASM-specific error types
pub mod error;

/// WASM module loading and validation
pub mod module;

/// WASM execution runtime and the host-call bridge
pub mod runtime;

/// Test utilities for WASM module testing
pub mod test_utils;

pub use error::WasmError;
pub use module::WasmModule;
pub use runtime::{HostBridge, WasmConfig, WasmRuntime};
