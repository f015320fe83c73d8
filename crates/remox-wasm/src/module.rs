//! WASM module loading and validation

use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use wasmtime::{Engine, Module};

use crate::error::WasmError;

/// Upper bound on accepted module size
const MAX_MODULE_SIZE: usize = 64 * 1024 * 1024;

/// WASM module metadata extracted from the module
#[derive(Debug, Clone)]
pub struct ModuleMetadata {
    /// SHA256 hash of the module bytes
    pub hash: String,
    /// Size of the module in bytes
    pub size: usize,
    /// Exported names
    pub exports: Vec<String>,
    /// Imported functions required by the module
    pub imports: Vec<WasmImport>,
}

/// Information about a WASM import
#[derive(Debug, Clone)]
pub struct WasmImport {
    /// Import module name (e.g. `remox`)
    pub module: String,
    /// Imported item name
    pub name: String,
}

/// WASM module wrapper with validation and metadata
#[derive(Debug)]
pub struct WasmModule {
    /// Module bytecode
    pub bytes: Vec<u8>,
    /// Module metadata
    pub metadata: ModuleMetadata,
    /// Compiled wasmtime module (cached)
    compiled: Option<Module>,
}

impl WasmModule {
    /// Load a WASM module from binary bytes with validation
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, WasmError> {
        Self::validate_basic_format(&bytes)?;
        let metadata = Self::extract_metadata(&bytes)?;
        Ok(WasmModule {
            bytes,
            metadata,
            compiled: None,
        })
    }

    /// Load a WASM module from textual (WAT) source
    pub fn from_wat(source: &str) -> Result<Self, WasmError> {
        let bytes = wat::parse_str(source)
            .map_err(|e| WasmError::InvalidFormat(format!("WAT parse error: {}", e)))?;
        Self::from_bytes(bytes)
    }

    /// Load a WASM module from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, WasmError> {
        let bytes = fs::read(path)?;
        Self::from_bytes(bytes)
    }

    /// Get the compiled wasmtime module, compiling if necessary
    pub fn get_compiled(&mut self, engine: &Engine) -> Result<&Module, WasmError> {
        if self.compiled.is_none() {
            let module = Module::from_binary(engine, &self.bytes)
                .map_err(|e| WasmError::ModuleLoad(e.to_string()))?;
            self.compiled = Some(module);
        }
        Ok(self.compiled.as_ref().unwrap())
    }

    /// Get the module hash
    pub fn hash(&self) -> &str {
        &self.metadata.hash
    }

    /// Whether the module exports the given name
    pub fn exports(&self, name: &str) -> bool {
        self.metadata.exports.iter().any(|export| export == name)
    }

    /// Extract metadata from WASM module bytes
    fn extract_metadata(bytes: &[u8]) -> Result<ModuleMetadata, WasmError> {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let hash = format!("{:x}", hasher.finalize());

        // A throwaway engine is enough for structural parsing.
        let engine = Engine::default();
        let module = Module::from_binary(&engine, bytes)
            .map_err(|e| WasmError::ModuleLoad(e.to_string()))?;

        let exports = module
            .exports()
            .map(|export| export.name().to_string())
            .collect();
        let imports = module
            .imports()
            .map(|import| WasmImport {
                module: import.module().to_string(),
                name: import.name().to_string(),
            })
            .collect();

        Ok(ModuleMetadata {
            hash,
            size: bytes.len(),
            exports,
            imports,
        })
    }

    /// Validate basic WASM format before parsing
    fn validate_basic_format(bytes: &[u8]) -> Result<(), WasmError> {
        if bytes.len() < 8 {
            return Err(WasmError::InvalidFormat(
                "WASM module too small (minimum 8 bytes)".to_string(),
            ));
        }
        if &bytes[0..4] != b"\0asm" {
            return Err(WasmError::InvalidFormat(
                "Invalid WASM magic number".to_string(),
            ));
        }
        if bytes.len() > MAX_MODULE_SIZE {
            return Err(WasmError::InvalidFormat(format!(
                "Module too large: {} bytes (max: {} bytes)",
                bytes.len(),
                MAX_MODULE_SIZE
            )));
        }
        Ok(())
    }
}
