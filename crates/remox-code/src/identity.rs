//! Module identities and wire resource names
//!
//! A module is addressed by a dotted name (`demo.metrics.probe`) in code and
//! by a `/`-separated, `.wasm`-suffixed resource path
//! (`demo/metrics/probe.wasm`) on the wire.

use std::fmt;

use crate::error::CodeError;
use crate::Result;

/// Suffix of every wire resource name
pub const RESOURCE_SUFFIX: &str = ".wasm";

/// Canonical identity of a module
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleIdentity {
    name: String,
}

impl ModuleIdentity {
    /// Parses a dotted module name. Segments must be non-empty and must not
    /// contain path separators.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CodeError::InvalidIdentity("empty module name".to_string()));
        }
        for segment in name.split('.') {
            if segment.is_empty() {
                return Err(CodeError::InvalidIdentity(format!(
                    "empty segment in module name [{}]",
                    name
                )));
            }
            if segment.contains('/') || segment.contains('\\') {
                return Err(CodeError::InvalidIdentity(format!(
                    "path separator in module name [{}]",
                    name
                )));
            }
        }
        Ok(Self { name })
    }

    /// The dotted module name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The wire resource name: dots replaced by `/`, suffixed `.wasm`
    pub fn resource_name(&self) -> String {
        format!("{}{}", self.name.replace('.', "/"), RESOURCE_SUFFIX)
    }

    /// Recovers an identity from a wire resource name
    pub fn from_resource_name(resource: &str) -> Result<Self> {
        let stem = resource.strip_suffix(RESOURCE_SUFFIX).ok_or_else(|| {
            CodeError::InvalidIdentity(format!(
                "resource [{}] does not end with {}",
                resource, RESOURCE_SUFFIX
            ))
        })?;
        Self::new(stem.replace('/', "."))
    }
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
