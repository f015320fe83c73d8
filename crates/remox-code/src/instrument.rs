//! The instrumentation collaborator boundary
//!
//! The toolchain that defines and redefines modules is external to this
//! crate. It is expected to call the [`CodeCollector`] hook on every
//! definition event so matching modules land in the repository, and to
//! honor [`Instrumentation::retransform`] requests by re-emitting a
//! module's current bytes through the same hook.

use bytes::Bytes;
use std::sync::Arc;
use tracing::trace;

use crate::error::CodeError;
use crate::identity::ModuleIdentity;
use crate::repository::{CodeEntry, CodeRepository, ModuleResolver};

/// External collaborator able to enumerate and re-emit loaded modules
pub trait Instrumentation: Send + Sync {
    /// Requests re-emission of a module's bytecode; when the transform hook
    /// is installed this synchronously repopulates the repository
    fn retransform(&self, identity: &ModuleIdentity) -> Result<(), CodeError>;

    /// All modules currently loaded, whatever their origin
    fn loaded_modules(&self) -> Vec<ModuleIdentity>;

    /// The current bytecode of a loaded module, if the collaborator has it
    fn bytecode_of(&self, identity: &ModuleIdentity) -> Option<Bytes>;
}

/// Inert collaborator for processes without an instrumentation layer
#[derive(Debug, Default, Clone, Copy)]
pub struct NullInstrumentation;

impl Instrumentation for NullInstrumentation {
    fn retransform(&self, identity: &ModuleIdentity) -> Result<(), CodeError> {
        Err(CodeError::Instrumentation(format!(
            "no instrumentation layer installed; cannot retransform [{}]",
            identity
        )))
    }

    fn loaded_modules(&self) -> Vec<ModuleIdentity> {
        Vec::new()
    }

    fn bytecode_of(&self, _identity: &ModuleIdentity) -> Option<Bytes> {
        None
    }
}

/// Forwards module definition events into a repository.
///
/// The marker filter decides which modules are mobile-code carriers; the
/// default accepts everything.
pub struct CodeCollector {
    repository: Arc<CodeRepository>,
    marker: Box<dyn Fn(&str) -> bool + Send + Sync>,
}

impl CodeCollector {
    /// Creates a collector accepting every module name
    pub fn new(repository: Arc<CodeRepository>) -> Self {
        Self {
            repository,
            marker: Box::new(|_| true),
        }
    }

    /// Restricts collection to names the marker accepts
    pub fn with_marker<F>(mut self, marker: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.marker = Box::new(marker);
        self
    }

    /// Hook for a module observed while still being defined: no concrete
    /// entry exists yet, so the bytes are registered as a deferred entry
    /// resolvable through the defining loader.
    pub fn on_defined(&self, loader: &Arc<dyn ModuleResolver>, name: &str, bytes: Bytes) {
        if !(self.marker)(name) {
            return;
        }
        let resource = match ModuleIdentity::new(name) {
            Ok(identity) => identity.resource_name(),
            Err(_) => return,
        };
        trace!(module = name, "Collected deferred module definition");
        self.repository
            .put_deferred(resource, Arc::downgrade(loader), bytes);
    }

    /// Hook for a redefinition of an already-concrete module. Returns the
    /// owning entry the caller must keep alive, or `None` when the marker
    /// rejected the module.
    #[must_use = "dropping the returned entry evicts the module from the repository"]
    pub fn on_redefined(&self, identity: &ModuleIdentity, bytes: Bytes) -> Option<Arc<CodeEntry>> {
        if !(self.marker)(identity.name()) {
            return None;
        }
        trace!(module = %identity, "Collected module redefinition");
        Some(self.repository.put(identity.clone(), bytes))
    }
}
