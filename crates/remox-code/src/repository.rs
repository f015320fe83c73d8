//! The in-memory bytecode repository
//!
//! The repository indexes module bytes under both the module identity and
//! its wire resource name. It holds weak references only: whoever loaded the
//! module owns the [`CodeEntry`], and when that owner drops the entry the
//! repository forgets it. Modules observed before a concrete entry exists
//! are tracked as deferred entries and promoted on first resolution.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, trace};

use crate::identity::ModuleIdentity;
use crate::instrument::Instrumentation;

/// One module's bytes plus its addressing
#[derive(Debug)]
pub struct CodeEntry {
    identity: Option<ModuleIdentity>,
    resource_name: String,
    bytes: Bytes,
}

impl CodeEntry {
    /// Creates an entry for a concretely identified module
    pub fn new(identity: ModuleIdentity, bytes: Bytes) -> Self {
        let resource_name = identity.resource_name();
        Self {
            identity: Some(identity),
            resource_name,
            bytes,
        }
    }

    /// Creates an entry addressed only by resource name; the identity is
    /// recovered from the path when it parses
    pub fn for_resource(resource_name: impl Into<String>, bytes: Bytes) -> Self {
        let resource_name = resource_name.into();
        let identity = ModuleIdentity::from_resource_name(&resource_name).ok();
        Self {
            identity,
            resource_name,
            bytes,
        }
    }

    /// The module identity, when known
    pub fn identity(&self) -> Option<&ModuleIdentity> {
        self.identity.as_ref()
    }

    /// The wire resource name
    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    /// The module bytes
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }
}

/// The owning-loader reference a deferred entry resolves through
pub trait ModuleResolver: Send + Sync {
    /// Resolves a resource name to a concrete, owned entry
    fn resolve(&self, resource_name: &str) -> Option<Arc<CodeEntry>>;
}

struct DeferredEntry {
    loader: Weak<dyn ModuleResolver>,
    bytes: Bytes,
}

#[derive(Default)]
struct Indexes {
    by_name: HashMap<String, Weak<CodeEntry>>,
    by_resource: HashMap<String, Weak<CodeEntry>>,
    deferred: HashMap<String, DeferredEntry>,
}

impl Indexes {
    /// Indexes an entry under both keys; called with the lock held so
    /// readers never observe one index without the other.
    fn index(&mut self, entry: &Arc<CodeEntry>) {
        if let Some(identity) = entry.identity() {
            self.by_name.insert(identity.name().to_string(), Arc::downgrade(entry));
        }
        self.by_resource
            .insert(entry.resource_name().to_string(), Arc::downgrade(entry));
    }

    fn lookup_name(&mut self, name: &str) -> Option<Bytes> {
        match self.by_name.get(name).and_then(Weak::upgrade) {
            Some(entry) => Some(entry.bytes().clone()),
            None => {
                self.by_name.remove(name);
                None
            }
        }
    }

    fn lookup_resource(&mut self, resource: &str) -> Option<Bytes> {
        match self.by_resource.get(resource).and_then(Weak::upgrade) {
            Some(entry) => Some(entry.bytes().clone()),
            None => {
                self.by_resource.remove(resource);
                None
            }
        }
    }
}

/// In-memory index of module bytes by identity and resource name
#[derive(Default)]
pub struct CodeRepository {
    inner: Mutex<Indexes>,
}

impl CodeRepository {
    /// Creates an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes bytes under an identity and its derived resource name.
    ///
    /// Overwrites silently if the identity was already present. The caller
    /// owns the returned entry; the repository keeps only a weak reference
    /// and never keeps a module alive on its own.
    #[must_use = "the repository holds only a weak reference; dropping the entry evicts it"]
    pub fn put(&self, identity: ModuleIdentity, bytes: Bytes) -> Arc<CodeEntry> {
        let entry = Arc::new(CodeEntry::new(identity, bytes));
        self.put_entry(&entry);
        entry
    }

    /// Indexes an entry someone else owns
    pub fn put_entry(&self, entry: &Arc<CodeEntry>) {
        trace!(resource = entry.resource_name(), "Indexing code entry");
        self.inner.lock().unwrap().index(entry);
    }

    /// Registers bytes for a module that has no concrete entry yet
    pub fn put_deferred(
        &self,
        resource_name: impl Into<String>,
        loader: Weak<dyn ModuleResolver>,
        bytes: Bytes,
    ) {
        let resource_name = resource_name.into();
        trace!(resource = %resource_name, "Registering deferred entry");
        self.inner
            .lock()
            .unwrap()
            .deferred
            .insert(resource_name, DeferredEntry { loader, bytes });
    }

    /// Returns the bytes for a dotted module name
    pub fn get_by_name(&self, name: &str) -> Option<Bytes> {
        self.inner.lock().unwrap().lookup_name(name)
    }

    /// Returns the bytes for a wire resource name.
    ///
    /// Concrete entries win; otherwise a deferred entry is consulted and,
    /// when its owning loader can produce a concrete entry, promoted.
    /// Concurrent resolvers perform at most one promotion; a racer may
    /// observe the pre-promotion bytes.
    pub fn get_by_resource(&self, resource: &str) -> Option<Bytes> {
        let (loader, deferred_bytes) = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(bytes) = inner.lookup_resource(resource) {
                return Some(bytes);
            }
            let deferred = inner.deferred.get(resource)?;
            (deferred.loader.clone(), deferred.bytes.clone())
        };

        // Resolution goes through the owning loader without the lock held;
        // the promotion itself re-checks under the lock.
        if let Some(loader) = loader.upgrade() {
            if let Some(entry) = loader.resolve(resource) {
                let mut inner = self.inner.lock().unwrap();
                if inner.deferred.remove(resource).is_some() {
                    debug!(resource = %resource, "Promoted deferred entry");
                    inner.index(&entry);
                }
                return Some(entry.bytes().clone());
            }
        }
        Some(deferred_bytes)
    }

    /// Returns the bytes for an identity, asking the instrumentation
    /// collaborator to retransform the module on a miss.
    ///
    /// If the collaborator's hook is still installed the retransformation
    /// synchronously repopulates this repository, so a second lookup is
    /// attempted afterwards.
    pub fn get_or_retransform(
        &self,
        identity: &ModuleIdentity,
        instrumentation: &dyn Instrumentation,
    ) -> Option<Bytes> {
        if let Some(bytes) = self.get_by_name(identity.name()) {
            return Some(bytes);
        }
        if let Err(e) = instrumentation.retransform(identity) {
            debug!(module = %identity, error = %e, "Retransformation request failed");
            return None;
        }
        self.get_by_name(identity.name())
    }

    /// Number of live concrete entries
    pub fn concrete_len(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .by_resource
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Number of deferred entries awaiting promotion
    pub fn deferred_len(&self) -> usize {
        self.inner.lock().unwrap().deferred.len()
    }
}
