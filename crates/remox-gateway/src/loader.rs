//! Module resolution over local and remote code sources
//!
//! The gateway's loader answers "give me module X" by consulting, in order,
//! its own cache, the process-local code repository, and the issuing side's
//! distribution server (archive first, per-class after). Fetched modules
//! are adopted into the local repository, with the loader as their owner,
//! so later lookups and the local distribution server can answer for them.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use remox::error::RemoxError;
use remox_code::fetch::{sources_for_urls, ChainedCodeSource, CodeSource};
use remox_code::repository::{CodeEntry, CodeRepository, ModuleResolver};
use remox_code::ModuleIdentity;

/// Resolves module names for a gateway, caching what it fetched
pub struct GatewayLoader {
    repository: Arc<CodeRepository>,
    sources: ChainedCodeSource,
    cache: Mutex<HashMap<String, Arc<CodeEntry>>>,
}

impl GatewayLoader {
    /// Creates a loader resolving through the local repository and the
    /// given distribution-server URLs
    pub fn new(repository: Arc<CodeRepository>, code_source_urls: &[String]) -> Self {
        Self {
            repository,
            sources: sources_for_urls(code_source_urls),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the bytes of a module, fetching on demand.
    ///
    /// Every miss is a code-resolution failure: the caller's code cannot
    /// run without it.
    pub async fn load(&self, module_name: &str) -> Result<Bytes, RemoxError> {
        let identity = ModuleIdentity::new(module_name)
            .map_err(|e| RemoxError::CodeResolution(e.to_string()))?;
        let resource = identity.resource_name();

        if let Some(entry) = self.cache.lock().unwrap().get(&resource) {
            return Ok(entry.bytes().clone());
        }
        if let Some(bytes) = self.repository.get_by_resource(&resource) {
            return Ok(bytes);
        }

        match self.sources.fetch(&resource).await {
            Ok(Some(bytes)) => {
                debug!(module = module_name, bytes = bytes.len(), "Fetched module");
                let entry = Arc::new(CodeEntry::new(identity, bytes.clone()));
                self.repository.put_entry(&entry);
                self.cache.lock().unwrap().insert(resource, entry);
                Ok(bytes)
            }
            Ok(None) => Err(RemoxError::CodeResolution(format!(
                "could not resolve module [{}] from any code source",
                module_name
            ))),
            Err(e) => Err(RemoxError::CodeResolution(format!(
                "fetching module [{}] failed: {}",
                module_name, e
            ))),
        }
    }

    /// Number of modules this loader fetched and owns
    pub fn cached_modules(&self) -> usize {
        self.cache.lock().unwrap().len()
    }
}

impl ModuleResolver for GatewayLoader {
    fn resolve(&self, resource_name: &str) -> Option<Arc<CodeEntry>> {
        self.cache.lock().unwrap().get(resource_name).cloned()
    }
}
