//! Fetch-side code sources for remote loaders
//!
//! A remote loader resolves resource names through an ordered chain of
//! sources: its local repository, then the issuing side's distribution
//! server — the whole archive first when one is advertised, per-class
//! requests after. Absence is a first-class outcome; only transport-level
//! problems are errors.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::archive;
use crate::error::CodeError;
use crate::repository::CodeRepository;
use crate::server::ARCHIVE_RESOURCE;
use crate::Result;

/// Somewhere module bytes can be fetched from
#[async_trait]
pub trait CodeSource: Send + Sync {
    /// Fetches a resource, or reports it absent
    async fn fetch(&self, resource_name: &str) -> Result<Option<Bytes>>;
}

/// Serves from a local repository
pub struct RepositorySource {
    repository: Arc<CodeRepository>,
}

impl RepositorySource {
    /// Creates a source over a repository
    pub fn new(repository: Arc<CodeRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl CodeSource for RepositorySource {
    async fn fetch(&self, resource_name: &str) -> Result<Option<Bytes>> {
        Ok(self.repository.get_by_resource(resource_name))
    }
}

/// Fetches single resources from a distribution server's per-class prefix
pub struct HttpCodeSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCodeSource {
    /// Creates a source over a per-class URL prefix
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CodeSource for HttpCodeSource {
    async fn fetch(&self, resource_name: &str) -> Result<Option<Bytes>> {
        let url = format!("{}{}", self.base_url, resource_name);
        debug!(url = %url, "Fetching code resource");
        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(CodeError::Fetch(format!(
                "unexpected status {} for [{}]",
                response.status(),
                url
            )));
        }
        Ok(Some(response.bytes().await?))
    }
}

/// Fetches the whole module archive once and serves from memory after.
///
/// A failed archive fetch caches the miss so later lookups fall straight
/// through to the per-class source.
pub struct ArchiveCodeSource {
    archive_url: String,
    client: reqwest::Client,
    entries: OnceCell<Option<HashMap<String, Bytes>>>,
}

impl ArchiveCodeSource {
    /// Creates a source over an archive URL
    pub fn new(archive_url: impl Into<String>) -> Self {
        Self {
            archive_url: archive_url.into(),
            client: reqwest::Client::new(),
            entries: OnceCell::new(),
        }
    }

    async fn load(&self) -> Option<HashMap<String, Bytes>> {
        debug!(url = %self.archive_url, "Fetching module archive");
        let response = match self.client.get(&self.archive_url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(url = %self.archive_url, status = %response.status(), "Archive fetch refused");
                return None;
            }
            Err(e) => {
                warn!(url = %self.archive_url, "Archive fetch failed: {}", e);
                return None;
            }
        };
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(url = %self.archive_url, "Archive body failed: {}", e);
                return None;
            }
        };
        match archive::unpack(&bytes) {
            Ok(entries) => {
                debug!(entries = entries.len(), "Unpacked module archive");
                Some(entries)
            }
            Err(e) => {
                warn!(url = %self.archive_url, "Archive unpack failed: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl CodeSource for ArchiveCodeSource {
    async fn fetch(&self, resource_name: &str) -> Result<Option<Bytes>> {
        let entries = self.entries.get_or_init(|| self.load()).await;
        Ok(entries
            .as_ref()
            .and_then(|entries| entries.get(resource_name).cloned()))
    }
}

/// Ordered fallback chain over code sources
pub struct ChainedCodeSource {
    sources: Vec<Arc<dyn CodeSource>>,
}

impl ChainedCodeSource {
    /// Creates a chain trying sources in order
    pub fn new(sources: Vec<Arc<dyn CodeSource>>) -> Self {
        Self { sources }
    }

    /// Prepends a source ahead of the existing chain
    pub fn prepend(&mut self, source: Arc<dyn CodeSource>) {
        self.sources.insert(0, source);
    }
}

#[async_trait]
impl CodeSource for ChainedCodeSource {
    async fn fetch(&self, resource_name: &str) -> Result<Option<Bytes>> {
        for source in &self.sources {
            match source.fetch(resource_name).await {
                Ok(Some(bytes)) => return Ok(Some(bytes)),
                Ok(None) => continue,
                Err(e) => {
                    // A broken source must not hide a later one that works.
                    warn!(resource = %resource_name, "Code source failed: {}", e);
                    continue;
                }
            }
        }
        Ok(None)
    }
}

/// Builds the fetch chain for a distribution server's advertised URLs:
/// archive URLs become archive sources, everything else a per-class source.
pub fn sources_for_urls(urls: &[String]) -> ChainedCodeSource {
    let sources = urls
        .iter()
        .map(|url| {
            if url.ends_with(ARCHIVE_RESOURCE) {
                Arc::new(ArchiveCodeSource::new(url.clone())) as Arc<dyn CodeSource>
            } else {
                Arc::new(HttpCodeSource::new(url.clone())) as Arc<dyn CodeSource>
            }
        })
        .collect();
    ChainedCodeSource::new(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ModuleIdentity;

    struct StaticSource(Option<Bytes>);

    #[async_trait]
    impl CodeSource for StaticSource {
        async fn fetch(&self, _resource_name: &str) -> Result<Option<Bytes>> {
            Ok(self.0.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl CodeSource for FailingSource {
        async fn fetch(&self, _resource_name: &str) -> Result<Option<Bytes>> {
            Err(CodeError::Fetch("wire down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_repository_source() {
        let repository = Arc::new(CodeRepository::new());
        let _entry = repository.put(
            ModuleIdentity::new("demo.probe").unwrap(),
            Bytes::from_static(b"code"),
        );
        let source = RepositorySource::new(repository);
        assert_eq!(
            source.fetch("demo/probe.wasm").await.unwrap().unwrap(),
            &b"code"[..]
        );
        assert!(source.fetch("demo/missing.wasm").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_chain_order_and_fallthrough() {
        let chain = ChainedCodeSource::new(vec![
            Arc::new(StaticSource(None)),
            Arc::new(StaticSource(Some(Bytes::from_static(b"second")))),
            Arc::new(StaticSource(Some(Bytes::from_static(b"third")))),
        ]);
        assert_eq!(
            chain.fetch("any.wasm").await.unwrap().unwrap(),
            &b"second"[..]
        );
    }

    #[tokio::test]
    async fn test_chain_survives_failing_source() {
        let chain = ChainedCodeSource::new(vec![
            Arc::new(FailingSource),
            Arc::new(StaticSource(Some(Bytes::from_static(b"alive")))),
        ]);
        assert_eq!(
            chain.fetch("any.wasm").await.unwrap().unwrap(),
            &b"alive"[..]
        );
    }

    #[tokio::test]
    async fn test_exhausted_chain_is_absent() {
        let chain = ChainedCodeSource::new(vec![Arc::new(StaticSource(None))]);
        assert!(chain.fetch("any.wasm").await.unwrap().is_none());
    }

    #[test]
    fn test_sources_for_urls_classification() {
        let chain = sources_for_urls(&[
            format!("http://h:1/classloader/{}", ARCHIVE_RESOURCE),
            "http://h:1/classloader/".to_string(),
        ]);
        assert_eq!(chain.sources.len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_archive_caches_the_miss() {
        // Nothing listens on the discard port; the refused connection
        // caches the miss.
        let source = ArchiveCodeSource::new("http://127.0.0.1:9/classloader/remox-modules.tar");
        assert!(source.fetch("demo/probe.wasm").await.unwrap().is_none());
        assert!(source.entries.get().is_some());
    }
}
