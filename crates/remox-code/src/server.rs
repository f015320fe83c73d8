//! The HTTP code distribution server
//!
//! Serves module bytes to remote loaders that ask by resource path, either
//! one module at a time or as a whole pre-loaded archive. Responses are
//! gzip-negotiated via `Accept-Encoding`, carry an octet-stream content
//! type, and an exact content length. A missing resource is a 404 naming
//! the resource; the server keeps running.

use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::CodeError;
use crate::host;
use crate::identity::ModuleIdentity;
use crate::instrument::Instrumentation;
use crate::repository::CodeRepository;
use crate::Result;

/// URI prefix of every code request
pub const CODE_URI_PREFIX: &str = "/classloader/";
/// Resource name of the packaged module archive
pub const ARCHIVE_RESOURCE: &str = "remox-modules.tar";

/// Distribution server configuration
#[derive(Debug, Clone, Default)]
pub struct CodeServerConfig {
    /// Host to advertise in code base URLs; selection policy applies when
    /// absent
    pub host: Option<String>,
    /// Port to bind; 0 picks an ephemeral port
    pub port: u16,
    /// Packaged module archive to pre-load and serve whole
    pub archive: Option<PathBuf>,
}

/// Lifecycle states of the distribution server.
///
/// There is no restarting state: a stopped server is consumed, and a
/// subsequent start builds a fresh instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    /// Not serving; the value has not been started or has been consumed
    Stopped,
    /// Binding the socket and spawning the serve task
    Starting,
    /// Accepting requests
    Running,
}

struct ArchiveContent {
    raw: Bytes,
    gzipped: Bytes,
}

struct ServerState {
    repository: Arc<CodeRepository>,
    instrumentation: Arc<dyn Instrumentation>,
    dynamic_resources: RwLock<HashMap<String, PathBuf>>,
    archive: Option<ArchiveContent>,
}

/// A running code distribution server
pub struct CodeServer {
    state: Arc<ServerState>,
    advertised_host: String,
    port: u16,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl CodeServer {
    /// Binds an ephemeral port, spawns the serve task and returns the
    /// running server.
    pub async fn start(
        config: CodeServerConfig,
        repository: Arc<CodeRepository>,
        instrumentation: Arc<dyn Instrumentation>,
    ) -> Result<Self> {
        debug!(status = ?ServerStatus::Starting, "Starting code distribution server");

        let archive = match &config.archive {
            Some(path) => Some(load_archive(path).await?),
            None => None,
        };

        let state = Arc::new(ServerState {
            repository,
            instrumentation,
            dynamic_resources: RwLock::new(HashMap::new()),
            archive,
        });

        let app = Router::new()
            .route(&format!("{}*resource", CODE_URI_PREFIX), get(serve_resource))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
        let port = listener.local_addr()?.port();
        let advertised_host = host::advertised_host(config.host.as_deref());

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                error!("Code distribution server error: {}", e);
            }
        });

        info!(host = %advertised_host, port, "Code distribution server running");
        Ok(Self {
            state,
            advertised_host,
            port,
            shutdown_tx,
            task,
        })
    }

    /// The URLs remote loaders should resolve code through: the archive
    /// first when one is served (a single fetch is cheaper than many), then
    /// always the per-class prefix.
    pub fn http_code_base_urls(&self) -> Vec<String> {
        let mut urls = Vec::new();
        if self.state.archive.is_some() {
            urls.push(format!(
                "http://{}:{}{}{}",
                self.advertised_host, self.port, CODE_URI_PREFIX, ARCHIVE_RESOURCE
            ));
        }
        urls.push(format!(
            "http://{}:{}{}",
            self.advertised_host, self.port, CODE_URI_PREFIX
        ));
        urls
    }

    /// The advertised host
    pub fn host(&self) -> &str {
        &self.advertised_host
    }

    /// The bound port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Current lifecycle state
    pub fn status(&self) -> ServerStatus {
        if self.task.is_finished() {
            ServerStatus::Stopped
        } else {
            ServerStatus::Running
        }
    }

    /// Registers a file served verbatim under its final path segment,
    /// ahead of every other resolution path.
    pub fn add_dynamic_resource(&self, path: PathBuf) -> Result<String> {
        let key = path
            .file_name()
            .and_then(OsStr::to_str)
            .map(str::to_string)
            .ok_or_else(|| {
                CodeError::Server(format!("dynamic resource path has no file name: {:?}", path))
            })?;
        info!(resource = %key, "Added dynamic resource");
        self.state
            .dynamic_resources
            .write()
            .unwrap()
            .insert(key.clone(), path);
        Ok(key)
    }

    /// Stops the server. The value is consumed; restarting means building
    /// a fresh server.
    pub async fn stop(self) {
        info!(port = self.port, "Stopping code distribution server");
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
    }
}

async fn load_archive(path: &Path) -> Result<ArchiveContent> {
    let raw = tokio::fs::read(path).await?;
    let gzipped = gzip(&raw)?;
    info!(
        bytes = raw.len(),
        gzipped = gzipped.len(),
        "Loaded module archive"
    );
    Ok(ArchiveContent {
        raw: raw.into(),
        gzipped: gzipped.into(),
    })
}

fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 2 + 64), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .map(|encodings| encodings.contains("gzip"))
        .unwrap_or(false)
}

fn payload_response(bytes: Bytes, gzipped: bool) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if gzipped {
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    }
    (StatusCode::OK, headers, Body::from(bytes)).into_response()
}

fn not_found(resource: &str) -> Response {
    warn!(resource = %resource, "Sending 404 for unknown code resource");
    (
        StatusCode::NOT_FOUND,
        format!("code resource not found [{}]", resource),
    )
        .into_response()
}

async fn serve_resource(
    State(state): State<Arc<ServerState>>,
    UrlPath(resource): UrlPath<String>,
    headers: HeaderMap,
) -> Response {
    debug!(resource = %resource, "Code request");
    let wants_gzip = accepts_gzip(&headers);

    if resource == ARCHIVE_RESOURCE {
        return match &state.archive {
            Some(archive) if wants_gzip => payload_response(archive.gzipped.clone(), true),
            Some(archive) => payload_response(archive.raw.clone(), false),
            None => not_found(&resource),
        };
    }

    match resolve_resource(&state, &resource).await {
        Some(bytes) if wants_gzip => match gzip(&bytes) {
            Ok(compressed) => payload_response(compressed.into(), true),
            Err(e) => {
                error!(resource = %resource, "Failed to compress response: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "compression failed").into_response()
            }
        },
        Some(bytes) => payload_response(bytes, false),
        None => not_found(&resource),
    }
}

/// Resolution order: dynamic overrides, the repository, then a last-resort
/// scan of the instrumentation collaborator's loaded modules.
async fn resolve_resource(state: &ServerState, resource: &str) -> Option<Bytes> {
    let dynamic = state
        .dynamic_resources
        .read()
        .unwrap()
        .get(resource)
        .cloned();
    if let Some(path) = dynamic {
        return match tokio::fs::read(&path).await {
            Ok(bytes) => Some(bytes.into()),
            Err(e) => {
                warn!(resource = %resource, "Failed to read dynamic resource: {}", e);
                None
            }
        };
    }

    if let Some(bytes) = state.repository.get_by_resource(resource) {
        return Some(bytes);
    }

    // Modules loaded before the transform hook was installed are only
    // visible to the instrumentation layer. This scan can be slow.
    if let Ok(identity) = ModuleIdentity::from_resource_name(resource) {
        for loaded in state.instrumentation.loaded_modules() {
            if loaded == identity {
                return state.instrumentation.bytecode_of(&loaded);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_round_trip() {
        use flate2::read::GzDecoder;
        use std::io::Read;

        let payload = b"some module bytes that compress fine".repeat(8);
        let compressed = gzip(&payload).unwrap();
        assert!(compressed.len() < payload.len());

        let mut decoder = GzDecoder::new(&compressed[..]);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).unwrap();
        assert_eq!(decompressed, payload);
    }

    #[test]
    fn test_accepts_gzip_parsing() {
        let mut headers = HeaderMap::new();
        assert!(!accepts_gzip(&headers));

        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate"));
        assert!(accepts_gzip(&headers));

        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        assert!(!accepts_gzip(&headers));
    }

    #[test]
    fn test_default_config() {
        let config = CodeServerConfig::default();
        assert_eq!(config.port, 0);
        assert!(config.host.is_none());
        assert!(config.archive.is_none());
    }
}
