//! Session surface for attach, exec and gateway installation
//!
//! An [`MxSession`] wraps a management connection and adds the mobile-code
//! workflow on top of it: build a unit locally, dehydrate it, ship it to the
//! remote invocation gateway, and hand back the result. Gateway installation
//! is idempotent and guarded so concurrent callers converge on one gateway.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::codec;
use crate::connection::{ListenerId, ManagementConnection, Notification, NotificationListener, ObjectId};
use crate::error::RemoxError;
use crate::handle::ObjectHandle;
use crate::unit::{CodeUnit, Dehydrator};
use crate::value::Value;
use crate::Result;

/// Class name the remote side instantiates for the invocation gateway
pub const GATEWAY_CLASS: &str = "remox.gateway.InvocationGateway";
/// Class name the remote side instantiates for the co-installed code loader
pub const CODE_LOADER_CLASS: &str = "remox.gateway.CodeLoader";

/// Operation name for shipping a serialized code unit
pub const OP_INVOKE_CLOSURE: &str = "invokeClosure";
/// Operation name for evaluating a textual script
pub const OP_INVOKE_SCRIPT: &str = "invokeScript";

/// Executes code units against a management connection.
///
/// The gateway crate provides the WebAssembly-backed implementation; a
/// session configured with one can run units in-process for local
/// connections instead of shipping them.
#[async_trait]
pub trait UnitExecutor: Send + Sync {
    /// Runs the unit with the connection injected as its call context
    async fn execute(
        &self,
        unit: &CodeUnit,
        connection: Arc<dyn ManagementConnection>,
        args: &[Value],
    ) -> Result<Value>;
}

/// The gateway and its co-installed code loader, as seen by the caller
#[derive(Clone)]
pub struct RemoteEndpoints {
    /// Handle to the installed invocation gateway
    pub gateway: Arc<ObjectHandle>,
    /// Handle to the co-installed code loader object
    pub loader: Arc<ObjectHandle>,
}

/// Builder for [`MxSession`]
pub struct MxSessionBuilder {
    connection: Arc<dyn ManagementConnection>,
    code_sources: Vec<String>,
    executor: Option<Arc<dyn UnitExecutor>>,
}

impl MxSessionBuilder {
    /// Sets the distribution-server URLs remote loaders should fetch from
    pub fn code_sources(mut self, urls: Vec<String>) -> Self {
        self.code_sources = urls;
        self
    }

    /// Takes the code base URLs from a running distribution server
    pub fn code_server(mut self, server: &remox_code::CodeServer) -> Self {
        self.code_sources = server.http_code_base_urls();
        self
    }

    /// Configures an in-process unit executor for local connections
    pub fn executor(mut self, executor: Arc<dyn UnitExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Builds the session
    pub fn build(self) -> MxSession {
        MxSession {
            connection: self.connection,
            code_sources: self.code_sources,
            executor: self.executor,
            dehydrator: Dehydrator::new(),
            remote: Mutex::new(None),
        }
    }
}

/// A session over one management connection
pub struct MxSession {
    connection: Arc<dyn ManagementConnection>,
    code_sources: Vec<String>,
    executor: Option<Arc<dyn UnitExecutor>>,
    dehydrator: Dehydrator,
    remote: Mutex<Option<RemoteEndpoints>>,
}

impl MxSession {
    /// Starts building a session over a connection
    pub fn builder(connection: Arc<dyn ManagementConnection>) -> MxSessionBuilder {
        MxSessionBuilder {
            connection,
            code_sources: Vec::new(),
            executor: None,
        }
    }

    /// The underlying connection
    pub fn connection(&self) -> &Arc<dyn ManagementConnection> {
        &self.connection
    }

    /// Looks up a managed object and builds its handle
    pub async fn object(&self, object_id: ObjectId) -> Result<ObjectHandle> {
        ObjectHandle::lookup(self.connection.clone(), object_id).await
    }

    /// Lists object ids matching a `*`-wildcard pattern
    pub async fn query_ids(&self, pattern: &str) -> Result<Vec<ObjectId>> {
        self.connection.query(pattern).await
    }

    /// Registers a closure as a notification listener on an object
    pub async fn add_listener<F>(&self, object: &ObjectId, callback: F) -> Result<ListenerId>
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        struct FnListener<F>(F);
        impl<F: Fn(&Notification) + Send + Sync> NotificationListener for FnListener<F> {
            fn on_notification(&self, notification: &Notification) {
                (self.0)(notification);
            }
        }
        self.connection
            .add_listener(object, Arc::new(FnListener(callback)))
            .await
    }

    /// Removes a previously registered listener
    pub async fn remove_listener(&self, object: &ObjectId, listener: ListenerId) -> Result<()> {
        self.connection.remove_listener(object, listener).await
    }

    /// Executes a code unit with this session's connection injected as the
    /// first element of its call context.
    ///
    /// Local connections with a configured executor run the unit in-process;
    /// everything else ships it: the unit is dehydrated, encoded, and sent
    /// through the installed invocation gateway.
    pub async fn exec(&self, mut unit: CodeUnit, args: Vec<Value>) -> Result<Value> {
        if self.connection.is_local() {
            if let Some(executor) = &self.executor {
                unit.ensure_locally_invocable()?;
                debug!(module = %unit.module(), "Executing unit in-process");
                return executor.execute(&unit, self.connection.clone(), &args).await;
            }
        }
        let endpoints = self.install_gateway().await?;
        self.dehydrator.dehydrate(&mut unit);
        let bytes = codec::encode(&unit)?;
        endpoints
            .gateway
            .invoke(
                OP_INVOKE_CLOSURE,
                vec![Value::Bytes(bytes.into()), Value::Array(args)],
            )
            .await
    }

    /// Executes a unit locally, suppressing remoting.
    ///
    /// Requires a configured executor and a unit that has not been
    /// dehydrated.
    pub async fn exec_local(&self, unit: &CodeUnit, args: Vec<Value>) -> Result<Value> {
        unit.ensure_locally_invocable()?;
        let executor = self.executor.as_ref().ok_or_else(|| {
            RemoxError::Execution("no unit executor configured for local execution".to_string())
        })?;
        executor.execute(unit, self.connection.clone(), &args).await
    }

    /// Evaluates a textual script on the remote side.
    ///
    /// The script is bound to the remote connection handle and the argument
    /// array; this is the lighter-weight alternative to shipping a unit.
    pub async fn exec_script(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        let endpoints = self.install_gateway().await?;
        endpoints
            .gateway
            .invoke(
                OP_INVOKE_SCRIPT,
                vec![Value::Str(script.to_string()), Value::Array(args)],
            )
            .await
    }

    /// Installs the invocation gateway and its code loader on the target
    /// connection, or hands back the existing endpoints.
    ///
    /// First caller wins; concurrent callers converge on the same instances.
    pub async fn install_gateway(&self) -> Result<RemoteEndpoints> {
        let mut installed = self.remote.lock().await;
        if let Some(endpoints) = installed.as_ref() {
            return Ok(endpoints.clone());
        }
        if self.code_sources.is_empty() {
            return Err(RemoxError::CodeResolution(
                "no code sources configured; start a distribution server first".to_string(),
            ));
        }

        let gateway_id = gateway_object_id(&self.code_sources)?;
        let loader_id = loader_object_id(&self.code_sources)?;
        let urls = Value::Array(
            self.code_sources
                .iter()
                .map(|url| Value::Str(url.clone()))
                .collect(),
        );

        if !self.connection.is_registered(&gateway_id).await? {
            // The loader goes first so the gateway can resolve code
            // through it from the moment it exists.
            if !self.connection.is_registered(&loader_id).await? {
                self.connection
                    .create(CODE_LOADER_CLASS, &loader_id, vec![urls.clone()])
                    .await?;
            }
            self.connection
                .create(GATEWAY_CLASS, &gateway_id, vec![urls])
                .await?;
            info!(gateway = %gateway_id, "Installed invocation gateway");
        } else {
            debug!(gateway = %gateway_id, "Invocation gateway already installed");
        }

        let gateway = Arc::new(ObjectHandle::lookup(self.connection.clone(), gateway_id).await?);
        let loader = Arc::new(ObjectHandle::lookup(self.connection.clone(), loader_id).await?);
        let endpoints = RemoteEndpoints { gateway, loader };
        *installed = Some(endpoints.clone());
        Ok(endpoints)
    }
}

/// Object id the gateway is installed under for a given source-URL set
pub fn gateway_object_id(code_sources: &[String]) -> Result<ObjectId> {
    ObjectId::new(format!(
        "remox.remote:type=InvocationGateway,source={:016x}",
        source_key(code_sources)
    ))
}

/// Object id the code loader is installed under for a given source-URL set
pub fn loader_object_id(code_sources: &[String]) -> Result<ObjectId> {
    ObjectId::new(format!(
        "remox.remote:type=CodeLoader,source={:016x}",
        source_key(code_sources)
    ))
}

/// Deterministic FNV-1a key over the ordered source URLs
fn source_key(code_sources: &[String]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = FNV_OFFSET;
    for url in code_sources {
        for byte in url.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash ^= u64::from(b'\n');
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
