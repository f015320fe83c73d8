//! The invocation gateway, its registry and managed-object surface
//!
//! An [`InvocationGateway`] is installed once per target connection. It
//! reconstructs shipped code units with the issuing side's distribution
//! server as its class source and executes them with the local management
//! connection injected as call context. Failures are split into
//! code-resolution ("your code never ran") and execution ("your code ran
//! and raised").

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tracing::{debug, info};

use remox::codec;
use remox::connection::{
    AttributeInfo, ManagementConnection, ObjectDescriptor, ObjectId, OperationInfo, ParameterInfo,
};
use remox::error::RemoxError;
use remox::local::{LocalServer, ManagedResource};
use remox::session::{CODE_LOADER_CLASS, GATEWAY_CLASS, OP_INVOKE_CLOSURE, OP_INVOKE_SCRIPT};
use remox::unit::CodeUnit;
use remox::value::Value;
use remox::{ObjectHandle, Result};
use remox_code::repository::CodeRepository;
use remox_wasm::{HostBridge, WasmError, WasmModule, WasmRuntime};

use crate::loader::GatewayLoader;

/// Wire type name of a code unit carried as an opaque value
pub const UNIT_TYPE_NAME: &str = "remox.CodeUnit";

/// Wraps a code unit as the opaque value the gateway's unit-form overload
/// accepts
pub fn unit_value(unit: &CodeUnit) -> Result<Value> {
    Ok(Value::Opaque {
        type_name: UNIT_TYPE_NAME.to_string(),
        data: Bytes::from(codec::encode(unit)?),
    })
}

/// The envelope guest code sends through `remox.host_call`
#[derive(Debug, Deserialize)]
#[serde(tag = "op")]
enum HostRequest {
    #[serde(rename = "getAttribute")]
    GetAttribute { object: String, attribute: String },
    #[serde(rename = "setAttribute")]
    SetAttribute {
        object: String,
        attribute: String,
        value: Value,
    },
    #[serde(rename = "invoke")]
    Invoke {
        object: String,
        operation: String,
        args: Vec<Value>,
    },
    #[serde(rename = "query")]
    Query { pattern: String },
}

/// Bridges guest host-calls onto the gateway's management connection.
///
/// Guest execution happens on a blocking thread, so the bridge re-enters
/// the async world through the runtime handle captured at dispatch time.
struct ConnectionBridge {
    connection: Arc<dyn ManagementConnection>,
    handle: Handle,
}

impl ConnectionBridge {
    async fn dispatch(&self, request: HostRequest) -> Result<Value> {
        match request {
            HostRequest::GetAttribute { object, attribute } => {
                let object = ObjectId::new(object)?;
                self.connection.get_attribute(&object, &attribute).await
            }
            HostRequest::SetAttribute {
                object,
                attribute,
                value,
            } => {
                let object = ObjectId::new(object)?;
                self.connection.set_attribute(&object, &attribute, value).await?;
                Ok(Value::Null)
            }
            HostRequest::Invoke {
                object,
                operation,
                args,
            } => {
                // A fresh handle per call keeps overload resolution honest
                // against the object's current shape.
                let object = ObjectId::new(object)?;
                let handle = ObjectHandle::lookup(self.connection.clone(), object).await?;
                handle.invoke(&operation, args).await
            }
            HostRequest::Query { pattern } => {
                let ids = self.connection.query(&pattern).await?;
                Ok(Value::Array(
                    ids.into_iter()
                        .map(|id| Value::Str(id.to_string()))
                        .collect(),
                ))
            }
        }
    }
}

impl HostBridge for ConnectionBridge {
    fn call(&self, request: &str) -> std::result::Result<String, WasmError> {
        let request: HostRequest = serde_json::from_str(request)
            .map_err(|e| WasmError::Host(format!("malformed host request: {}", e)))?;
        debug!(request = ?request, "Guest host call");
        let value = self
            .handle
            .block_on(self.dispatch(request))
            .map_err(|e| WasmError::Host(e.to_string()))?;
        serde_json::to_string(&value)
            .map_err(|e| WasmError::Host(format!("unserializable host result: {}", e)))
    }
}

/// The remote-resident executor of shipped code units
pub struct InvocationGateway {
    connection: Arc<dyn ManagementConnection>,
    code_source_urls: Vec<String>,
    loader: Arc<GatewayLoader>,
    runtime: Arc<WasmRuntime>,
}

impl InvocationGateway {
    fn new(
        connection: Arc<dyn ManagementConnection>,
        code_source_urls: Vec<String>,
        repository: Arc<CodeRepository>,
        runtime: Arc<WasmRuntime>,
    ) -> Self {
        let loader = Arc::new(GatewayLoader::new(repository, &code_source_urls));
        Self {
            connection,
            code_source_urls,
            loader,
            runtime,
        }
    }

    /// The loader this gateway resolves code through
    pub fn loader(&self) -> &Arc<GatewayLoader> {
        &self.loader
    }

    /// The distribution-server URLs this gateway was installed with
    pub fn code_source_urls(&self) -> &[String] {
        &self.code_source_urls
    }

    /// Reconstructs a serialized unit and executes it.
    ///
    /// Reconstruction and module resolution failures are code-resolution
    /// errors, distinct from anything the unit raises while running.
    pub async fn invoke_unit_bytes(&self, bytes: &[u8], args: Vec<Value>) -> Result<Value> {
        let unit: CodeUnit = codec::decode(bytes).map_err(|e| {
            RemoxError::CodeResolution(format!("failed to reconstruct shipped unit: {}", e))
        })?;
        self.invoke_unit(&unit, args).await
    }

    /// Executes an already-reconstructed unit
    pub async fn invoke_unit(&self, unit: &CodeUnit, args: Vec<Value>) -> Result<Value> {
        debug!(module = unit.module(), entry = unit.entry(), "Invoking shipped unit");
        let module_bytes = self.loader.load(unit.module()).await?;
        let module = WasmModule::from_bytes(module_bytes.to_vec())
            .map_err(code_resolution)?;

        let mut supporting = Vec::with_capacity(unit.requires().len());
        for name in unit.requires() {
            let bytes = self.loader.load(name).await?;
            let supporting_module =
                WasmModule::from_bytes(bytes.to_vec()).map_err(code_resolution)?;
            supporting.push((name.clone(), supporting_module));
        }

        let input = self.execution_input(&args, unit)?;
        self.execute(module, supporting, unit.entry().to_string(), input)
            .await
    }

    /// Compiles a textual script and executes it the same way a unit runs.
    ///
    /// The script sees the same two bound names every unit sees: the local
    /// connection handle and the argument array.
    pub async fn invoke_script(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        debug!(bytes = script.len(), "Invoking script");
        let module = WasmModule::from_wat(script).map_err(code_resolution)?;
        let input = serde_json::to_string(&json!({
            "connection": self.connection.connection_id(),
            "args": args,
            "bindings": {},
        }))?;
        self.execute(module, Vec::new(), "run".to_string(), input).await
    }

    fn execution_input(&self, args: &[Value], unit: &CodeUnit) -> Result<String> {
        // The connection handle is the injected first element of the call
        // context; guests reach it through remox.host_call.
        Ok(serde_json::to_string(&json!({
            "connection": self.connection.connection_id(),
            "args": args,
            "bindings": unit.bindings(),
        }))?)
    }

    async fn execute(
        &self,
        mut module: WasmModule,
        mut supporting: Vec<(String, WasmModule)>,
        entry: String,
        input: String,
    ) -> Result<Value> {
        let bridge: Arc<dyn HostBridge> = Arc::new(ConnectionBridge {
            connection: self.connection.clone(),
            handle: Handle::current(),
        });
        let runtime = self.runtime.clone();

        let output = tokio::task::spawn_blocking(move || {
            runtime.execute(&mut module, &entry, &input, bridge, &mut supporting)
        })
        .await
        .map_err(|e| RemoxError::Execution(format!("execution task failed: {}", e)))?
        .map_err(map_wasm_error)?;

        serde_json::from_str(&output)
            .map_err(|e| RemoxError::Execution(format!("unit returned a malformed value: {}", e)))
    }
}

fn code_resolution(e: WasmError) -> RemoxError {
    RemoxError::CodeResolution(e.to_string())
}

fn map_wasm_error(e: WasmError) -> RemoxError {
    match e {
        WasmError::Link(_) | WasmError::ModuleLoad(_) | WasmError::InvalidFormat(_) => {
            RemoxError::CodeResolution(e.to_string())
        }
        WasmError::Execution(_) | WasmError::Host(_) => RemoxError::Execution(e.to_string()),
        WasmError::Io(inner) => RemoxError::Io(inner),
    }
}

/// Per-process registry holding one gateway per target connection
pub struct GatewayRegistry {
    repository: Arc<CodeRepository>,
    runtime: Arc<WasmRuntime>,
    gateways: Mutex<HashMap<String, Arc<InvocationGateway>>>,
}

impl GatewayRegistry {
    /// Creates a registry over the process's repository and runtime
    pub fn new(repository: Arc<CodeRepository>, runtime: Arc<WasmRuntime>) -> Arc<Self> {
        Arc::new(Self {
            repository,
            runtime,
            gateways: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the gateway for a connection, creating it on first use.
    ///
    /// Check-then-create runs under the registry lock: the first caller
    /// wins and concurrent racers converge on the same instance.
    pub fn obtain(
        &self,
        connection: Arc<dyn ManagementConnection>,
        code_source_urls: Vec<String>,
    ) -> Arc<InvocationGateway> {
        let mut gateways = self.gateways.lock().unwrap();
        if let Some(gateway) = gateways.get(connection.connection_id()) {
            return gateway.clone();
        }
        let connection_id = connection.connection_id().to_string();
        info!(connection = %connection_id, "Creating invocation gateway");
        let gateway = Arc::new(InvocationGateway::new(
            connection,
            code_source_urls,
            self.repository.clone(),
            self.runtime.clone(),
        ));
        gateways.insert(connection_id, gateway.clone());
        gateway
    }

    /// Drops the gateway for a closed connection
    pub fn remove(&self, connection_id: &str) -> bool {
        self.gateways.lock().unwrap().remove(connection_id).is_some()
    }

    /// Number of live gateways
    pub fn len(&self) -> usize {
        self.gateways.lock().unwrap().len()
    }

    /// True when no gateway has been created yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl remox::session::UnitExecutor for GatewayRegistry {
    async fn execute(
        &self,
        unit: &CodeUnit,
        connection: Arc<dyn ManagementConnection>,
        args: &[Value],
    ) -> Result<Value> {
        let gateway = self.obtain(connection, Vec::new());
        gateway.invoke_unit(unit, args.to_vec()).await
    }
}

/// The gateway's managed-object surface
struct GatewayResource {
    gateway: Arc<InvocationGateway>,
}

impl GatewayResource {
    fn per_class_url(&self) -> Option<&String> {
        self.gateway
            .code_source_urls()
            .iter()
            .find(|url| url.ends_with('/'))
    }
}

#[async_trait]
impl ManagedResource for GatewayResource {
    fn descriptor(&self) -> ObjectDescriptor {
        ObjectDescriptor {
            class_name: GATEWAY_CLASS.to_string(),
            attributes: vec![
                AttributeInfo::readonly("CodeBaseUrl", "string"),
                AttributeInfo::readonly("CodeSourceUrls", "string[]"),
                AttributeInfo::readonly("SourceHost", "string"),
                AttributeInfo::readonly("SourcePort", "i32"),
            ],
            operations: vec![
                OperationInfo::new(
                    OP_INVOKE_CLOSURE,
                    vec![
                        ParameterInfo::new("unitBytes", "bytes"),
                        ParameterInfo::new("arguments", "object[]"),
                    ],
                    "object",
                ),
                OperationInfo::new(
                    OP_INVOKE_CLOSURE,
                    vec![
                        ParameterInfo::new("unit", UNIT_TYPE_NAME),
                        ParameterInfo::new("arguments", "object[]"),
                    ],
                    "object",
                ),
                OperationInfo::new(
                    OP_INVOKE_SCRIPT,
                    vec![
                        ParameterInfo::new("script", "string"),
                        ParameterInfo::new("arguments", "object[]"),
                    ],
                    "object",
                ),
            ],
        }
    }

    async fn get_attribute(&self, name: &str) -> Result<Value> {
        match name {
            "CodeBaseUrl" => Ok(self
                .gateway
                .code_source_urls()
                .first()
                .map(|url| Value::Str(url.clone()))
                .unwrap_or(Value::Null)),
            "CodeSourceUrls" => Ok(Value::Array(
                self.gateway
                    .code_source_urls()
                    .iter()
                    .map(|url| Value::Str(url.clone()))
                    .collect(),
            )),
            "SourceHost" => Ok(self
                .per_class_url()
                .and_then(|url| parse_host_port(url))
                .map(|(host, _)| Value::Str(host))
                .unwrap_or(Value::Null)),
            "SourcePort" => Ok(self
                .per_class_url()
                .and_then(|url| parse_host_port(url))
                .map(|(_, port)| Value::I32(i32::from(port)))
                .unwrap_or(Value::Null)),
            other => Err(RemoxError::NoSuchAttribute {
                object: GATEWAY_CLASS.to_string(),
                attribute: other.to_string(),
            }),
        }
    }

    async fn invoke(
        &self,
        operation: &str,
        signature: &[String],
        mut args: Vec<Value>,
    ) -> Result<Value> {
        let call_args = match args.pop() {
            Some(Value::Array(values)) => values,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other],
        };
        let payload = args.pop().ok_or_else(|| RemoxError::NoSuchOperation {
            object: GATEWAY_CLASS.to_string(),
            operation: operation.to_string(),
        })?;

        match (operation, signature.first().map(String::as_str), payload) {
            (OP_INVOKE_CLOSURE, Some("bytes"), Value::Bytes(bytes)) => {
                self.gateway.invoke_unit_bytes(&bytes, call_args).await
            }
            (OP_INVOKE_CLOSURE, Some(UNIT_TYPE_NAME), Value::Opaque { data, .. }) => {
                self.gateway.invoke_unit_bytes(&data, call_args).await
            }
            (OP_INVOKE_SCRIPT, Some("string"), Value::Str(script)) => {
                self.gateway.invoke_script(&script, call_args).await
            }
            (operation, _, _) => Err(RemoxError::NoSuchOperation {
                object: GATEWAY_CLASS.to_string(),
                operation: operation.to_string(),
            }),
        }
    }
}

/// The co-installed code loader's managed-object surface
struct CodeLoaderResource {
    gateway: Arc<InvocationGateway>,
}

#[async_trait]
impl ManagedResource for CodeLoaderResource {
    fn descriptor(&self) -> ObjectDescriptor {
        ObjectDescriptor {
            class_name: CODE_LOADER_CLASS.to_string(),
            attributes: vec![
                AttributeInfo::readonly("SourceUrls", "string[]"),
                AttributeInfo::readonly("CachedModules", "i64"),
            ],
            operations: vec![],
        }
    }

    async fn get_attribute(&self, name: &str) -> Result<Value> {
        match name {
            "SourceUrls" => Ok(Value::Array(
                self.gateway
                    .code_source_urls()
                    .iter()
                    .map(|url| Value::Str(url.clone()))
                    .collect(),
            )),
            "CachedModules" => Ok(Value::I64(self.gateway.loader().cached_modules() as i64)),
            other => Err(RemoxError::NoSuchAttribute {
                object: CODE_LOADER_CLASS.to_string(),
                attribute: other.to_string(),
            }),
        }
    }

    async fn invoke(&self, operation: &str, _signature: &[String], _args: Vec<Value>) -> Result<Value> {
        Err(RemoxError::NoSuchOperation {
            object: CODE_LOADER_CLASS.to_string(),
            operation: operation.to_string(),
        })
    }
}

/// Extracts host and port from an `http://host:port/...` URL
fn parse_host_port(url: &str) -> Option<(String, u16)> {
    let rest = url.strip_prefix("http://")?;
    let authority = rest.split('/').next()?;
    let (host, port) = authority.rsplit_once(':')?;
    Some((host.to_string(), port.parse().ok()?))
}

fn source_urls_from_args(args: &[Value]) -> Result<Vec<String>> {
    let urls = match args.first() {
        Some(Value::Array(values)) => values
            .iter()
            .map(|value| {
                value
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| RemoxError::Metadata("code source URL must be a string".into()))
            })
            .collect::<Result<Vec<_>>>()?,
        _ => Vec::new(),
    };
    Ok(urls)
}

/// Registers the gateway and code-loader factories with a local server, so
/// remote `create` calls can install them.
///
/// Both factories converge through the registry, which makes installation
/// order-independent and idempotent per connection.
pub async fn register_gateway_factories(server: &Arc<LocalServer>, registry: &Arc<GatewayRegistry>) {
    let gateway_server = server.clone();
    let gateway_registry = registry.clone();
    server
        .register_factory(
            GATEWAY_CLASS,
            Box::new(move |args| {
                let urls = source_urls_from_args(&args)?;
                let gateway = gateway_registry
                    .obtain(gateway_server.clone() as Arc<dyn ManagementConnection>, urls);
                Ok(Arc::new(GatewayResource { gateway }) as Arc<dyn ManagedResource>)
            }),
        )
        .await;

    let loader_server = server.clone();
    let loader_registry = registry.clone();
    server
        .register_factory(
            CODE_LOADER_CLASS,
            Box::new(move |args| {
                let urls = source_urls_from_args(&args)?;
                let gateway = loader_registry
                    .obtain(loader_server.clone() as Arc<dyn ManagementConnection>, urls);
                Ok(Arc::new(CodeLoaderResource { gateway }) as Arc<dyn ManagedResource>)
            }),
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port() {
        assert_eq!(
            parse_host_port("http://127.0.0.1:49152/classloader/"),
            Some(("127.0.0.1".to_string(), 49152))
        );
        assert_eq!(parse_host_port("https://h:1/x"), None);
        assert_eq!(parse_host_port("http://hostonly/x"), None);
    }

    #[test]
    fn test_source_urls_from_args() {
        let urls = source_urls_from_args(&[Value::Array(vec![
            Value::Str("http://h:1/classloader/".into()),
        ])])
        .unwrap();
        assert_eq!(urls, ["http://h:1/classloader/"]);

        assert!(source_urls_from_args(&[]).unwrap().is_empty());
        assert!(source_urls_from_args(&[Value::Array(vec![Value::I64(1)])]).is_err());
    }

    #[test]
    fn test_unit_value_wraps_codec_bytes() {
        let unit = CodeUnit::builder("demo.probe").build();
        let value = unit_value(&unit).unwrap();
        match value {
            Value::Opaque { type_name, data } => {
                assert_eq!(type_name, UNIT_TYPE_NAME);
                let decoded: CodeUnit = codec::decode(&data).unwrap();
                assert_eq!(decoded.module(), "demo.probe");
            }
            other => panic!("Expected opaque value, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_registry_singleton_per_connection() {
        let registry = GatewayRegistry::new(
            Arc::new(CodeRepository::new()),
            Arc::new(WasmRuntime::new().unwrap()),
        );
        let server = LocalServer::with_id("target-a");
        let other = LocalServer::with_id("target-b");

        let first = registry.obtain(server.clone(), vec![]);
        let again = registry.obtain(server.clone(), vec!["ignored".into()]);
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(registry.len(), 1);

        let second = registry.obtain(other, vec![]);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 2);

        assert!(registry.remove("target-b"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_registry_converges_under_contention() {
        let registry = GatewayRegistry::new(
            Arc::new(CodeRepository::new()),
            Arc::new(WasmRuntime::new().unwrap()),
        );
        let server = LocalServer::with_id("contended-target");

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let server = server.clone();
                tokio::spawn(async move { registry.obtain(server, vec![]) })
            })
            .collect();

        let mut gateways = Vec::new();
        for task in tasks {
            gateways.push(task.await.unwrap());
        }
        assert_eq!(registry.len(), 1);
        for gateway in &gateways[1..] {
            assert!(Arc::ptr_eq(&gateways[0], gateway));
        }
    }
}
