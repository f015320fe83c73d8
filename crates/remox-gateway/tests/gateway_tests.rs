//! End-to-end tests for mobile code shipping
//!
//! The "remote process" is an in-process management server with the gateway
//! factories registered; the issuing side runs a real distribution server
//! on a loopback port. Units referencing modules the remote side does not
//! have are resolved over live HTTP.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex};

use remox::connection::{
    AttributeInfo, ManagementConnection, ObjectDescriptor, ObjectId, OperationInfo, ParameterInfo,
};
use remox::error::RemoxError;
use remox::local::{LocalServer, ManagedResource};
use remox::session::OP_INVOKE_CLOSURE;
use remox::value::Value;
use remox::{CodeUnit, MxSession, Result};
use remox_code::server::{CodeServer, CodeServerConfig};
use remox_code::{CodeRepository, ModuleIdentity, NullInstrumentation};
use remox_gateway::{register_gateway_factories, unit_value, GatewayRegistry};
use remox_wasm::test_utils::test_modules::{static_request_wasm, trapping_wasm};
use remox_wasm::WasmRuntime;

/// Counter managed object living in the "remote" process
struct Counter {
    count: Mutex<i64>,
}

#[async_trait]
impl ManagedResource for Counter {
    fn descriptor(&self) -> ObjectDescriptor {
        ObjectDescriptor {
            class_name: "remox.test.Counter".into(),
            attributes: vec![AttributeInfo::readonly("Count", "i64")],
            operations: vec![OperationInfo::new(
                "add",
                vec![ParameterInfo::new("delta", "i64")],
                "i64",
            )],
        }
    }

    async fn get_attribute(&self, name: &str) -> Result<Value> {
        match name {
            "Count" => Ok(Value::I64(*self.count.lock().unwrap())),
            other => Err(RemoxError::NoSuchAttribute {
                object: "remox.test.Counter".into(),
                attribute: other.to_string(),
            }),
        }
    }

    async fn invoke(&self, operation: &str, _signature: &[String], args: Vec<Value>) -> Result<Value> {
        match operation {
            "add" => {
                let delta = args.first().and_then(Value::as_i64).unwrap_or(0);
                let mut count = self.count.lock().unwrap();
                *count += delta;
                Ok(Value::I64(*count))
            }
            other => Err(RemoxError::NoSuchOperation {
                object: "remox.test.Counter".into(),
                operation: other.to_string(),
            }),
        }
    }
}

const COUNTER_ID: &str = "remox.test:type=Counter";

/// Builds the remote process: a local server with the counter registered
/// and the gateway factories installed.
async fn remote_process(initial_count: i64) -> (Arc<LocalServer>, Arc<CodeRepository>, Arc<GatewayRegistry>) {
    let server = LocalServer::new();
    let repository = Arc::new(CodeRepository::new());
    let runtime = Arc::new(WasmRuntime::new().unwrap());
    let registry = GatewayRegistry::new(repository.clone(), runtime);
    register_gateway_factories(&server, &registry).await;
    server
        .register(
            ObjectId::new(COUNTER_ID).unwrap(),
            Arc::new(Counter {
                count: Mutex::new(initial_count),
            }),
        )
        .await;
    (server, repository, registry)
}

/// Starts the issuing side's distribution server over a repository holding
/// the given modules.
async fn issuing_side(
    modules: &[(&str, Vec<u8>)],
) -> (CodeServer, Vec<Arc<remox_code::CodeEntry>>) {
    let repository = Arc::new(CodeRepository::new());
    let owned: Vec<_> = modules
        .iter()
        .map(|(name, bytes)| {
            repository.put(
                ModuleIdentity::new(*name).unwrap(),
                Bytes::from(bytes.clone()),
            )
        })
        .collect();
    let server = CodeServer::start(
        CodeServerConfig {
            host: Some("127.0.0.1".to_string()),
            ..Default::default()
        },
        repository,
        Arc::new(NullInstrumentation),
    )
    .await
    .unwrap();
    (server, owned)
}

fn get_count_request() -> String {
    format!(
        r#"{{"op":"getAttribute","object":"{}","attribute":"Count"}}"#,
        COUNTER_ID
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn test_round_trip_code_shipping() {
    let (remote, remote_repository, _registry) = remote_process(7).await;
    let probe = static_request_wasm(&get_count_request());
    let (code_server, _owned) = issuing_side(&[("demo.probe", probe)]).await;

    let session = MxSession::builder(remote.clone())
        .code_server(&code_server)
        .build();

    // The remote side has never seen demo.probe; it must fetch it from the
    // issuing side's distribution server, execute it against its own
    // connection, and hand the attribute value back.
    let unit = CodeUnit::builder("demo.probe").build();
    let result = session.exec(unit, vec![]).await.unwrap();
    assert_eq!(result, Value::I64(7));

    // The fetched module was adopted into the remote repository.
    assert!(remote_repository.get_by_name("demo.probe").is_some());

    // Second dispatch reuses the installed gateway and the cached module.
    let unit = CodeUnit::builder("demo.probe").build();
    let result = session.exec(unit, vec![]).await.unwrap();
    assert_eq!(result, Value::I64(7));

    code_server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_guest_invokes_operations_with_overload_resolution() {
    let (remote, _repository, _registry) = remote_process(7).await;
    let request = format!(
        r#"{{"op":"invoke","object":"{}","operation":"add","args":[{{"I64":5}}]}}"#,
        COUNTER_ID
    );
    let adder = static_request_wasm(&request);
    let (code_server, _owned) = issuing_side(&[("demo.adder", adder)]).await;

    let session = MxSession::builder(remote.clone())
        .code_server(&code_server)
        .build();

    let result = session
        .exec(CodeUnit::builder("demo.adder").build(), vec![])
        .await
        .unwrap();
    assert_eq!(result, Value::I64(12));

    code_server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreachable_server_is_a_code_resolution_failure() {
    let (remote, _repository, _registry) = remote_process(0).await;

    // Nothing listens on the discard port.
    let session = MxSession::builder(remote)
        .code_sources(vec!["http://127.0.0.1:9/classloader/".to_string()])
        .build();

    let err = session
        .exec(CodeUnit::builder("demo.ghost").build(), vec![])
        .await
        .unwrap_err();
    assert!(
        matches!(err, RemoxError::CodeResolution(_)),
        "expected code resolution failure, got {:?}",
        err
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_execution_failure_is_distinct_from_code_resolution() {
    let (remote, _repository, _registry) = remote_process(0).await;
    let (code_server, _owned) =
        issuing_side(&[("demo.trap", trapping_wasm().to_vec())]).await;

    let session = MxSession::builder(remote)
        .code_server(&code_server)
        .build();

    let err = session
        .exec(CodeUnit::builder("demo.trap").build(), vec![])
        .await
        .unwrap_err();
    assert!(
        matches!(err, RemoxError::Execution(_)),
        "expected execution failure, got {:?}",
        err
    );

    code_server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_script_execution() {
    let (remote, _repository, _registry) = remote_process(0).await;
    let (code_server, _owned) = issuing_side(&[]).await;

    let session = MxSession::builder(remote)
        .code_server(&code_server)
        .build();

    let payload = r#"{"Str":"from-script"}"#;
    let script = format!(
        r#"
        (module
          (memory (export "memory") 2)
          (data (i32.const 1024) "{}")
          (global $next (mut i32) (i32.const 65536))
          (func (export "alloc") (param $n i32) (result i32)
            (local $p i32)
            (local.set $p (global.get $next))
            (global.set $next (i32.add (global.get $next) (local.get $n)))
            (local.get $p))
          (func (export "run") (param i32 i32) (result i64)
            (i64.or
              (i64.shl (i64.const 1024) (i64.const 32))
              (i64.const {}))))
    "#,
        payload.replace('\\', "\\\\").replace('"', "\\\""),
        payload.len()
    );

    let result = session.exec_script(&script, vec![]).await.unwrap();
    assert_eq!(result, Value::Str("from-script".to_string()));

    // A script that does not even compile never ran: code resolution.
    let err = session.exec_script("(module (broken", vec![]).await.unwrap_err();
    assert!(matches!(err, RemoxError::CodeResolution(_)));

    code_server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unit_form_overload_on_the_gateway() {
    let (remote, _repository, _registry) = remote_process(3).await;
    let probe = static_request_wasm(&get_count_request());
    let (code_server, _owned) = issuing_side(&[("demo.probe", probe)]).await;

    let session = MxSession::builder(remote)
        .code_server(&code_server)
        .build();
    let endpoints = session.install_gateway().await.unwrap();

    // Same operation name, same arity: the opaque unit value must select
    // the unit-form signature over the bytes form.
    let unit = CodeUnit::builder("demo.probe").build();
    let result = endpoints
        .gateway
        .invoke(
            OP_INVOKE_CLOSURE,
            vec![unit_value(&unit).unwrap(), Value::Array(vec![])],
        )
        .await
        .unwrap();
    assert_eq!(result, Value::I64(3));

    code_server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_gateway_attributes_report_the_source() {
    let (remote, _repository, _registry) = remote_process(0).await;
    let (code_server, _owned) = issuing_side(&[]).await;

    let session = MxSession::builder(remote)
        .code_server(&code_server)
        .build();
    let endpoints = session.install_gateway().await.unwrap();

    let host = endpoints.gateway.get("SourceHost").await.unwrap();
    assert_eq!(host, Value::Str("127.0.0.1".to_string()));

    let port = endpoints.gateway.get("SourcePort").await.unwrap();
    assert_eq!(port, Value::I32(i32::from(code_server.port())));

    let base = endpoints.gateway.get("CodeBaseUrl").await.unwrap();
    assert_eq!(
        base,
        Value::Str(code_server.http_code_base_urls()[0].clone())
    );

    let cached = endpoints.loader.get("CachedModules").await.unwrap();
    assert_eq!(cached, Value::I64(0));

    code_server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_local_execution_through_the_executor() {
    let (remote, repository, registry) = remote_process(9).await;

    // The module is already present in the process-local repository, so
    // execution needs neither an install nor a distribution server.
    let probe = static_request_wasm(&get_count_request());
    let _owned = repository.put(
        ModuleIdentity::new("demo.probe").unwrap(),
        Bytes::from(probe),
    );

    let session = MxSession::builder(remote.clone())
        .executor(registry.clone())
        .build();

    let unit = CodeUnit::builder("demo.probe").build();
    let result = session.exec(unit, vec![]).await.unwrap();
    assert_eq!(result, Value::I64(9));

    // exec_local takes the same path explicitly.
    let unit = CodeUnit::builder("demo.probe").build();
    let result = session.exec_local(&unit, vec![]).await.unwrap();
    assert_eq!(result, Value::I64(9));

    // Nothing was installed as a managed object.
    let installed = remote.query("remox.remote:*").await.unwrap();
    assert!(installed.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_installation_converges() {
    let (remote, _repository, registry) = remote_process(0).await;
    let (code_server, _owned) = issuing_side(&[]).await;

    let session_a = Arc::new(
        MxSession::builder(remote.clone())
            .code_server(&code_server)
            .build(),
    );
    let session_b = Arc::new(
        MxSession::builder(remote.clone())
            .code_server(&code_server)
            .build(),
    );

    let (first, second) = tokio::join!(
        {
            let session = session_a.clone();
            async move { session.install_gateway().await }
        },
        {
            let session = session_b.clone();
            async move { session.install_gateway().await }
        }
    );
    let first = first.unwrap();
    let second = second.unwrap();

    // Exactly one gateway exists; both callers address the same object.
    assert_eq!(registry.len(), 1);
    assert_eq!(first.gateway.object_id(), second.gateway.object_id());

    let installed = remote.query("remox.remote:*").await.unwrap();
    assert_eq!(installed.len(), 2, "one gateway and one code loader");

    code_server.stop().await;
}
