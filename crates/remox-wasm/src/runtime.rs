//! WASM execution runtime and the host-call bridge
//!
//! ## Guest ABI
//!
//! A mobile code module exports `memory`, an `alloc(len) -> ptr` function,
//! and its entry function `entry(ptr, len) -> packed`, where `(ptr, len)`
//! addresses the UTF-8 JSON input the runtime wrote into guest memory and
//! `packed` is `(ptr << 32) | len` of the UTF-8 JSON result.
//!
//! Guests reach back into the host through one import,
//! `remox.host_call(ptr, len) -> packed`, carrying a JSON envelope to the
//! [`HostBridge`]. The bridge is how a management connection is injected
//! into guest execution; a bridge failure traps the guest.

use std::sync::Arc;
use tracing::debug;
use wasmtime::{Caller, Config, Engine, Extern, Linker, Store};

use crate::error::WasmError;
use crate::module::WasmModule;

/// Handles host calls issued by executing guest code
pub trait HostBridge: Send + Sync {
    /// Processes one request envelope and returns the response payload
    fn call(&self, request: &str) -> Result<String, WasmError>;
}

impl<F> HostBridge for F
where
    F: Fn(&str) -> Result<String, WasmError> + Send + Sync,
{
    fn call(&self, request: &str) -> Result<String, WasmError> {
        (self)(request)
    }
}

/// Configuration for WASM execution
#[derive(Debug, Clone)]
pub struct WasmConfig {
    /// Maximum fuel (instruction count limit); `None` disables metering
    pub max_fuel: Option<u64>,
    /// Maximum guest stack size in bytes
    pub max_stack: usize,
}

impl Default for WasmConfig {
    fn default() -> Self {
        Self {
            max_fuel: Some(10_000_000),
            max_stack: 1024 * 1024, // 1MB stack
        }
    }
}

struct HostState {
    bridge: Arc<dyn HostBridge>,
}

/// WASM execution runtime with wasmtime integration
pub struct WasmRuntime {
    engine: Engine,
    config: WasmConfig,
}

impl WasmRuntime {
    /// Create a new runtime with default configuration
    pub fn new() -> Result<Self, WasmError> {
        Self::with_config(WasmConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(config: WasmConfig) -> Result<Self, WasmError> {
        let mut wasmtime_config = Config::new();
        wasmtime_config.max_wasm_stack(config.max_stack);
        if config.max_fuel.is_some() {
            wasmtime_config.consume_fuel(true);
        }
        let engine = Engine::new(&wasmtime_config)
            .map_err(|e| WasmError::ModuleLoad(format!("engine setup failed: {}", e)))?;
        Ok(WasmRuntime { engine, config })
    }

    /// Get the runtime configuration
    pub fn config(&self) -> &WasmConfig {
        &self.config
    }

    /// Executes a module's entry function with a JSON input payload.
    ///
    /// Supporting modules are instantiated and linked first, under their
    /// given names, so the entry module's imports resolve against them.
    /// Link-phase failures (missing imports, missing exports, wrong entry
    /// type) are reported as [`WasmError::Link`]; anything raised while the
    /// guest runs is [`WasmError::Execution`].
    pub fn execute(
        &self,
        module: &mut WasmModule,
        entry: &str,
        input: &str,
        bridge: Arc<dyn HostBridge>,
        supporting: &mut [(String, WasmModule)],
    ) -> Result<String, WasmError> {
        if input.len() > i32::MAX as usize {
            return Err(WasmError::Execution("input payload too large".to_string()));
        }

        let compiled = module.get_compiled(&self.engine)?.clone();
        let mut store = Store::new(&self.engine, HostState { bridge });
        if let Some(fuel) = self.config.max_fuel {
            store
                .add_fuel(fuel)
                .map_err(|e| WasmError::Execution(format!("fuel setup failed: {}", e)))?;
        }

        let mut linker: Linker<HostState> = Linker::new(&self.engine);
        linker
            .func_wrap("remox", "host_call", host_call)
            .map_err(|e| WasmError::Link(format!("host function setup failed: {}", e)))?;

        for (name, supporting_module) in supporting.iter_mut() {
            let compiled_support = supporting_module.get_compiled(&self.engine)?.clone();
            linker
                .module(&mut store, name, &compiled_support)
                .map_err(|e| WasmError::Link(format!("failed to link [{}]: {}", name, e)))?;
        }

        let instance = linker
            .instantiate(&mut store, &compiled)
            .map_err(|e| WasmError::Link(format!("instantiation failed: {}", e)))?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| WasmError::Link("guest does not export [memory]".to_string()))?;
        let alloc = instance
            .get_typed_func::<i32, i32>(&mut store, "alloc")
            .map_err(|e| WasmError::Link(format!("guest [alloc] unusable: {}", e)))?;
        let run = instance
            .get_typed_func::<(i32, i32), i64>(&mut store, entry)
            .map_err(|e| WasmError::Link(format!("guest entry [{}] unusable: {}", entry, e)))?;

        let input_ptr = alloc
            .call(&mut store, input.len() as i32)
            .map_err(|e| WasmError::Execution(format!("input allocation failed: {}", e)))?;
        memory
            .write(&mut store, input_ptr as usize, input.as_bytes())
            .map_err(|e| WasmError::Execution(format!("input write failed: {}", e)))?;

        debug!(entry, input_bytes = input.len(), "Executing mobile code module");
        let packed = run
            .call(&mut store, (input_ptr, input.len() as i32))
            .map_err(|e| WasmError::Execution(format!("{}", e.root_cause())))?;

        let (out_ptr, out_len) = unpack_region(packed);
        let data = memory.data(&store);
        let start = out_ptr as usize;
        let end = start
            .checked_add(out_len as usize)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| WasmError::Execution("result region out of bounds".to_string()))?;
        String::from_utf8(data[start..end].to_vec())
            .map_err(|e| WasmError::Execution(format!("result not UTF-8: {}", e)))
    }
}

/// The single guest-visible host function
fn host_call(
    mut caller: Caller<'_, HostState>,
    ptr: i32,
    len: i32,
) -> Result<i64, wasmtime::Error> {
    let memory = caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| wasmtime::Error::msg("guest does not export [memory]"))?;

    let mut request = vec![0u8; len as usize];
    memory
        .read(&caller, ptr as usize, &mut request)
        .map_err(|e| wasmtime::Error::msg(format!("host call read failed: {}", e)))?;
    let request = String::from_utf8(request)
        .map_err(|e| wasmtime::Error::msg(format!("host call request not UTF-8: {}", e)))?;

    let bridge = caller.data().bridge.clone();
    let response = bridge
        .call(&request)
        .map_err(|e| wasmtime::Error::msg(e.to_string()))?;

    let alloc = caller
        .get_export("alloc")
        .and_then(Extern::into_func)
        .ok_or_else(|| wasmtime::Error::msg("guest does not export [alloc]"))?
        .typed::<i32, i32>(&caller)
        .map_err(|e| wasmtime::Error::msg(format!("guest [alloc] unusable: {}", e)))?;
    let out_ptr = alloc.call(&mut caller, response.len() as i32)?;
    memory
        .write(&mut caller, out_ptr as usize, response.as_bytes())
        .map_err(|e| wasmtime::Error::msg(format!("host call write failed: {}", e)))?;

    Ok(pack_region(out_ptr, response.len() as i32))
}

fn pack_region(ptr: i32, len: i32) -> i64 {
    (((ptr as u32 as u64) << 32) | (len as u32 as u64)) as i64
}

fn unpack_region(packed: i64) -> (u32, u32) {
    ((packed as u64 >> 32) as u32, packed as u64 as u32)
}
