//! Test utilities for WASM module testing

/// Canned guest modules implementing the mobile-code ABI
pub mod test_modules {
    use std::sync::OnceLock;

    /// Common alloc implementation: a bump allocator starting above the
    /// data segments
    const ALLOC_WAT: &str = r#"
      (global $next (mut i32) (i32.const 65536))
      (func (export "alloc") (param $n i32) (result i32)
        (local $p i32)
        (local.set $p (global.get $next))
        (global.set $next (i32.add (global.get $next) (local.get $n)))
        (local.get $p))"#;

    fn generate_minimal_wasm() -> Vec<u8> {
        wat::parse_str("(module)").unwrap()
    }

    fn generate_echo_wasm() -> Vec<u8> {
        wat::parse_str(format!(
            r#"
            (module
              (memory (export "memory") 4)
              {ALLOC_WAT}
              (func (export "run") (param $ptr i32) (param $len i32) (result i64)
                (i64.or
                  (i64.shl (i64.extend_i32_u (local.get $ptr)) (i64.const 32))
                  (i64.extend_i32_u (local.get $len)))))
        "#
        ))
        .unwrap()
    }

    fn generate_host_passthrough_wasm() -> Vec<u8> {
        wat::parse_str(format!(
            r#"
            (module
              (import "remox" "host_call" (func $host_call (param i32 i32) (result i64)))
              (memory (export "memory") 4)
              {ALLOC_WAT}
              (func (export "run") (param $ptr i32) (param $len i32) (result i64)
                (call $host_call (local.get $ptr) (local.get $len))))
        "#
        ))
        .unwrap()
    }

    fn generate_trapping_wasm() -> Vec<u8> {
        wat::parse_str(format!(
            r#"
            (module
              (memory (export "memory") 2)
              {ALLOC_WAT}
              (func (export "run") (param i32 i32) (result i64)
                unreachable))
        "#
        ))
        .unwrap()
    }

    // Use OnceLock to cache the generated WASM modules
    static MINIMAL_WASM: OnceLock<Vec<u8>> = OnceLock::new();
    static ECHO_WASM: OnceLock<Vec<u8>> = OnceLock::new();
    static HOST_PASSTHROUGH_WASM: OnceLock<Vec<u8>> = OnceLock::new();
    static TRAPPING_WASM: OnceLock<Vec<u8>> = OnceLock::new();

    /// A minimal valid WASM module that does nothing
    pub fn minimal_wasm() -> &'static [u8] {
        MINIMAL_WASM.get_or_init(generate_minimal_wasm)
    }

    /// Returns its input region unchanged
    pub fn echo_wasm() -> &'static [u8] {
        ECHO_WASM.get_or_init(generate_echo_wasm)
    }

    /// Forwards its input to `remox.host_call` and returns the response
    pub fn host_passthrough_wasm() -> &'static [u8] {
        HOST_PASSTHROUGH_WASM.get_or_init(generate_host_passthrough_wasm)
    }

    /// Hits `unreachable` immediately
    pub fn trapping_wasm() -> &'static [u8] {
        TRAPPING_WASM.get_or_init(generate_trapping_wasm)
    }

    /// A module whose entry returns the given string, byte for byte
    pub fn static_result_wasm(result: &str) -> Vec<u8> {
        wat::parse_str(format!(
            r#"
            (module
              (memory (export "memory") 4)
              (data (i32.const 1024) "{escaped}")
              {ALLOC_WAT}
              (func (export "run") (param i32 i32) (result i64)
                (i64.or
                  (i64.shl (i64.const 1024) (i64.const 32))
                  (i64.const {len}))))
        "#,
            escaped = escape_wat(result),
            len = result.len(),
        ))
        .unwrap()
    }

    /// A module whose entry issues the given host-call request and returns
    /// the bridge's response
    pub fn static_request_wasm(request: &str) -> Vec<u8> {
        wat::parse_str(format!(
            r#"
            (module
              (import "remox" "host_call" (func $host_call (param i32 i32) (result i64)))
              (memory (export "memory") 4)
              (data (i32.const 1024) "{escaped}")
              {ALLOC_WAT}
              (func (export "run") (param i32 i32) (result i64)
                (call $host_call (i32.const 1024) (i32.const {len}))))
        "#,
            escaped = escape_wat(request),
            len = request.len(),
        ))
        .unwrap()
    }

    /// Invalid WASM with wrong magic number
    pub const INVALID_MAGIC_WASM: &[u8] = &[
        0xFF, 0xFF, 0xFF, 0xFF, // wrong magic
        0x01, 0x00, 0x00, 0x00, // version
    ];

    fn escape_wat(text: &str) -> String {
        text.replace('\\', "\\\\").replace('"', "\\\"")
    }
}
