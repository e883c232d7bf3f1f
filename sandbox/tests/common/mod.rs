//! Shared test helpers for integration tests.
//!
//! Provides the WAT guest module every integration test drives, plus bridge
//! factory functions wired to deterministic host services.
//!
//! Guest memory layout:
//! ```text
//! [0, 1024)      scratch stack, grows down from 1024
//! [2048, 2400)   constant strings
//! [4096, ...)    bump heap; bridge_free only counts
//! ```
//! Function table: 0 = destructor, 1..=3 = invoke trampolines by arity.

#![allow(dead_code)]

use lightbridge_hostapi::{MemEnvironment, MemTransport};
use lightbridge_sandbox::marshal::{self, GuestSlice};
use lightbridge_sandbox::state::{call_guest, export_func};
use lightbridge_sandbox::{Bridge, HostValue, Sandbox, SandboxConfig, SandboxError};

pub const GUEST_WAT: &str = r#"
(module
  (import "host" "object_drop_ref" (func $drop (param i32)))
  (import "host" "number_new" (func $number_new (param f64) (result i32)))
  (import "host" "number_get" (func $number_get (param i32 i32)))
  (import "host" "string_new" (func $string_new (param i32 i32) (result i32)))
  (import "host" "error_new" (func $error_new (param i32 i32) (result i32)))
  (import "host" "throw" (func $throw (param i32 i32)))
  (import "host" "is_function" (func $is_function (param i32) (result i32)))
  (import "host" "is_uint8array" (func $is_uint8array (param i32) (result i32)))
  (import "host" "uint8array_length" (func $u8_len (param i32) (result i32)))
  (import "host" "uint8array_copy_to_guest" (func $u8_copy (param i32 i32)))
  (import "host" "uint8array_new_with_length" (func $u8_new (param i32) (result i32)))
  (import "host" "function_call1" (func $call1 (param i32 i32) (result i32)))
  (import "host" "closure_new" (func $closure_new (param i32 i32 i32 i32 i32) (result i32)))
  (import "host" "cb_drop" (func $cb_drop (param i32) (result i32)))
  (import "host" "promise_new" (func $promise_new (param i32 i32 i32) (result i32)))
  (import "host" "promise_resolve" (func $promise_resolve (param i32) (result i32)))
  (import "host" "set_timeout" (func $set_timeout (param i32 i32) (result i32)))
  (import "host" "clear_timeout" (func $clear_timeout (param i32)))
  (import "host" "queue_microtask" (func $queue_microtask (param i32)))
  (import "host" "console_log" (func $console_log (param i32)))
  (import "host" "console_error" (func $console_error (param i32)))
  (import "host" "random_fill" (func $random_fill (param i32 i32)))
  (import "host" "websocket_new" (func $websocket_new (param i32 i32) (result i32)))
  (import "host" "client_new" (func $client_new (param i32) (result i32)))

  (memory (export "memory") 2)
  (table (export "__indirect_function_table") 4 funcref)
  (elem (i32.const 0) func $dtor $invoke0 $invoke1 $invoke2)

  (global $sp (mut i32) (i32.const 1024))
  (global $heap (mut i32) (i32.const 4096))
  (global $mallocs (mut i32) (i32.const 0))
  (global $reallocs (mut i32) (i32.const 0))
  (global $frees (mut i32) (i32.const 0))
  (global $dtors (mut i32) (i32.const 0))
  (global $last_dtor_a (mut i32) (i32.const 0))
  (global $invokes (mut i32) (i32.const 0))
  (global $last_a (mut i32) (i32.const 0))
  (global $object_frees (mut i32) (i32.const 0))
  (global $exn (mut i32) (i32.const 0))
  (global $exn_set (mut i32) (i32.const 0))

  (data (i32.const 2048) "0123456789abcdef")
  (data (i32.const 2064) "Invalid address length")
  (data (i32.const 2096) "Address must be a Uint8Array")
  (data (i32.const 2128) "Transaction too short")
  (data (i32.const 2160) "Unknown transaction format")
  (data (i32.const 2192) "Unknown account type")
  (data (i32.const 2224) "closure invoked recursively or after being dropped")
  (data (i32.const 2288) "0000000000000000000000000000000000000001")
  (data (i32.const 2336) "rejected")

  ;; ── Allocator and scratch stack ──

  (func $malloc (export "bridge_malloc") (param $len i32) (result i32)
    (local $ptr i32) (local $end i32)
    (local.set $ptr (i32.and (i32.add (global.get $heap) (i32.const 7)) (i32.const -8)))
    (local.set $end (i32.add (local.get $ptr) (local.get $len)))
    (if (i32.gt_u (local.get $end) (i32.mul (memory.size) (i32.const 65536)))
      (then
        (if (i32.eq
              (memory.grow
                (i32.sub
                  (i32.shr_u (i32.add (local.get $end) (i32.const 65535)) (i32.const 16))
                  (memory.size)))
              (i32.const -1))
          (then unreachable))))
    (global.set $heap (local.get $end))
    (global.set $mallocs (i32.add (global.get $mallocs) (i32.const 1)))
    (local.get $ptr))

  (func (export "bridge_realloc") (param $ptr i32) (param $old i32) (param $new i32) (result i32)
    (local $out i32)
    (global.set $reallocs (i32.add (global.get $reallocs) (i32.const 1)))
    (local.set $out (call $malloc (local.get $new)))
    (memory.copy
      (local.get $out)
      (local.get $ptr)
      (select (local.get $old) (local.get $new) (i32.lt_u (local.get $old) (local.get $new))))
    (local.get $out))

  (func $free (export "bridge_free") (param $ptr i32) (param $len i32)
    (global.set $frees (i32.add (global.get $frees) (i32.const 1))))

  (func (export "bridge_add_to_stack_pointer") (param $delta i32) (result i32)
    (global.set $sp (i32.add (global.get $sp) (local.get $delta)))
    (global.get $sp))

  (func (export "bridge_exn_store") (param $h i32)
    (global.set $exn (local.get $h))
    (global.set $exn_set (i32.const 1)))

  ;; ── Result tuple helpers ──

  (func $ok (param $ret i32) (param $value i32)
    (i32.store (local.get $ret) (local.get $value))
    (i32.store offset=4 (local.get $ret) (i32.const 0))
    (i32.store offset=8 (local.get $ret) (i32.const 0)))

  (func $fail (param $ret i32) (param $error i32)
    (i32.store (local.get $ret) (i32.const 0))
    (i32.store offset=4 (local.get $ret) (local.get $error))
    (i32.store offset=8 (local.get $ret) (i32.const 1)))

  (func $fail_msg (param $ret i32) (param $msg i32) (param $len i32)
    (call $fail (local.get $ret) (call $error_new (local.get $msg) (local.get $len))))

  (func $pair (param $ret i32) (param $a i32) (param $b i32)
    (i32.store (local.get $ret) (local.get $a))
    (i32.store offset=4 (local.get $ret) (local.get $b)))

  (func $take_exn (result i32)
    (global.set $exn_set (i32.const 0))
    (global.get $exn))

  ;; ── Closures ──

  (func $dtor (param $a i32) (param $b i32)
    (global.set $dtors (i32.add (global.get $dtors) (i32.const 1)))
    (global.set $last_dtor_a (local.get $a)))

  (func $invoke0 (param $ret i32) (param $a i32) (param $b i32)
    (if (i32.eqz (local.get $a))
      (then
        (call $fail_msg (local.get $ret) (i32.const 2224) (i32.const 50))
        (return)))
    (global.set $invokes (i32.add (global.get $invokes) (i32.const 1)))
    (global.set $last_a (local.get $a))
    (call $ok (local.get $ret) (i32.const 0)))

  ;; env_b = 1: release the closure passed as the argument, mid-call.
  ;; Otherwise a function argument is called with itself; anything else is echoed.
  (func $invoke1 (param $ret i32) (param $a i32) (param $b i32) (param $x i32)
    (local $r i32)
    (if (i32.eqz (local.get $a))
      (then
        (call $drop (local.get $x))
        (call $fail_msg (local.get $ret) (i32.const 2224) (i32.const 50))
        (return)))
    (global.set $invokes (i32.add (global.get $invokes) (i32.const 1)))
    (global.set $last_a (local.get $a))
    ;; env_b = 2: trap before touching the argument.
    (if (i32.eq (local.get $b) (i32.const 2)) (then unreachable))
    (if (i32.eqz (call $is_function (local.get $x)))
      (then
        (call $ok (local.get $ret) (local.get $x))
        (return)))
    (if (i32.eq (local.get $b) (i32.const 1))
      (then
        (drop (call $cb_drop (local.get $x)))
        (call $ok (local.get $ret) (i32.const 0))
        (return)))
    (local.set $r (call $call1 (local.get $x) (local.get $x)))
    (call $drop (local.get $x))
    (if (global.get $exn_set)
      (then
        (call $fail (local.get $ret) (call $take_exn))
        (return)))
    (call $ok (local.get $ret) (local.get $r)))

  ;; Promise executor: env_a = 1 resolves with env_b, 2 rejects, else throws.
  (func $invoke2 (param $ret i32) (param $a i32) (param $b i32) (param $x i32) (param $y i32)
    (local $v i32)
    (block $settled
      (if (i32.eq (local.get $a) (i32.const 1))
        (then
          (local.set $v (call $number_new (f64.convert_i32_u (local.get $b))))
          (call $drop (call $call1 (local.get $x) (local.get $v)))
          (call $drop (local.get $v))
          (br $settled)))
      (if (i32.eq (local.get $a) (i32.const 2))
        (then
          (local.set $v (call $error_new (i32.const 2336) (i32.const 8)))
          (call $drop (call $call1 (local.get $y) (local.get $v)))
          (call $drop (local.get $v))
          (br $settled)))
      (call $drop (local.get $x))
      (call $drop (local.get $y))
      (call $fail_msg (local.get $ret) (i32.const 2336) (i32.const 8))
      (return))
    (call $drop (local.get $x))
    (call $drop (local.get $y))
    (call $ok (local.get $ret) (i32.const 0)))

  ;; ── Counters ──

  (func (export "malloc_count") (result i32) (global.get $mallocs))
  (func (export "realloc_count") (result i32) (global.get $reallocs))
  (func (export "free_count") (result i32) (global.get $frees))
  (func (export "dtor_count") (result i32) (global.get $dtors))
  (func (export "last_dtor_a") (result i32) (global.get $last_dtor_a))
  (func (export "invoke_count") (result i32) (global.get $invokes))
  (func (export "last_invoke_a") (result i32) (global.get $last_a))
  (func (export "object_free_count") (result i32) (global.get $object_frees))
  (func (export "exn_pending") (result i32) (global.get $exn_set))
  (func (export "exn_take") (result i32) (call $take_exn))
  (func (export "grow") (param i32) (result i32) (memory.grow (local.get 0)))
  (func (export "spin") (loop $l (br $l)))

  ;; ── Drivers for host imports ──

  (func (export "make_closure") (param $a i32) (param $b i32) (param $shape i32) (result i32)
    (call $closure_new
      (local.get $a)
      (local.get $b)
      (i32.const 0)
      (i32.add (i32.and (local.get $shape) (i32.const 3)) (i32.const 1))
      (local.get $shape)))
  (func (export "drop_closure") (param i32) (result i32) (call $cb_drop (local.get 0)))
  (func (export "call_function1") (param i32 i32) (result i32)
    (call $call1 (local.get 0) (local.get 1)))
  (func (export "make_promise") (param $a i32) (param $b i32) (result i32)
    (call $promise_new (local.get $a) (local.get $b) (i32.const 3)))
  (func (export "schedule") (param i32 i32) (result i32)
    (call $set_timeout (local.get 0) (local.get 1)))
  (func (export "cancel") (param i32) (call $clear_timeout (local.get 0)))
  (func (export "schedule_microtask") (param i32) (call $queue_microtask (local.get 0)))
  (func (export "log_value") (param i32) (call $console_log (local.get 0)))
  (func (export "log_error") (param i32) (call $console_error (local.get 0)))
  (func (export "random") (param i32 i32) (call $random_fill (local.get 0) (local.get 1)))
  (func (export "new_bytes") (param i32) (result i32) (call $u8_new (local.get 0)))
  (func (export "open_socket") (param i32 i32) (result i32)
    (call $websocket_new (local.get 0) (local.get 1)))
  (func (export "string_from_guest") (param i32 i32) (result i32)
    (call $string_new (local.get 0) (local.get 1)))
  (func (export "throw_message") (param i32 i32) (call $throw (local.get 0) (local.get 1)))
  (func (export "fail_with") (param $ret i32) (param $ptr i32) (param $len i32)
    (call $fail_msg (local.get $ret) (local.get $ptr) (local.get $len)))

  ;; Takes ownership of the input and returns a fresh copy.
  (func (export "echo_string") (param $ret i32) (param $ptr i32) (param $len i32)
    (local $out i32)
    (local.set $out (call $malloc (local.get $len)))
    (memory.copy (local.get $out) (local.get $ptr) (local.get $len))
    (call $free (local.get $ptr) (local.get $len))
    (call $pair (local.get $ret) (local.get $out) (local.get $len)))

  ;; ── Address ──

  (func (export "address_new") (param $ret i32) (param $ptr i32) (param $len i32)
    (local $obj i32)
    (if (i32.ne (local.get $len) (i32.const 20))
      (then
        (call $free (local.get $ptr) (local.get $len))
        (call $fail_msg (local.get $ret) (i32.const 2064) (i32.const 22))
        (return)))
    (local.set $obj (call $malloc (i32.const 20)))
    (memory.copy (local.get $obj) (local.get $ptr) (i32.const 20))
    (call $free (local.get $ptr) (local.get $len))
    (call $ok (local.get $ret) (local.get $obj)))

  (func (export "address_from_any") (param $ret i32) (param $h i32)
    (local $obj i32)
    (if (i32.eqz (call $is_uint8array (local.get $h)))
      (then
        (call $fail_msg (local.get $ret) (i32.const 2096) (i32.const 28))
        (return)))
    (if (i32.ne (call $u8_len (local.get $h)) (i32.const 20))
      (then
        (call $fail_msg (local.get $ret) (i32.const 2064) (i32.const 22))
        (return)))
    (local.set $obj (call $malloc (i32.const 20)))
    (call $u8_copy (local.get $h) (local.get $obj))
    (call $ok (local.get $ret) (local.get $obj)))

  (func (export "address_to_hex") (param $ret i32) (param $obj i32)
    (local $out i32) (local $i i32) (local $byte i32) (local $dst i32)
    (local.set $out (call $malloc (i32.const 40)))
    (block $end
      (loop $next
        (br_if $end (i32.ge_u (local.get $i) (i32.const 20)))
        (local.set $byte (i32.load8_u (i32.add (local.get $obj) (local.get $i))))
        (local.set $dst (i32.add (local.get $out) (i32.shl (local.get $i) (i32.const 1))))
        (i32.store8
          (local.get $dst)
          (i32.load8_u (i32.add (i32.const 2048) (i32.shr_u (local.get $byte) (i32.const 4)))))
        (i32.store8 offset=1
          (local.get $dst)
          (i32.load8_u (i32.add (i32.const 2048) (i32.and (local.get $byte) (i32.const 15)))))
        (local.set $i (i32.add (local.get $i) (i32.const 1)))
        (br $next)))
    (call $pair (local.get $ret) (local.get $out) (i32.const 40)))

  (func (export "address_free") (param i32)
    (global.set $object_frees (i32.add (global.get $object_frees) (i32.const 1))))

  ;; ── Transaction: [format u8][sender type u8][value u64 LE][payload...] ──

  (func (export "transaction_from_bytes") (param $ret i32) (param $ptr i32) (param $len i32)
    (local $obj i32) (local $msg i32) (local $msg_len i32)
    (block $invalid
      (local.set $msg (i32.const 2128))
      (local.set $msg_len (i32.const 21))
      (br_if $invalid (i32.lt_u (local.get $len) (i32.const 10)))
      (local.set $msg (i32.const 2160))
      (local.set $msg_len (i32.const 26))
      (br_if $invalid (i32.gt_u (i32.load8_u (local.get $ptr)) (i32.const 1)))
      (local.set $msg (i32.const 2192))
      (local.set $msg_len (i32.const 20))
      (br_if $invalid (i32.gt_u (i32.load8_u offset=1 (local.get $ptr)) (i32.const 3)))
      (local.set $obj (call $malloc (i32.add (local.get $len) (i32.const 4))))
      (i32.store (local.get $obj) (local.get $len))
      (memory.copy (i32.add (local.get $obj) (i32.const 4)) (local.get $ptr) (local.get $len))
      (call $free (local.get $ptr) (local.get $len))
      (call $ok (local.get $ret) (local.get $obj))
      (return))
    (call $free (local.get $ptr) (local.get $len))
    (call $fail_msg (local.get $ret) (local.get $msg) (local.get $msg_len)))

  (func (export "transaction_serialize") (param $ret i32) (param $obj i32)
    (local $len i32) (local $out i32)
    (local.set $len (i32.load (local.get $obj)))
    (local.set $out (call $malloc (local.get $len)))
    (memory.copy (local.get $out) (i32.add (local.get $obj) (i32.const 4)) (local.get $len))
    (call $pair (local.get $ret) (local.get $out) (local.get $len)))

  (func (export "transaction_value") (param i32) (result i64)
    (i64.load offset=6 (local.get 0)))
  (func (export "transaction_format") (param i32) (result i32)
    (i32.load8_u offset=4 (local.get 0)))
  (func (export "transaction_sender_type") (param i32) (result i32)
    (i32.load8_u offset=5 (local.get 0)))
  (func (export "transaction_free") (param i32)
    (global.set $object_frees (i32.add (global.get $object_frees) (i32.const 1))))

  ;; ── Policy ──

  (func (export "policy_blocks_per_batch") (result i32) (i32.const 60))

  (func (export "policy_first_block_of") (param $ret i32) (param $epoch i32)
    (if (i32.eqz (local.get $epoch))
      (then
        (call $pair (local.get $ret) (i32.const 0) (i32.const 0))
        (return)))
    (call $pair
      (local.get $ret)
      (i32.const 1)
      (i32.add
        (i32.mul (i32.sub (local.get $epoch) (i32.const 1)) (i32.const 43200))
        (i32.const 1))))

  (func (export "policy_staking_contract_address") (param $ret i32)
    (local $out i32)
    (local.set $out (call $malloc (i32.const 40)))
    (memory.copy (local.get $out) (i32.const 2288) (i32.const 40))
    (call $pair (local.get $ret) (local.get $out) (i32.const 40)))

  ;; ── Client ──

  (func (export "client_create") (param $cfg i32) (result i32)
    (local $frame i32) (local $height i32) (local $obj i32) (local $client i32) (local $promise i32)
    (global.set $sp (i32.sub (global.get $sp) (i32.const 16)))
    (local.set $frame (global.get $sp))
    (call $number_get (local.get $frame) (local.get $cfg))
    (if (i32.load (local.get $frame))
      (then
        (local.set $height (i32.trunc_sat_f64_u (f64.load offset=8 (local.get $frame))))))
    (global.set $sp (i32.add (global.get $sp) (i32.const 16)))
    (call $drop (local.get $cfg))
    (local.set $obj (call $malloc (i32.const 4)))
    (i32.store (local.get $obj) (local.get $height))
    (local.set $client (call $client_new (local.get $obj)))
    (local.set $promise (call $promise_resolve (local.get $client)))
    (call $drop (local.get $client))
    (local.get $promise))

  (func (export "client_head_height") (param i32) (result i32)
    (i32.load (local.get 0)))
  (func (export "client_free") (param i32)
    (global.set $object_frees (i32.add (global.get $object_frees) (i32.const 1))))
)
"#;

/// Sandbox over the guest with the default configuration.
pub fn load_sandbox() -> Sandbox {
    load_sandbox_with_config(SandboxConfig::default())
}

pub fn load_sandbox_with_config(config: SandboxConfig) -> Sandbox {
    Sandbox::new(GUEST_WAT, config).expect("guest module should validate")
}

/// A bridge plus handles on its deterministic environment and transport.
pub struct Harness {
    pub bridge: Bridge,
    pub env: MemEnvironment,
    pub transport: MemTransport,
}

pub fn harness() -> Harness {
    harness_with_config(SandboxConfig::default())
}

pub fn harness_with_config(config: SandboxConfig) -> Harness {
    let env = MemEnvironment::new(7);
    let transport = MemTransport::new();
    let bridge = load_sandbox_with_config(config)
        .instantiate_with(Box::new(env.clone()), Box::new(transport.clone()))
        .expect("guest module should instantiate");
    Harness {
        bridge,
        env,
        transport,
    }
}

/// Read one of the guest's `() -> i32` counter exports.
pub fn counter(bridge: &mut Bridge, name: &str) -> u32 {
    bridge
        .call_export::<(), u32>(name, ())
        .unwrap_or_else(|e| panic!("counter {} failed: {}", name, e))
}

/// Wrap a guest closure with the given environment and packed shape.
pub fn make_closure(bridge: &mut Bridge, env_a: u32, env_b: u32, shape: u32) -> HostValue {
    let handle = bridge
        .call_export::<(u32, u32, u32), u32>("make_closure", (env_a, env_b, shape))
        .expect("closure_new should succeed");
    bridge.take(handle.into()).expect("closure handle")
}

/// Copy a string into guest memory and call `export(ptr, len) -> R`.
pub fn call_with_str<R>(bridge: &mut Bridge, export: &str, s: &str) -> Result<R, SandboxError>
where
    R: wasmtime::WasmResults,
{
    bridge.with_context(|cx| {
        let slice = marshal::pass_string(cx, s)?;
        let func = export_func::<(u32, u32), R>(cx, export)?;
        call_guest(cx, &func, (slice.ptr, slice.len))
    })
}

/// Guest slice holding `s`, left allocated.
pub fn guest_string(bridge: &mut Bridge, s: &str) -> GuestSlice {
    bridge
        .with_context(|cx| marshal::pass_string(cx, s))
        .expect("pass_string")
}

/// Take the thrown value out of the guest's exception slot.
pub fn take_exception(bridge: &mut Bridge) -> HostValue {
    assert_eq!(counter(bridge, "exn_pending"), 1, "no exception pending");
    let handle = counter(bridge, "exn_take");
    bridge.take(handle.into()).expect("exception handle")
}

/// Install a `tracing` subscriber honouring `RUST_LOG`, once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
