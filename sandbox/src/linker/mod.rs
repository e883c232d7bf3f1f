//! Host function registration via Wasmtime linker.
//!
//! Registers the `host` import module. Every import runs its body through
//! one of two wrappers:
//!
//! - [`host_call`]: any error leaves the sandbox as a trap and is recovered
//!   by the host frame that made the call.
//! - [`host_call_catching`]: a thrown host exception is stored in the
//!   sandbox's exception slot and the import returns zero; fatal errors
//!   still unwind.
//!
//! Value arguments are borrowed: imports read the handle and leave releasing
//! it to the sandbox. Returned handles are owned by the sandbox.

mod environment;
mod facade;
mod functions;
mod reflect;
mod typed_arrays;
mod values;
mod websocket;

use wasmtime::{AsContextMut, Caller, Linker};

use lightbridge_primitives::Handle;

use crate::error::SandboxError;
use crate::error_channel::{catching, propagate};
use crate::marshal::{self, GuestSlice};
use crate::state::{BridgeState, Cx};
use crate::value::HostValue;

/// The only import module a sandbox may link against.
pub const HOST_MODULE: &str = "host";

/// Register all `host` functions with the linker.
pub fn register_host_functions(linker: &mut Linker<BridgeState>) -> Result<(), SandboxError> {
    values::register(linker)?;
    reflect::register(linker)?;
    typed_arrays::register(linker)?;
    functions::register(linker)?;
    environment::register(linker)?;
    websocket::register(linker)?;
    facade::register(linker)?;
    Ok(())
}

pub(crate) fn host_call<R>(
    caller: &mut Caller<'_, BridgeState>,
    op: impl FnOnce(&mut Cx<'_>) -> Result<R, SandboxError>,
) -> wasmtime::Result<R> {
    let mut cx = caller.as_context_mut();
    propagate(&mut cx, op)
}

pub(crate) fn host_call_catching<R: Default>(
    caller: &mut Caller<'_, BridgeState>,
    op: impl FnOnce(&mut Cx<'_>) -> Result<R, SandboxError>,
) -> wasmtime::Result<R> {
    let mut cx = caller.as_context_mut();
    catching(&mut cx, op)
}

// ── Shared argument helpers ──

fn arg(cx: &Cx<'_>, raw: u32) -> Result<HostValue, SandboxError> {
    cx.data().get(Handle(raw))
}

fn ret(cx: &mut Cx<'_>, value: HostValue) -> u32 {
    cx.data_mut().alloc(value).as_u32()
}

fn flag(value: bool) -> u32 {
    value as u32
}

fn guest_str(cx: &mut Cx<'_>, ptr: u32, len: u32) -> Result<String, SandboxError> {
    marshal::read_string(cx, GuestSlice::new(ptr, len))
}

fn type_error(message: impl Into<String>) -> SandboxError {
    SandboxError::Thrown(HostValue::type_error(message))
}
