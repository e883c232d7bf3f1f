//! Domain façade: typed host wrappers over the sandbox's address,
//! transaction, policy, and client exports.
//!
//! Nothing here knows the domain rules. Every method marshals its inputs,
//! calls one export through a scratch frame, and lets the error channel
//! rethrow whatever the sandbox raised.

mod address;
mod client;
mod policy;
mod transaction;

pub use address::{Address, ADDRESS_LEN};
pub use client::Client;
pub use policy::Policy;
pub use transaction::Transaction;

use wasmtime::WasmParams;

use crate::error::SandboxError;
use crate::finalize;
use crate::runtime::Bridge;
use crate::scratch::{with_ret_area, RetTuple};
use crate::state::{call_guest, export_func, Cx};
use crate::value::WrappedObject;

/// Call an export whose first parameter is a return frame, and read the tuple back.
fn call_with_ret<P>(
    cx: &mut Cx<'_>,
    name: &str,
    params: impl FnOnce(u32) -> P,
) -> Result<RetTuple, SandboxError>
where
    P: WasmParams,
{
    let func = export_func::<P, ()>(cx, name)?;
    with_ret_area(cx, |cx, ret| {
        call_guest(cx, &func, params(ret.ptr()))?;
        ret.read(cx)
    })
}

/// Wrap a freshly returned sandbox pointer and register it for cleanup.
fn adopt(cx: &mut Cx<'_>, class: &str, ptr: u32) -> Result<WrappedObject, SandboxError> {
    let registration = finalize::register(cx, class, ptr)?;
    Ok(WrappedObject::new(class, ptr, registration))
}

/// Pointer of a live object, or a usage error once it has been freed.
fn live_ptr(object: &WrappedObject) -> Result<u32, SandboxError> {
    match object.ptr() {
        0 => Err(SandboxError::usage(format!(
            "{} used after it was freed",
            object.class()
        ))),
        ptr => Ok(ptr),
    }
}

/// Free an object now instead of leaving it to the finalization queue.
fn free_now(bridge: &mut Bridge, object: &WrappedObject) -> Result<(), SandboxError> {
    match object.release() {
        Some(token) => bridge.with_context(|cx| token.run(cx)),
        None => Ok(()),
    }
}
