//! Error channel: exceptions in both directions.
//!
//! Sandbox → host: a failing export sets the discriminant of its result
//! tuple and puts the thrown value's handle in the secondary word. The
//! caller takes that handle and raises it; the value words are never trusted
//! on failure.
//!
//! Host → sandbox: an import that catches a host exception allocates it a
//! handle and hands it to the `bridge_exn_store` export, which parks it in
//! the module's single exception slot, then returns a zero value. Anything
//! fatal is stashed in the bridge state and unwound as a trap instead.

use lightbridge_primitives::Handle;

use crate::error::SandboxError;
use crate::scratch::RetTuple;
use crate::state::{call_guest, exports, Cx};
use crate::value::HostValue;

/// Message carried by the trap that unwinds a fatal import failure.
pub const UNWIND_MESSAGE: &str = "host call unwound";

/// Take the thrown value behind `handle` and turn it into an error.
pub fn raise(cx: &mut Cx<'_>, handle: Handle) -> SandboxError {
    match cx.data_mut().take(handle) {
        Ok(thrown) => {
            tracing::debug!(%handle, exception = %thrown.debug_string(), "sandbox raised");
            SandboxError::Thrown(thrown)
        }
        Err(e) => e,
    }
}

/// Pass a tuple through if its discriminant is clear, raise otherwise.
pub fn check(cx: &mut Cx<'_>, tuple: RetTuple) -> Result<RetTuple, SandboxError> {
    if tuple.is_err() {
        return Err(raise(cx, Handle(tuple.secondary)));
    }
    Ok(tuple)
}

/// Check a tuple whose value word is an owned handle, and take it.
pub fn take_result(cx: &mut Cx<'_>, tuple: RetTuple) -> Result<HostValue, SandboxError> {
    let tuple = check(cx, tuple)?;
    cx.data_mut().take(Handle(tuple.value))
}

/// Park `value` in the sandbox's exception slot.
pub fn store_exception(cx: &mut Cx<'_>, value: HostValue) -> Result<(), SandboxError> {
    let Some(store) = exports(cx)?.exn_store else {
        tracing::warn!(
            exception = %value.debug_string(),
            "module has no bridge_exn_store export; exception cannot be delivered"
        );
        return Err(SandboxError::Thrown(value));
    };
    let handle = cx.data_mut().alloc(value);
    call_guest(cx, &store, handle.as_u32())
}

/// Stash a fatal error and produce the trap that carries it out of the sandbox.
pub fn unwind(cx: &mut Cx<'_>, err: SandboxError) -> anyhow::Error {
    tracing::debug!(error = %err, "unwinding host call");
    if let Some(previous) = cx.data_mut().unwind.replace(err) {
        tracing::warn!(error = %previous, "replacing an unrecovered unwind");
    }
    anyhow::Error::msg(UNWIND_MESSAGE)
}

/// Run an import body whose errors all propagate out of the sandbox call.
pub fn propagate<R>(
    cx: &mut Cx<'_>,
    op: impl FnOnce(&mut Cx<'_>) -> Result<R, SandboxError>,
) -> anyhow::Result<R> {
    op(cx).map_err(|e| unwind(cx, e))
}

/// Run an import body that hands thrown exceptions to the sandbox.
///
/// On a thrown exception the import returns `R::default()`; the sandbox is
/// expected to check its exception slot.
pub fn catching<R: Default>(
    cx: &mut Cx<'_>,
    op: impl FnOnce(&mut Cx<'_>) -> Result<R, SandboxError>,
) -> anyhow::Result<R> {
    match op(cx) {
        Ok(value) => Ok(value),
        Err(SandboxError::Thrown(value)) => match store_exception(cx, value) {
            Ok(()) => Ok(R::default()),
            Err(e) => Err(unwind(cx, e)),
        },
        Err(e) => Err(unwind(cx, e)),
    }
}
