//! Closures, function calls, promises, and scheduling.

use std::rc::Rc;

use wasmtime::{Caller, Linker};

use lightbridge_primitives::{ClosureShape, Handle};

use super::{arg, flag, host_call, host_call_catching, ret, type_error, HOST_MODULE};
use crate::closures::{call_once2, SandboxClosure};
use crate::error::SandboxError;
use crate::event_loop::{self, Promise};
use crate::state::{BridgeState, Cx};
use crate::value::{call_value, HostFunction, HostValue, Resolver};

pub(super) fn register(linker: &mut Linker<BridgeState>) -> Result<(), SandboxError> {
    register_closures(linker)?;
    register_calls(linker)?;
    register_promises(linker)?;
    register_scheduling(linker)?;
    Ok(())
}

fn expect_promise(value: &HostValue) -> Result<Rc<Promise>, SandboxError> {
    match value {
        HostValue::Promise(promise) => Ok(Rc::clone(promise)),
        other => Err(type_error(format!("{} is not a promise", other.debug_string()))),
    }
}

fn expect_callable(value: HostValue) -> Result<HostValue, SandboxError> {
    if value.is_function() {
        Ok(value)
    } else {
        Err(type_error(format!("{} is not a function", value.debug_string())))
    }
}

/// Drop a closure handle and release the sandbox's reference.
///
/// Returns 1 if the destructor ran now. A closure still running a call is
/// destroyed when that call returns.
fn drop_callback(cx: &mut Cx<'_>, handle: Handle) -> Result<u32, SandboxError> {
    let value = arg(cx, handle.as_u32())?;
    let closure = value
        .as_function()
        .and_then(|function| function.as_closure())
        .ok_or_else(|| {
            SandboxError::usage(format!("{} is not a sandbox closure", value.debug_string()))
        })?;
    cx.data_mut().take(handle)?;
    Ok(flag(closure.release(cx)?))
}

fn register_closures(linker: &mut Linker<BridgeState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        HOST_MODULE,
        "closure_new",
        |mut caller: Caller<'_, BridgeState>,
         env_a: u32,
         env_b: u32,
         destructor: u32,
         invoke: u32,
         shape: u32|
         -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| {
                let shape = ClosureShape::from_u32(shape).ok_or_else(|| {
                    SandboxError::usage(format!("unknown closure shape {:#x}", shape))
                })?;
                let closure = SandboxClosure::wrap(cx, env_a, env_b, destructor, invoke, shape)?;
                Ok(ret(cx, HostValue::Function(Rc::new(HostFunction::Closure(closure)))))
            })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "cb_drop",
        |mut caller: Caller<'_, BridgeState>, h: u32| -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| drop_callback(cx, Handle(h)))
        },
    )?;
    Ok(())
}

fn register_calls(linker: &mut Linker<BridgeState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        HOST_MODULE,
        "function_call0",
        |mut caller: Caller<'_, BridgeState>, f: u32| -> wasmtime::Result<u32> {
            host_call_catching(&mut caller, |cx| {
                let callee = arg(cx, f)?;
                let result = call_value(cx, &callee, &[])?;
                Ok(ret(cx, result))
            })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "function_call1",
        |mut caller: Caller<'_, BridgeState>, f: u32, a: u32| -> wasmtime::Result<u32> {
            host_call_catching(&mut caller, |cx| {
                let callee = arg(cx, f)?;
                let args = [arg(cx, a)?];
                let result = call_value(cx, &callee, &args)?;
                Ok(ret(cx, result))
            })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "function_call2",
        |mut caller: Caller<'_, BridgeState>, f: u32, a: u32, b: u32| -> wasmtime::Result<u32> {
            host_call_catching(&mut caller, |cx| {
                let callee = arg(cx, f)?;
                let args = [arg(cx, a)?, arg(cx, b)?];
                let result = call_value(cx, &callee, &args)?;
                Ok(ret(cx, result))
            })
        },
    )?;
    Ok(())
}

fn register_promises(linker: &mut Linker<BridgeState>) -> Result<(), SandboxError> {
    // `new Promise(executor)` where the executor is a two-argument closure
    // living on the caller's stack. A throwing executor rejects the promise.
    linker.func_wrap(
        HOST_MODULE,
        "promise_new",
        |mut caller: Caller<'_, BridgeState>,
         env_a: u32,
         env_b: u32,
         invoke: u32|
         -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| {
                let promise = Rc::new(Promise::new());
                let (resolve, reject) = Resolver::pair(&promise);
                match call_once2(cx, invoke, env_a, env_b, resolve, reject.clone()) {
                    Ok(_) => {}
                    Err(SandboxError::Thrown(thrown)) => {
                        call_value(cx, &reject, &[thrown])?;
                    }
                    Err(e) => return Err(e),
                }
                Ok(ret(cx, HostValue::Promise(promise)))
            })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "promise_resolve",
        |mut caller: Caller<'_, BridgeState>, v: u32| -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| {
                let value = arg(cx, v)?;
                let promise = event_loop::promise_resolve(&mut cx.data_mut().events, value);
                Ok(ret(cx, HostValue::Promise(promise)))
            })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "promise_then",
        |mut caller: Caller<'_, BridgeState>, p: u32, f: u32| -> wasmtime::Result<u32> {
            host_call_catching(&mut caller, |cx| {
                let promise = expect_promise(&arg(cx, p)?)?;
                let on_fulfilled = Some(arg(cx, f)?).filter(HostValue::is_function);
                let derived =
                    event_loop::then(&mut cx.data_mut().events, &promise, on_fulfilled, None);
                Ok(ret(cx, HostValue::Promise(derived)))
            })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "promise_then2",
        |mut caller: Caller<'_, BridgeState>, p: u32, f: u32, r: u32| -> wasmtime::Result<u32> {
            host_call_catching(&mut caller, |cx| {
                let promise = expect_promise(&arg(cx, p)?)?;
                let on_fulfilled = Some(arg(cx, f)?).filter(HostValue::is_function);
                let on_rejected = Some(arg(cx, r)?).filter(HostValue::is_function);
                let derived = event_loop::then(
                    &mut cx.data_mut().events,
                    &promise,
                    on_fulfilled,
                    on_rejected,
                );
                Ok(ret(cx, HostValue::Promise(derived)))
            })
        },
    )?;
    Ok(())
}

fn register_scheduling(linker: &mut Linker<BridgeState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        HOST_MODULE,
        "queue_microtask",
        |mut caller: Caller<'_, BridgeState>, f: u32| -> wasmtime::Result<()> {
            host_call_catching(&mut caller, |cx| {
                let callback = expect_callable(arg(cx, f)?)?;
                cx.data_mut().events.queue_microtask(callback);
                Ok(())
            })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "set_timeout",
        |mut caller: Caller<'_, BridgeState>, f: u32, delay_ms: i32| -> wasmtime::Result<u32> {
            host_call_catching(&mut caller, |cx| {
                let callback = expect_callable(arg(cx, f)?)?;
                let now = cx.data().env.monotonic_ms();
                let id = cx
                    .data_mut()
                    .events
                    .set_timeout(callback, f64::from(delay_ms), now);
                tracing::trace!(id, delay_ms, "timer scheduled");
                Ok(id)
            })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "clear_timeout",
        |mut caller: Caller<'_, BridgeState>, id: u32| -> wasmtime::Result<()> {
            host_call(&mut caller, |cx| {
                cx.data_mut().events.clear_timeout(id);
                Ok(())
            })
        },
    )?;
    Ok(())
}
