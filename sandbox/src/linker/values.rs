//! Heap, primitive values, and predicates.

use wasmtime::{Caller, Linker};

use lightbridge_primitives::{BoolTag, Handle};

use super::{arg, flag, guest_str, host_call, ret, HOST_MODULE};
use crate::error::SandboxError;
use crate::marshal;
use crate::scratch::RetArea;
use crate::state::BridgeState;
use crate::value::HostValue;

pub(super) fn register(linker: &mut Linker<BridgeState>) -> Result<(), SandboxError> {
    register_heap(linker)?;
    register_strings(linker)?;
    register_numbers(linker)?;
    register_errors(linker)?;
    register_predicates(linker)?;
    Ok(())
}

// ── Heap ──

fn register_heap(linker: &mut Linker<BridgeState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        HOST_MODULE,
        "object_drop_ref",
        |mut caller: Caller<'_, BridgeState>, h: u32| -> wasmtime::Result<()> {
            host_call(&mut caller, |cx| {
                cx.data_mut().drop_ref(Handle(h))?;
                Ok(())
            })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "object_clone_ref",
        |mut caller: Caller<'_, BridgeState>, h: u32| -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| Ok(cx.data_mut().heap.clone_ref(Handle(h))?.as_u32()))
        },
    )?;
    Ok(())
}

// ── Strings ──

fn register_strings(linker: &mut Linker<BridgeState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        HOST_MODULE,
        "string_new",
        |mut caller: Caller<'_, BridgeState>, ptr: u32, len: u32| -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| {
                let s = guest_str(cx, ptr, len)?;
                Ok(ret(cx, HostValue::from(s)))
            })
        },
    )?;
    // Writes (ptr, len) of a fresh copy, or (0, 0) when the value is not a string.
    linker.func_wrap(
        HOST_MODULE,
        "string_get",
        |mut caller: Caller<'_, BridgeState>, retptr: u32, h: u32| -> wasmtime::Result<()> {
            host_call(&mut caller, |cx| {
                let area = RetArea::at(retptr)?;
                let (ptr, len) = match arg(cx, h)? {
                    HostValue::String(s) => {
                        let slice = marshal::pass_string(cx, &s)?;
                        (slice.ptr, slice.len)
                    }
                    _ => (0, 0),
                };
                area.write_pair(cx, ptr, len)
            })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "to_string",
        |mut caller: Caller<'_, BridgeState>, h: u32| -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| {
                let rendered = arg(cx, h)?.to_display_string();
                Ok(ret(cx, HostValue::from(rendered)))
            })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "debug_string",
        |mut caller: Caller<'_, BridgeState>, retptr: u32, h: u32| -> wasmtime::Result<()> {
            host_call(&mut caller, |cx| {
                let area = RetArea::at(retptr)?;
                let rendered = arg(cx, h)?.debug_string();
                let slice = marshal::pass_string(cx, &rendered)?;
                area.write_pair(cx, slice.ptr, slice.len)
            })
        },
    )?;
    Ok(())
}

// ── Numbers, booleans, bigints ──

fn register_numbers(linker: &mut Linker<BridgeState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        HOST_MODULE,
        "number_new",
        |mut caller: Caller<'_, BridgeState>, n: f64| -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| Ok(ret(cx, HostValue::Number(n))))
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "number_get",
        |mut caller: Caller<'_, BridgeState>, retptr: u32, h: u32| -> wasmtime::Result<()> {
            host_call(&mut caller, |cx| {
                let area = RetArea::at(retptr)?;
                let value = arg(cx, h)?.as_f64();
                area.write_optional_f64(cx, value)
            })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "boolean_get",
        |mut caller: Caller<'_, BridgeState>, h: u32| -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| Ok(BoolTag::from(arg(cx, h)?.as_bool()).as_u32()))
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "bigint_from_i64",
        |mut caller: Caller<'_, BridgeState>, v: i64| -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| Ok(ret(cx, HostValue::BigInt(v as i128))))
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "bigint_from_u64",
        |mut caller: Caller<'_, BridgeState>, v: i64| -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| Ok(ret(cx, HostValue::BigInt(v as u64 as i128))))
        },
    )?;
    // Wraps to 64 bits, like `BigInt.asIntN(64, v)`.
    linker.func_wrap(
        HOST_MODULE,
        "bigint_get_as_i64",
        |mut caller: Caller<'_, BridgeState>, retptr: u32, h: u32| -> wasmtime::Result<()> {
            host_call(&mut caller, |cx| {
                let area = RetArea::at(retptr)?;
                let value = match arg(cx, h)? {
                    HostValue::BigInt(b) => Some(b as i64),
                    _ => None,
                };
                area.write_optional_i64(cx, value)
            })
        },
    )?;
    Ok(())
}

// ── Errors ──

fn register_errors(linker: &mut Linker<BridgeState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        HOST_MODULE,
        "error_new",
        |mut caller: Caller<'_, BridgeState>, ptr: u32, len: u32| -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| {
                let message = guest_str(cx, ptr, len)?;
                Ok(ret(cx, HostValue::error(message)))
            })
        },
    )?;
    // Never returns normally.
    linker.func_wrap(
        HOST_MODULE,
        "throw",
        |mut caller: Caller<'_, BridgeState>, ptr: u32, len: u32| -> wasmtime::Result<()> {
            host_call(&mut caller, |cx| {
                let message = guest_str(cx, ptr, len)?;
                Err(SandboxError::thrown_error(message))
            })
        },
    )?;
    Ok(())
}

// ── Predicates and equality ──

fn register_predicate(
    linker: &mut Linker<BridgeState>,
    name: &str,
    test: fn(&HostValue) -> bool,
) -> Result<(), SandboxError> {
    linker.func_wrap(
        HOST_MODULE,
        name,
        move |mut caller: Caller<'_, BridgeState>, h: u32| -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| Ok(flag(test(&arg(cx, h)?))))
        },
    )?;
    Ok(())
}

fn register_predicates(linker: &mut Linker<BridgeState>) -> Result<(), SandboxError> {
    register_predicate(linker, "is_undefined", HostValue::is_undefined)?;
    register_predicate(linker, "is_null", HostValue::is_null)?;
    register_predicate(linker, "is_object", HostValue::is_object)?;
    register_predicate(linker, "is_function", HostValue::is_function)?;
    register_predicate(linker, "is_string", |v| matches!(v, HostValue::String(_)))?;
    register_predicate(linker, "is_bigint", |v| matches!(v, HostValue::BigInt(_)))?;
    register_predicate(linker, "is_array", |v| matches!(v, HostValue::Array(_)))?;
    register_predicate(linker, "is_uint8array", |v| matches!(v, HostValue::Bytes(_)))?;

    linker.func_wrap(
        HOST_MODULE,
        "jsval_eq",
        |mut caller: Caller<'_, BridgeState>, a: u32, b: u32| -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| Ok(flag(arg(cx, a)?.strict_eq(&arg(cx, b)?))))
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "jsval_loose_eq",
        |mut caller: Caller<'_, BridgeState>, a: u32, b: u32| -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| Ok(flag(arg(cx, a)?.loose_eq(&arg(cx, b)?))))
        },
    )?;
    Ok(())
}
