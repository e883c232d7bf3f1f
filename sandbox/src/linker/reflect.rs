//! Objects, arrays, reflective property access, and iteration.

use std::rc::Rc;

use wasmtime::{Caller, Linker};

use super::{arg, flag, host_call, host_call_catching, ret, type_error, HOST_MODULE};
use crate::error::SandboxError;
use crate::state::BridgeState;
use crate::value::{format_number, HostArray, HostIterator, HostObject, HostValue};

pub(super) fn register(linker: &mut Linker<BridgeState>) -> Result<(), SandboxError> {
    register_constructors(linker)?;
    register_arrays(linker)?;
    register_reflection(linker)?;
    register_iteration(linker)?;
    Ok(())
}

// ── Property semantics ──

fn property_key(key: &HostValue) -> String {
    match key {
        HostValue::Number(n) => format_number(*n),
        other => other.to_display_string(),
    }
}

/// Canonical array index, so `"01"` is a property name and not index 1.
fn array_index(key: &str) -> Option<usize> {
    let index: u32 = key.parse().ok()?;
    (index.to_string() == key).then_some(index as usize)
}

pub(super) fn get_property(target: &HostValue, key: &str) -> Result<HostValue, SandboxError> {
    let value = match target {
        HostValue::Undefined | HostValue::Null => {
            return Err(type_error(format!(
                "Cannot read properties of {} (reading '{}')",
                target.type_name(),
                key
            )))
        }
        HostValue::Object(object) => object.get(key),
        HostValue::Array(array) => match key {
            "length" => Some(HostValue::Number(array.len() as f64)),
            _ => array_index(key)
                .filter(|i| *i < array.len())
                .map(|i| array.get(i)),
        },
        HostValue::Bytes(bytes) => match key {
            "length" | "byteLength" => Some(HostValue::Number(bytes.len() as f64)),
            _ => array_index(key)
                .and_then(|i| bytes.get(i))
                .map(|b| HostValue::Number(b as f64)),
        },
        HostValue::String(s) => match key {
            "length" => Some(HostValue::Number(s.encode_utf16().count() as f64)),
            _ => None,
        },
        HostValue::Error(error) => match key {
            "name" => Some(HostValue::string(&error.name)),
            "message" => Some(HostValue::string(&error.message)),
            _ => None,
        },
        HostValue::WebSocket(socket) => match key {
            "url" => Some(HostValue::string(socket.url())),
            "readyState" => Some(HostValue::Number(socket.ready_state() as u32 as f64)),
            "binaryType" => Some(HostValue::from(socket.binary_type())),
            _ => None,
        },
        _ => None,
    };
    Ok(value.unwrap_or(HostValue::Undefined))
}

fn require_object(target: &HostValue, operation: &str) -> Result<(), SandboxError> {
    if target.is_object() || target.is_function() {
        Ok(())
    } else {
        Err(type_error(format!("{} called on non-object", operation)))
    }
}

fn set_property(target: &HostValue, key: &str, value: HostValue) -> Result<bool, SandboxError> {
    require_object(target, "Reflect.set")?;
    Ok(match target {
        HostValue::Object(object) => {
            object.set(key, value);
            true
        }
        HostValue::Array(array) => match array_index(key) {
            Some(i) => {
                array.set(i, value);
                true
            }
            None => false,
        },
        HostValue::Bytes(bytes) => match array_index(key) {
            Some(i) if i < bytes.len() => {
                let n = value.as_f64().unwrap_or(0.0);
                let byte = if n.is_finite() { n.trunc() as i64 as u8 } else { 0 };
                bytes.set(i, byte);
                true
            }
            _ => false,
        },
        _ => false,
    })
}

fn has_property(target: &HostValue, key: &str) -> Result<bool, SandboxError> {
    if !(target.is_object() || target.is_function()) {
        return Err(type_error(format!(
            "Cannot use 'in' operator to search for '{}' in {}",
            key,
            target.debug_string()
        )));
    }
    Ok(match target {
        HostValue::Object(object) => object.has(key),
        HostValue::Array(array) => {
            key == "length" || array_index(key).is_some_and(|i| i < array.len())
        }
        HostValue::Bytes(bytes) => {
            key == "length" || array_index(key).is_some_and(|i| i < bytes.len())
        }
        HostValue::Error(_) => matches!(key, "name" | "message"),
        _ => false,
    })
}

fn entries(target: &HostValue) -> Result<HostValue, SandboxError> {
    let pairs: Vec<(String, HostValue)> = match target {
        HostValue::Undefined | HostValue::Null => {
            return Err(type_error("Cannot convert undefined or null to object"))
        }
        HostValue::Object(object) => object.entries(),
        HostValue::Array(array) => array
            .to_vec()
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        HostValue::Bytes(bytes) => bytes
            .to_vec()
            .into_iter()
            .enumerate()
            .map(|(i, b)| (i.to_string(), HostValue::Number(b as f64)))
            .collect(),
        _ => Vec::new(),
    };
    Ok(HostValue::array(
        pairs
            .into_iter()
            .map(|(k, v)| HostValue::array([HostValue::from(k), v])),
    ))
}

fn iterate(target: &HostValue) -> Result<HostValue, SandboxError> {
    let items: Vec<HostValue> = match target {
        HostValue::Iterator(_) => return Ok(target.clone()),
        HostValue::Array(array) => array.to_vec(),
        HostValue::Bytes(bytes) => bytes
            .to_vec()
            .into_iter()
            .map(|b| HostValue::Number(b as f64))
            .collect(),
        HostValue::String(s) => s.chars().map(|c| HostValue::from(c.to_string())).collect(),
        other => {
            return Err(type_error(format!(
                "{} is not iterable",
                other.debug_string()
            )))
        }
    };
    Ok(HostValue::Iterator(Rc::new(HostIterator::new(items))))
}

fn expect_array(value: &HostValue) -> Result<&Rc<HostArray>, SandboxError> {
    match value {
        HostValue::Array(array) => Ok(array),
        other => Err(type_error(format!("{} is not an array", other.debug_string()))),
    }
}

// ── Registration ──

fn register_constructors(linker: &mut Linker<BridgeState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        HOST_MODULE,
        "object_new",
        |mut caller: Caller<'_, BridgeState>| -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| {
                Ok(ret(cx, HostValue::Object(Rc::new(HostObject::default()))))
            })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "array_new",
        |mut caller: Caller<'_, BridgeState>| -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| {
                Ok(ret(cx, HostValue::Array(Rc::new(HostArray::default()))))
            })
        },
    )?;
    Ok(())
}

fn register_arrays(linker: &mut Linker<BridgeState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        HOST_MODULE,
        "array_push",
        |mut caller: Caller<'_, BridgeState>, a: u32, v: u32| -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| {
                let array = arg(cx, a)?;
                let value = arg(cx, v)?;
                Ok(expect_array(&array)?.push(value) as u32)
            })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "array_get",
        |mut caller: Caller<'_, BridgeState>, a: u32, index: u32| -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| {
                let item = expect_array(&arg(cx, a)?)?.get(index as usize);
                Ok(ret(cx, item))
            })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "array_set",
        |mut caller: Caller<'_, BridgeState>, a: u32, index: u32, v: u32| -> wasmtime::Result<()> {
            host_call(&mut caller, |cx| {
                let array = arg(cx, a)?;
                let value = arg(cx, v)?;
                expect_array(&array)?.set(index as usize, value);
                Ok(())
            })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "array_length",
        |mut caller: Caller<'_, BridgeState>, a: u32| -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| Ok(expect_array(&arg(cx, a)?)?.len() as u32))
        },
    )?;
    Ok(())
}

fn register_reflection(linker: &mut Linker<BridgeState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        HOST_MODULE,
        "reflect_get",
        |mut caller: Caller<'_, BridgeState>, target: u32, key: u32| -> wasmtime::Result<u32> {
            host_call_catching(&mut caller, |cx| {
                let target = arg(cx, target)?;
                require_object(&target, "Reflect.get")?;
                let value = get_property(&target, &property_key(&arg(cx, key)?))?;
                Ok(ret(cx, value))
            })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "reflect_set",
        |mut caller: Caller<'_, BridgeState>,
         target: u32,
         key: u32,
         value: u32|
         -> wasmtime::Result<u32> {
            host_call_catching(&mut caller, |cx| {
                let target = arg(cx, target)?;
                let key = property_key(&arg(cx, key)?);
                let value = arg(cx, value)?;
                Ok(flag(set_property(&target, &key, value)?))
            })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "has_property",
        |mut caller: Caller<'_, BridgeState>, target: u32, key: u32| -> wasmtime::Result<u32> {
            host_call_catching(&mut caller, |cx| {
                let target = arg(cx, target)?;
                let key = property_key(&arg(cx, key)?);
                Ok(flag(has_property(&target, &key)?))
            })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "object_entries",
        |mut caller: Caller<'_, BridgeState>, h: u32| -> wasmtime::Result<u32> {
            host_call_catching(&mut caller, |cx| {
                let list = entries(&arg(cx, h)?)?;
                Ok(ret(cx, list))
            })
        },
    )?;
    Ok(())
}

fn register_iteration(linker: &mut Linker<BridgeState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        HOST_MODULE,
        "iterator",
        |mut caller: Caller<'_, BridgeState>, h: u32| -> wasmtime::Result<u32> {
            host_call_catching(&mut caller, |cx| {
                let iterator = iterate(&arg(cx, h)?)?;
                Ok(ret(cx, iterator))
            })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "iterator_next",
        |mut caller: Caller<'_, BridgeState>, h: u32| -> wasmtime::Result<u32> {
            host_call_catching(&mut caller, |cx| {
                let result = match arg(cx, h)? {
                    HostValue::Iterator(iterator) => iterator.next_result(),
                    other => {
                        return Err(type_error(format!(
                            "{} is not an iterator",
                            other.debug_string()
                        )))
                    }
                };
                Ok(ret(cx, result))
            })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "iterator_done",
        |mut caller: Caller<'_, BridgeState>, h: u32| -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| {
                Ok(flag(get_property(&arg(cx, h)?, "done")?.truthy()))
            })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "iterator_value",
        |mut caller: Caller<'_, BridgeState>, h: u32| -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| {
                let value = get_property(&arg(cx, h)?, "value")?;
                Ok(ret(cx, value))
            })
        },
    )?;
    Ok(())
}
