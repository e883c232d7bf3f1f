//! `Uint8Array` construction and copies across the boundary.

use std::rc::Rc;

use wasmtime::{Caller, Linker};

use super::{arg, host_call, host_call_catching, ret, type_error, HOST_MODULE};
use crate::error::SandboxError;
use crate::marshal::{self, GuestSlice};
use crate::memory::view_mut;
use crate::state::BridgeState;
use crate::value::{ByteArray, HostValue};

fn expect_bytes(value: &HostValue) -> Result<&Rc<ByteArray>, SandboxError> {
    value
        .as_bytes()
        .ok_or_else(|| type_error(format!("{} is not a Uint8Array", value.debug_string())))
}

pub(super) fn register(linker: &mut Linker<BridgeState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        HOST_MODULE,
        "uint8array_new_with_length",
        |mut caller: Caller<'_, BridgeState>, len: u32| -> wasmtime::Result<u32> {
            host_call_catching(&mut caller, |cx| {
                // Nothing longer could ever be copied back into the sandbox.
                let limit = cx.data().config.max_memory_bytes();
                if len as usize > limit {
                    return Err(SandboxError::Thrown(HostValue::named_error(
                        "RangeError",
                        format!("Uint8Array length {} exceeds the {} byte memory limit", len, limit),
                    )));
                }
                Ok(ret(cx, HostValue::Bytes(Rc::new(ByteArray::zeroed(len as usize)))))
            })
        },
    )?;
    // Copies; later writes on either side are not shared.
    linker.func_wrap(
        HOST_MODULE,
        "uint8array_from_guest",
        |mut caller: Caller<'_, BridgeState>, ptr: u32, len: u32| -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| {
                let data = marshal::read_bytes(cx, GuestSlice::new(ptr, len))?;
                Ok(ret(cx, HostValue::bytes(data)))
            })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "uint8array_copy_to_guest",
        |mut caller: Caller<'_, BridgeState>, h: u32, ptr: u32| -> wasmtime::Result<()> {
            host_call(&mut caller, |cx| {
                let data = expect_bytes(&arg(cx, h)?)?.to_vec();
                view_mut(cx)?.write(ptr, &data)?;
                tracing::trace!(ptr, len = data.len(), "copied bytes to sandbox");
                Ok(())
            })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "uint8array_length",
        |mut caller: Caller<'_, BridgeState>, h: u32| -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| Ok(expect_bytes(&arg(cx, h)?)?.len() as u32))
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "uint8array_subarray",
        |mut caller: Caller<'_, BridgeState>, h: u32, start: u32, end: u32| -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| {
                let view = expect_bytes(&arg(cx, h)?)?.subarray(start as usize, end as usize);
                Ok(ret(cx, HostValue::Bytes(Rc::new(view))))
            })
        },
    )?;
    Ok(())
}
