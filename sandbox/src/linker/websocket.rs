//! WebSocket lifecycle imports.

use std::rc::Rc;

use wasmtime::{Caller, Linker};

use lightbridge_primitives::optional_u32;

use super::reflect::get_property;
use super::{arg, guest_str, host_call, host_call_catching, ret, type_error, HOST_MODULE};
use crate::error::SandboxError;
use crate::marshal::{self, GuestSlice};
use crate::socket::{HandlerSlot, WebSocketObject};
use crate::state::{BridgeState, Cx};
use crate::value::HostValue;

fn expect_socket(cx: &Cx<'_>, h: u32) -> Result<Rc<WebSocketObject>, SandboxError> {
    match arg(cx, h)? {
        HostValue::WebSocket(socket) => Ok(socket),
        other => Err(type_error(format!("{} is not a WebSocket", other.debug_string()))),
    }
}

fn register_handler_slot(
    linker: &mut Linker<BridgeState>,
    name: &str,
    slot: HandlerSlot,
) -> Result<(), SandboxError> {
    linker.func_wrap(
        HOST_MODULE,
        name,
        move |mut caller: Caller<'_, BridgeState>, ws: u32, f: u32| -> wasmtime::Result<()> {
            host_call(&mut caller, |cx| {
                let socket = expect_socket(cx, ws)?;
                socket.set_handler(slot, arg(cx, f)?);
                Ok(())
            })
        },
    )?;
    Ok(())
}

pub(super) fn register(linker: &mut Linker<BridgeState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        HOST_MODULE,
        "websocket_new",
        |mut caller: Caller<'_, BridgeState>, ptr: u32, len: u32| -> wasmtime::Result<u32> {
            host_call_catching(&mut caller, |cx| {
                let url = guest_str(cx, ptr, len)?;
                let socket = WebSocketObject::connect(cx, &url)?;
                Ok(ret(cx, HostValue::WebSocket(socket)))
            })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "websocket_set_binary_type",
        |mut caller: Caller<'_, BridgeState>, ws: u32, ptr: u32, len: u32| -> wasmtime::Result<()> {
            host_call(&mut caller, |cx| {
                let socket = expect_socket(cx, ws)?;
                socket.set_binary_type(&guest_str(cx, ptr, len)?);
                Ok(())
            })
        },
    )?;
    register_handler_slot(linker, "websocket_set_onopen", HandlerSlot::Open)?;
    register_handler_slot(linker, "websocket_set_onmessage", HandlerSlot::Message)?;
    register_handler_slot(linker, "websocket_set_onerror", HandlerSlot::Error)?;
    register_handler_slot(linker, "websocket_set_onclose", HandlerSlot::Close)?;

    linker.func_wrap(
        HOST_MODULE,
        "websocket_send",
        |mut caller: Caller<'_, BridgeState>, ws: u32, ptr: u32, len: u32| -> wasmtime::Result<()> {
            host_call_catching(&mut caller, |cx| {
                let socket = expect_socket(cx, ws)?;
                let data = marshal::read_bytes(cx, GuestSlice::new(ptr, len))?;
                socket.send(cx, &data)
            })
        },
    )?;
    // `code` uses the absent sentinel; a zero `reason_ptr` means no reason.
    linker.func_wrap(
        HOST_MODULE,
        "websocket_close",
        |mut caller: Caller<'_, BridgeState>,
         ws: u32,
         code: u32,
         reason_ptr: u32,
         reason_len: u32|
         -> wasmtime::Result<()> {
            host_call_catching(&mut caller, |cx| {
                let socket = expect_socket(cx, ws)?;
                let code = match optional_u32(code) {
                    Some(code) => Some(u16::try_from(code).map_err(|_| {
                        SandboxError::Thrown(HostValue::named_error(
                            "InvalidAccessError",
                            format!("{} is not a valid close code", code),
                        ))
                    })?),
                    None => None,
                };
                let reason = match reason_ptr {
                    0 => None,
                    ptr => Some(guest_str(cx, ptr, reason_len)?),
                };
                socket.close(cx, code, reason.as_deref())
            })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "websocket_ready_state",
        |mut caller: Caller<'_, BridgeState>, ws: u32| -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| Ok(expect_socket(cx, ws)?.ready_state() as u32))
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "event_data",
        |mut caller: Caller<'_, BridgeState>, ev: u32| -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| {
                let data = get_property(&arg(cx, ev)?, "data")?;
                Ok(ret(cx, data))
            })
        },
    )?;
    Ok(())
}
