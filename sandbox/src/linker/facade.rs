//! Wrapping sandbox-owned façade objects into host values.

use std::rc::Rc;

use wasmtime::{Caller, Linker};

use super::{host_call, ret, HOST_MODULE};
use crate::error::SandboxError;
use crate::finalize;
use crate::state::BridgeState;
use crate::value::{HostValue, WrappedObject};

pub(super) fn register(linker: &mut Linker<BridgeState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        HOST_MODULE,
        "client_new",
        |mut caller: Caller<'_, BridgeState>, ptr: u32| -> wasmtime::Result<u32> {
            host_call(&mut caller, |cx| {
                let registration = finalize::register(cx, "client", ptr)?;
                let client = WrappedObject::new("client", ptr, registration);
                tracing::debug!(ptr, "client handed to host");
                Ok(ret(cx, HostValue::Wrapped(Rc::new(client))))
            })
        },
    )?;
    Ok(())
}
