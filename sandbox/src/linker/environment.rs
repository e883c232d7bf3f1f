//! Randomness, clocks, and console output.

use wasmtime::{Caller, Linker};

use lightbridge_hostapi::ConsoleLevel;

use super::{arg, host_call, host_call_catching, HOST_MODULE};
use crate::error::SandboxError;
use crate::memory::range_and_state_mut;
use crate::state::{BridgeState, Cx};
use crate::value::HostValue;

pub(super) fn register(linker: &mut Linker<BridgeState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        HOST_MODULE,
        "random_fill",
        |mut caller: Caller<'_, BridgeState>, ptr: u32, len: u32| -> wasmtime::Result<()> {
            host_call_catching(&mut caller, |cx| {
                let (dest, state) = range_and_state_mut(cx, ptr, len)?;
                state.env.fill_random(dest).map_err(SandboxError::host)
            })
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "date_now",
        |mut caller: Caller<'_, BridgeState>| -> wasmtime::Result<f64> {
            host_call(&mut caller, |cx| Ok(cx.data().env.now_ms()))
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "performance_now",
        |mut caller: Caller<'_, BridgeState>| -> wasmtime::Result<f64> {
            host_call(&mut caller, |cx| Ok(cx.data().env.monotonic_ms()))
        },
    )?;

    for (name, level) in [
        ("console_debug", ConsoleLevel::Debug),
        ("console_log", ConsoleLevel::Log),
        ("console_info", ConsoleLevel::Info),
        ("console_warn", ConsoleLevel::Warn),
        ("console_error", ConsoleLevel::Error),
    ] {
        linker.func_wrap(
            HOST_MODULE,
            name,
            move |mut caller: Caller<'_, BridgeState>, h: u32| -> wasmtime::Result<()> {
                host_call(&mut caller, |cx| console(cx, level, h))
            },
        )?;
    }
    Ok(())
}

fn console(cx: &mut Cx<'_>, level: ConsoleLevel, h: u32) -> Result<(), SandboxError> {
    if !cx.data().config.log_guest_console {
        return Ok(());
    }
    let message = match arg(cx, h)? {
        HostValue::String(s) => s.to_string(),
        other => other.debug_string(),
    };
    tracing::trace!(target: "lightbridge::console", %level, "{}", message);
    cx.data_mut().env.console(level, &message);
    Ok(())
}
