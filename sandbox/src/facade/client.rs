use std::rc::Rc;

use crate::error::SandboxError;
use crate::runtime::Bridge;
use crate::state::{call_guest, export_func};
use crate::value::{HostValue, WrappedObject};

use super::{free_now, live_ptr};

const CLASS: &str = "client";

/// A light client handed out by the sandbox.
///
/// The sandbox creates clients asynchronously: [`Client::create`] returns a
/// promise that fulfils with the wrapped client once the event loop runs.
pub struct Client {
    object: Rc<WrappedObject>,
}

impl Client {
    /// Start creating a client from `config`. Returns the pending promise.
    pub fn create(bridge: &mut Bridge, config: &HostValue) -> Result<HostValue, SandboxError> {
        bridge.with_context(|cx| {
            let func = export_func::<u32, u32>(cx, "client_create")?;
            let config = cx.data_mut().alloc(config.clone());
            let promise = call_guest(cx, &func, config.as_u32())?;
            cx.data_mut().take(promise.into())
        })
    }

    /// Create a client and drive the event loop until it is ready.
    pub fn connect(bridge: &mut Bridge, config: &HostValue) -> Result<Self, SandboxError> {
        let promise = Self::create(bridge, config)?;
        let value = bridge.settle(&promise)?;
        Self::from_value(&value)
    }

    /// Recover a client from a host value, checking its class.
    pub fn from_value(value: &HostValue) -> Result<Self, SandboxError> {
        match value {
            HostValue::Wrapped(object) if object.class() == CLASS => Ok(Self {
                object: Rc::clone(object),
            }),
            other => Err(SandboxError::usage(format!(
                "expected a {}, got {}",
                CLASS,
                other.debug_string()
            ))),
        }
    }

    pub fn head_height(&self, bridge: &mut Bridge) -> Result<u32, SandboxError> {
        let ptr = live_ptr(&self.object)?;
        bridge.with_context(|cx| {
            let func = export_func::<u32, u32>(cx, "client_head_height")?;
            call_guest(cx, &func, ptr)
        })
    }

    pub fn as_value(&self) -> HostValue {
        HostValue::Wrapped(Rc::clone(&self.object))
    }

    /// Free the sandbox-side client. Every host value sharing it sees it freed.
    pub fn free(self, bridge: &mut Bridge) -> Result<(), SandboxError> {
        free_now(bridge, &self.object)
    }
}
