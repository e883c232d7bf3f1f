use crate::error::SandboxError;
use crate::error_channel::check;
use crate::marshal::{self, GuestSlice};
use crate::runtime::Bridge;
use crate::scratch::with_borrowed;
use crate::value::{HostValue, WrappedObject};

use super::{adopt, call_with_ret, free_now, live_ptr};

/// Length in bytes of a serialized address.
pub const ADDRESS_LEN: usize = 20;

const CLASS: &str = "address";

/// A chain address living in the sandbox.
pub struct Address {
    object: WrappedObject,
}

impl Address {
    /// Parse raw address bytes. The sandbox takes ownership of the input copy.
    pub fn new(bridge: &mut Bridge, bytes: &[u8]) -> Result<Self, SandboxError> {
        bridge.with_context(|cx| {
            let input = marshal::pass_bytes(cx, bytes)?;
            let tuple = call_with_ret(cx, "address_new", |ret| (ret, input.ptr, input.len))?;
            let tuple = check(cx, tuple)?;
            Ok(Self {
                object: adopt(cx, CLASS, tuple.value)?,
            })
        })
    }

    /// Parse any host value the sandbox accepts as an address. The value is
    /// lent for the duration of the call.
    pub fn from_any(bridge: &mut Bridge, value: &HostValue) -> Result<Self, SandboxError> {
        bridge.with_context(|cx| {
            let tuple = with_borrowed(cx, value.clone(), |cx, handle| {
                call_with_ret(cx, "address_from_any", |ret| (ret, handle.as_u32()))
            })?;
            let tuple = check(cx, tuple)?;
            Ok(Self {
                object: adopt(cx, CLASS, tuple.value)?,
            })
        })
    }

    pub fn to_hex(&self, bridge: &mut Bridge) -> Result<String, SandboxError> {
        let ptr = live_ptr(&self.object)?;
        bridge.with_context(|cx| {
            let tuple = call_with_ret(cx, "address_to_hex", |ret| (ret, ptr))?;
            marshal::take_string(cx, GuestSlice::new(tuple.value, tuple.secondary))
        })
    }

    pub fn free(self, bridge: &mut Bridge) -> Result<(), SandboxError> {
        free_now(bridge, &self.object)
    }
}
