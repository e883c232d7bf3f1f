use lightbridge_primitives::{AccountType, TransactionFormat};

use crate::error::SandboxError;
use crate::error_channel::check;
use crate::marshal::{self, GuestSlice};
use crate::runtime::Bridge;
use crate::state::{call_guest, export_func};
use crate::value::WrappedObject;

use super::{adopt, call_with_ret, free_now, live_ptr};

const CLASS: &str = "transaction";

/// A signed transaction living in the sandbox.
pub struct Transaction {
    object: WrappedObject,
}

impl Transaction {
    /// Deserialize a transaction. The sandbox takes ownership of the input copy.
    pub fn from_bytes(bridge: &mut Bridge, bytes: &[u8]) -> Result<Self, SandboxError> {
        bridge.with_context(|cx| {
            let input = marshal::pass_bytes(cx, bytes)?;
            let tuple =
                call_with_ret(cx, "transaction_from_bytes", |ret| (ret, input.ptr, input.len))?;
            let tuple = check(cx, tuple)?;
            Ok(Self {
                object: adopt(cx, CLASS, tuple.value)?,
            })
        })
    }

    pub fn serialize(&self, bridge: &mut Bridge) -> Result<Vec<u8>, SandboxError> {
        let ptr = live_ptr(&self.object)?;
        bridge.with_context(|cx| {
            let tuple = call_with_ret(cx, "transaction_serialize", |ret| (ret, ptr))?;
            marshal::take_bytes(cx, GuestSlice::new(tuple.value, tuple.secondary))
        })
    }

    /// Transferred amount in the smallest unit.
    pub fn value(&self, bridge: &mut Bridge) -> Result<u64, SandboxError> {
        let ptr = live_ptr(&self.object)?;
        bridge.with_context(|cx| {
            let func = export_func::<u32, i64>(cx, "transaction_value")?;
            Ok(call_guest(cx, &func, ptr)? as u64)
        })
    }

    pub fn format(&self, bridge: &mut Bridge) -> Result<TransactionFormat, SandboxError> {
        let raw = self.small_int(bridge, "transaction_format")?;
        TransactionFormat::from_u8(raw)
            .ok_or_else(|| SandboxError::usage(format!("unknown transaction format {}", raw)))
    }

    pub fn sender_type(&self, bridge: &mut Bridge) -> Result<AccountType, SandboxError> {
        let raw = self.small_int(bridge, "transaction_sender_type")?;
        AccountType::from_u8(raw)
            .ok_or_else(|| SandboxError::usage(format!("unknown account type {}", raw)))
    }

    fn small_int(&self, bridge: &mut Bridge, export: &str) -> Result<u8, SandboxError> {
        let ptr = live_ptr(&self.object)?;
        let raw = bridge.with_context(|cx| {
            let func = export_func::<u32, u32>(cx, export)?;
            call_guest(cx, &func, ptr)
        })?;
        u8::try_from(raw).map_err(|_| SandboxError::usage(format!("{} returned {}", export, raw)))
    }

    pub fn free(self, bridge: &mut Bridge) -> Result<(), SandboxError> {
        free_now(bridge, &self.object)
    }
}
