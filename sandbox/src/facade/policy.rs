use crate::error::SandboxError;
use crate::marshal::{self, GuestSlice};
use crate::runtime::Bridge;
use crate::state::{call_guest, export_func};

use super::call_with_ret;

/// Protocol constants computed by the sandbox.
pub struct Policy;

impl Policy {
    pub fn blocks_per_batch(bridge: &mut Bridge) -> Result<u32, SandboxError> {
        bridge.with_context(|cx| {
            let func = export_func::<(), u32>(cx, "policy_blocks_per_batch")?;
            call_guest(cx, &func, ())
        })
    }

    /// First block of `epoch`, or `None` where the epoch has no blocks.
    pub fn first_block_of(bridge: &mut Bridge, epoch: u32) -> Result<Option<u32>, SandboxError> {
        bridge.with_context(|cx| {
            let tuple = call_with_ret(cx, "policy_first_block_of", |ret| (ret, epoch))?;
            Ok((tuple.value != 0).then_some(tuple.secondary))
        })
    }

    pub fn staking_contract_address(bridge: &mut Bridge) -> Result<String, SandboxError> {
        bridge.with_context(|cx| {
            let tuple = call_with_ret(cx, "policy_staking_contract_address", |ret| ret)?;
            marshal::take_string(cx, GuestSlice::new(tuple.value, tuple.secondary))
        })
    }
}
