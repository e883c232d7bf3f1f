//! Scratch stack: multi-value returns through a reserved frame.
//!
//! A call that returns more than one scalar gets a 16-byte frame carved off
//! the sandbox's shadow stack. The callee writes its result tuple there and
//! the caller reads it back. [`with_ret_area`] restores the stack pointer on
//! every exit path, so frames nest under reentrant calls.
//!
//! The borrowed-value stack is the host-side counterpart: values lent to the
//! sandbox for the duration of one call, popped by [`with_borrowed`].

use lightbridge_primitives::{
    Handle, RET_AREA_SIZE, RET_DISCRIMINANT_OFFSET, RET_SECONDARY_OFFSET, RET_VALUE_OFFSET,
    RET_WIDE_OFFSET,
};

use crate::error::SandboxError;
use crate::memory::{view, view_mut};
use crate::state::{call_guest, exports, Cx};
use crate::value::HostValue;

/// `(value, secondary, discriminant)` as written by the callee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetTuple {
    pub value: u32,
    pub secondary: u32,
    pub discriminant: u32,
}

impl RetTuple {
    pub fn is_err(&self) -> bool {
        self.discriminant != 0
    }
}

/// One reserved frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetArea {
    ptr: u32,
}

impl RetArea {
    /// A frame at an address the sandbox chose, as received by an import.
    pub fn at(ptr: u32) -> Result<Self, SandboxError> {
        if ptr % 8 != 0 {
            return Err(SandboxError::MemoryError(format!(
                "return area {:#x} is not 8-byte aligned",
                ptr
            )));
        }
        Ok(Self { ptr })
    }

    pub fn ptr(&self) -> u32 {
        self.ptr
    }

    pub fn read(&self, cx: &mut Cx<'_>) -> Result<RetTuple, SandboxError> {
        let view = view(cx)?;
        Ok(RetTuple {
            value: view.u32(self.ptr + RET_VALUE_OFFSET)?,
            secondary: view.u32(self.ptr + RET_SECONDARY_OFFSET)?,
            discriminant: view.u32(self.ptr + RET_DISCRIMINANT_OFFSET)?,
        })
    }

    /// Pointer/length style result.
    pub fn write_pair(&self, cx: &mut Cx<'_>, first: u32, second: u32) -> Result<(), SandboxError> {
        let mut view = view_mut(cx)?;
        view.set_u32(self.ptr + RET_VALUE_OFFSET, first)?;
        view.set_u32(self.ptr + RET_SECONDARY_OFFSET, second)?;
        Ok(())
    }

    /// Presence flag at +0, value at +8.
    pub fn write_optional_f64(&self, cx: &mut Cx<'_>, value: Option<f64>) -> Result<(), SandboxError> {
        let mut view = view_mut(cx)?;
        view.set_u32(self.ptr + RET_VALUE_OFFSET, value.is_some() as u32)?;
        view.set_f64(self.ptr + RET_WIDE_OFFSET, value.unwrap_or(0.0))?;
        Ok(())
    }

    /// Presence flag at +0, value at +8.
    pub fn write_optional_i64(&self, cx: &mut Cx<'_>, value: Option<i64>) -> Result<(), SandboxError> {
        let mut view = view_mut(cx)?;
        view.set_u32(self.ptr + RET_VALUE_OFFSET, value.is_some() as u32)?;
        view.set_i64(self.ptr + RET_WIDE_OFFSET, value.unwrap_or(0))?;
        Ok(())
    }

    pub fn read_optional_f64(&self, cx: &mut Cx<'_>) -> Result<Option<f64>, SandboxError> {
        let view = view(cx)?;
        let present = view.u32(self.ptr + RET_VALUE_OFFSET)? != 0;
        let value = view.f64(self.ptr + RET_WIDE_OFFSET)?;
        Ok(present.then_some(value))
    }
}

/// Reserve a frame for the duration of `op`.
pub fn with_ret_area<T>(
    cx: &mut Cx<'_>,
    op: impl FnOnce(&mut Cx<'_>, RetArea) -> Result<T, SandboxError>,
) -> Result<T, SandboxError> {
    let adjust = exports(cx)?.add_to_stack_pointer;
    let ptr = call_guest(cx, &adjust, -RET_AREA_SIZE)?;
    tracing::trace!(ptr, "reserved return area");
    let result = RetArea::at(ptr).and_then(|area| op(cx, area));
    let restored = call_guest(cx, &adjust, RET_AREA_SIZE);
    match (result, restored) {
        (Ok(value), Ok(_)) => Ok(value),
        (Err(e), _) | (Ok(_), Err(e)) => Err(e),
    }
}

/// Lend `value` to the sandbox for the duration of `op`.
pub fn with_borrowed<T>(
    cx: &mut Cx<'_>,
    value: HostValue,
    op: impl FnOnce(&mut Cx<'_>, Handle) -> Result<T, SandboxError>,
) -> Result<T, SandboxError> {
    let handle = cx.data_mut().heap.push_borrowed(value)?;
    let result = op(cx, handle);
    let popped = cx.data_mut().heap.pop_borrowed();
    match (result, popped) {
        (Ok(value), Ok(())) => Ok(value),
        (Err(e), _) => Err(e),
        (Ok(_), Err(e)) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ret_area_alignment() {
        assert!(RetArea::at(1024).is_ok());
        assert!(matches!(RetArea::at(1026), Err(SandboxError::MemoryError(_))));
    }

    #[test]
    fn test_tuple_discriminant() {
        let ok = RetTuple { value: 7, secondary: 0, discriminant: 0 };
        let err = RetTuple { value: 0, secondary: 130, discriminant: 1 };
        assert!(!ok.is_err());
        assert!(err.is_err());
    }
}
