//! Handle layout and calling-convention constants.
//!
//! The handle space is split in three:
//!
//! ```text
//! 0..4      reserved constants (undefined, null, true, false)
//! 4..128    borrowed-value stack, grows downward from 128
//! 128..     dynamically assigned handles
//! ```

use core::fmt;

use serde::{Deserialize, Serialize};

/// A 32-bit index into the host's handle table.
///
/// Handles are the only way sandbox code refers to host values. A handle is
/// valid between assignment and release; released numbers are recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(pub u32);

impl Handle {
    pub const UNDEFINED: Handle = Handle(0);
    pub const NULL: Handle = Handle(1);
    pub const TRUE: Handle = Handle(2);
    pub const FALSE: Handle = Handle(3);

    /// Lowest slot of the borrowed-value stack.
    pub const STACK_FLOOR: u32 = 4;

    /// First dynamically assigned handle; also the initial borrowed stack pointer.
    pub const DYNAMIC_THRESHOLD: u32 = 128;

    /// Raw value as passed across the boundary.
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Handle for a boolean constant.
    pub fn from_bool(value: bool) -> Self {
        if value {
            Self::TRUE
        } else {
            Self::FALSE
        }
    }

    /// True for the four reserved constants.
    pub fn is_constant(self) -> bool {
        self.0 < Self::STACK_FLOOR
    }

    /// True for slots inside the borrowed-value stack region.
    pub fn is_borrowed_slot(self) -> bool {
        (Self::STACK_FLOOR..Self::DYNAMIC_THRESHOLD).contains(&self.0)
    }

    /// True for handles that `drop` actually releases.
    pub fn is_dynamic(self) -> bool {
        self.0 >= Self::DYNAMIC_THRESHOLD
    }
}

impl From<u32> for Handle {
    fn from(raw: u32) -> Self {
        Handle(raw)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── Scratch stack result tuple ──

/// Bytes reserved on the scratch stack for one multi-value return.
pub const RET_AREA_SIZE: i32 = 16;

/// Word offsets (in bytes) of the `(value, error-or-secondary, discriminant)` tuple.
pub const RET_VALUE_OFFSET: u32 = 0;
pub const RET_SECONDARY_OFFSET: u32 = 4;
pub const RET_DISCRIMINANT_OFFSET: u32 = 8;

/// Imports that return an optional scalar write a presence flag at +0 and the
/// 8-byte payload here.
pub const RET_WIDE_OFFSET: u32 = 8;

/// Sentinel for an absent optional numeric argument.
pub const OPTION_NONE: u32 = 0x00FF_FFFF;

/// Tri-state answer of the `boolean_get` import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BoolTag {
    False = 0,
    True = 1,
    NotBoolean = 2,
}

impl BoolTag {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl From<Option<bool>> for BoolTag {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(false) => BoolTag::False,
            Some(true) => BoolTag::True,
            None => BoolTag::NotBoolean,
        }
    }
}

/// Decode an optional `u32` argument that uses [`OPTION_NONE`] for absence.
pub fn optional_u32(raw: u32) -> Option<u32> {
    if raw == OPTION_NONE {
        None
    } else {
        Some(raw)
    }
}
