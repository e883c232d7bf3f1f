//! `lightbridge-primitives`: shared vocabulary for the LightBridge host/WASM bridge.
//!
//! This crate carries no runtime. It defines the pieces both sides of the
//! boundary agree on:
//!
//! - [`Handle`] and the reserved handle layout (constants, borrowed stack, dynamic range)
//! - ABI constants for the scratch-stack result tuple and optional-argument sentinel
//! - [`ClosureShape`]: the arity/mutability of a closure trampoline
//! - [`MarshalError`]: failures moving strings and bytes across the boundary
//! - Domain enums exchanged as plain integers ([`TransactionFormat`], [`AccountType`])

pub mod types;
pub mod closure;
pub mod error;
pub mod domain;

pub use types::{
    optional_u32, BoolTag, Handle, OPTION_NONE, RET_AREA_SIZE, RET_DISCRIMINANT_OFFSET,
    RET_SECONDARY_OFFSET, RET_VALUE_OFFSET, RET_WIDE_OFFSET,
};
pub use closure::{Arity, ClosureKind, ClosureShape};
pub use error::MarshalError;
pub use domain::{AccountType, TransactionFormat};
