//! Sandbox error types.

use lightbridge_hostapi::HostError;
use lightbridge_primitives::MarshalError;

use crate::value::HostValue;

/// Top-level error type for the sandbox crate.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Wasmtime engine, compilation, or instantiation error.
    #[error("wasmtime error: {0}")]
    Wasmtime(#[from] anyhow::Error),

    /// Module validation failed (missing exports, bad imports, etc.).
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Host API error: a bridge-contract violation or an environment failure.
    #[error("host error: {0}")]
    HostError(#[from] HostError),

    /// Value could not be marshalled across the boundary.
    #[error("marshal error: {0}")]
    Marshal(#[from] MarshalError),

    /// The bridge was driven in a way its contract forbids.
    #[error("usage error: {0}")]
    Usage(String),

    /// Memory operation failed (out-of-bounds, grow failure).
    #[error("memory error: {0}")]
    MemoryError(String),

    /// Fuel exhausted during execution.
    #[error("fuel exhausted (instruction limit)")]
    FuelExhausted,

    /// WASM guest trapped.
    #[error("guest trapped: {0}")]
    GuestTrapped(String),

    /// An exception thrown on either side of the boundary, carried verbatim.
    #[error("uncaught exception: {}", .0.debug_string())]
    Thrown(HostValue),
}

impl SandboxError {
    /// Lift a host error. Environment and transport failures become thrown
    /// `Error` values the sandbox can catch; contract violations stay fatal.
    pub fn host(err: HostError) -> Self {
        if err.is_usage() {
            SandboxError::HostError(err)
        } else {
            SandboxError::Thrown(HostValue::error(err.to_string()))
        }
    }

    pub fn thrown_error(message: impl Into<String>) -> Self {
        SandboxError::Thrown(HostValue::error(message))
    }

    pub fn usage(message: impl Into<String>) -> Self {
        SandboxError::Usage(message.into())
    }

    /// Message of a thrown error value, or the rendering of any other thrown value.
    pub fn exception_message(&self) -> Option<String> {
        match self {
            SandboxError::Thrown(HostValue::Error(e)) => Some(e.message.clone()),
            SandboxError::Thrown(HostValue::String(s)) => Some(s.to_string()),
            SandboxError::Thrown(other) => Some(other.to_display_string()),
            _ => None,
        }
    }

    /// Everything except a thrown exception unwinds through the sandbox
    /// instead of being handed to it.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SandboxError::Thrown(_))
    }
}
