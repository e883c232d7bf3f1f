//! `lightbridge-hostapi`: host-side state and seams for the LightBridge sandbox.
//!
//! Nothing in this crate touches Wasmtime. It provides the pieces of the
//! bridge that are pure bookkeeping, plus the traits the sandbox uses to reach
//! the outside world:
//!
//! - `HandleTable`: index-reuse arena mapping handles to host values
//! - `ClosureState`: reference count and lifecycle of a wrapped sandbox closure
//! - `HostEnvironment`: randomness, clocks, and console output
//! - `WebSocketTransport`: socket lifecycle used by the WebSocket imports
//! - `HostError`: usage and environment failures

pub mod error;
pub mod heap;
pub mod closure_state;
pub mod environment;
pub mod transport;

pub use error::HostError;
pub use heap::{HandleTable, HeapValue};
pub use closure_state::{ClosureState, Invocation, Lifecycle, Teardown};
pub use environment::{ConsoleLevel, HostEnvironment, MemEnvironment, SystemEnvironment};
pub use transport::{
    DisabledTransport, MemTransport, SocketEvent, SocketId, WebSocketTransport,
};
