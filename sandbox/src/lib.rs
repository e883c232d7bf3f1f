//! `lightbridge-sandbox`: Wasmtime host bridge for sandboxed WASM modules.
//!
//! This crate embeds a linear-memory module and gives it a managed host
//! environment it can only reach through integer handles:
//!
//! - **Handle table:** host values behind `u32` handles, with reserved
//!   constants and a borrowed-value stack
//! - **Marshalling:** strict UTF-8 strings with an ASCII fast path, and byte
//!   buffers freed on every exit path
//! - **Scratch stack:** multi-value returns through reserved frames
//! - **Closures:** sandbox closures callable from the host, destroyed exactly once
//! - **Error channel:** exceptions carried across the boundary in both directions
//! - **Event loop:** promises, microtasks, timers, and WebSocket events
//! - **Import whitelisting:** only `host` imports allowed, no WASI
//!
//! The entry points are [`Sandbox::instantiate`] and the resulting [`Bridge`].

pub mod error;
pub mod config;
pub mod value;
pub mod state;
pub mod memory;
pub mod marshal;
pub mod scratch;
pub mod error_channel;
pub mod closures;
pub mod finalize;
pub mod event_loop;
pub mod socket;
pub mod validation;
pub mod linker;
pub mod runtime;
pub mod facade;

pub use error::SandboxError;
pub use config::SandboxConfig;
pub use runtime::{Bridge, Sandbox};
pub use state::{BridgeState, Cx};
pub use value::HostValue;
pub use event_loop::Settled;
