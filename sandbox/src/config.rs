//! Sandbox configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the WASM sandbox.
///
/// Controls memory limits, instruction fuel, and host-side heap sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Maximum linear memory pages (1 page = 64 KiB).
    /// Default: 256 pages = 16 MiB.
    pub max_memory_pages: u32,

    /// Wasmtime fuel granted to each top-level call into the bridge.
    /// `None` disables metering.
    pub fuel_limit: Option<u64>,

    /// Whether the console imports reach the host environment's console.
    pub log_guest_console: bool,

    /// Dynamic handle slots reserved up front.
    pub initial_heap_capacity: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_memory_pages: 256, // 16 MiB
            fuel_limit: Some(100_000_000),
            log_guest_console: true,
            initial_heap_capacity: 128,
        }
    }
}

impl SandboxConfig {
    /// Upper bound on linear memory in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        self.max_memory_pages as usize * 65536
    }
}
