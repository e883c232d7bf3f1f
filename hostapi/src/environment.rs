//! Host environment: the ambient services the sandbox may reach.
//!
//! The import object exposes randomness, two clocks, and a leveled console.
//! They are routed through [`HostEnvironment`] so tests can swap in a
//! deterministic [`MemEnvironment`].

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};

use crate::error::HostError;

/// Console severity, in increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConsoleLevel {
    Debug,
    Log,
    Info,
    Warn,
    Error,
}

impl fmt::Display for ConsoleLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "debug",
            Self::Log => "log",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

pub trait HostEnvironment {
    /// Fill `dest` with cryptographically secure random bytes.
    fn fill_random(&mut self, dest: &mut [u8]) -> Result<(), HostError>;

    /// Wall-clock milliseconds since the Unix epoch.
    fn now_ms(&self) -> f64;

    /// Monotonic milliseconds since an arbitrary origin. Drives timers.
    fn monotonic_ms(&self) -> f64;

    /// Emit one console line.
    fn console(&mut self, level: ConsoleLevel, message: &str);
}

// ── System ──

/// Real clocks, OS randomness, console forwarded to `tracing`.
#[derive(Debug)]
pub struct SystemEnvironment {
    origin: Instant,
}

impl SystemEnvironment {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl HostEnvironment for SystemEnvironment {
    fn fill_random(&mut self, dest: &mut [u8]) -> Result<(), HostError> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|e| HostError::environment(format!("random source: {}", e)))
    }

    fn now_ms(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }

    fn monotonic_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }

    fn console(&mut self, level: ConsoleLevel, message: &str) {
        match level {
            ConsoleLevel::Debug => tracing::debug!(target: "lightbridge::console", "{}", message),
            ConsoleLevel::Log | ConsoleLevel::Info => {
                tracing::info!(target: "lightbridge::console", "{}", message)
            }
            ConsoleLevel::Warn => tracing::warn!(target: "lightbridge::console", "{}", message),
            ConsoleLevel::Error => tracing::error!(target: "lightbridge::console", "{}", message),
        }
    }
}

// ── In-memory ──

#[derive(Debug)]
struct MemInner {
    rng: StdRng,
    wall_ms: f64,
    monotonic_ms: f64,
    lines: Vec<(ConsoleLevel, String)>,
}

/// Deterministic environment for tests.
///
/// Clones share state, so a test can keep one clone to drive the clock and
/// inspect console output while the bridge owns another.
#[derive(Debug, Clone)]
pub struct MemEnvironment {
    inner: Rc<RefCell<MemInner>>,
}

impl MemEnvironment {
    /// Seeded randomness, both clocks at zero.
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Rc::new(RefCell::new(MemInner {
                rng: StdRng::seed_from_u64(seed),
                wall_ms: 0.0,
                monotonic_ms: 0.0,
                lines: Vec::new(),
            })),
        }
    }

    /// Move both clocks forward.
    pub fn advance(&self, ms: f64) {
        let mut inner = self.inner.borrow_mut();
        inner.wall_ms += ms;
        inner.monotonic_ms += ms;
    }

    pub fn set_wall_clock(&self, ms: f64) {
        self.inner.borrow_mut().wall_ms = ms;
    }

    /// Console lines recorded so far.
    pub fn console_lines(&self) -> Vec<(ConsoleLevel, String)> {
        self.inner.borrow().lines.clone()
    }
}

impl Default for MemEnvironment {
    fn default() -> Self {
        Self::new(0)
    }
}

impl HostEnvironment for MemEnvironment {
    fn fill_random(&mut self, dest: &mut [u8]) -> Result<(), HostError> {
        self.inner.borrow_mut().rng.fill_bytes(dest);
        Ok(())
    }

    fn now_ms(&self) -> f64 {
        self.inner.borrow().wall_ms
    }

    fn monotonic_ms(&self) -> f64 {
        self.inner.borrow().monotonic_ms
    }

    fn console(&mut self, level: ConsoleLevel, message: &str) {
        self.inner.borrow_mut().lines.push((level, message.to_string()));
    }
}
