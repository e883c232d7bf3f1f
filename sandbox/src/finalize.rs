//! Deferred cleanup of sandbox resources whose host owners went away.
//!
//! Dropping the last host reference to a wrapped closure or a façade object
//! cannot call into the sandbox on the spot: the drop may happen in the
//! middle of a synchronous sandbox call, or with no store in reach. Instead
//! the owner pushes a [`Reclaim`] token onto the shared [`ReclaimQueue`],
//! and [`collect`] runs the queued destructors at the next top-level
//! boundary.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use wasmtime::TypedFunc;

use lightbridge_hostapi::Teardown;

use crate::error::SandboxError;
use crate::state::{call_guest, export_func, Cx};

/// A destructor call owed to the sandbox.
pub enum Reclaim {
    /// Closure environment, freed through its table destructor.
    Closure {
        destructor: TypedFunc<(u32, u32), ()>,
        teardown: Teardown,
    },
    /// Sandbox-side object, freed through its class's `{class}_free` export.
    Object {
        class: String,
        free: TypedFunc<u32, ()>,
        ptr: u32,
    },
}

impl Reclaim {
    pub fn run(self, cx: &mut Cx<'_>) -> Result<(), SandboxError> {
        match self {
            Reclaim::Closure {
                destructor,
                teardown,
            } => {
                tracing::debug!(env_a = teardown.env_a, "running closure destructor");
                call_guest(cx, &destructor, (teardown.env_a, teardown.env_b))
            }
            Reclaim::Object { class, free, ptr } => {
                tracing::debug!(%class, ptr, "freeing sandbox object");
                call_guest(cx, &free, ptr)
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct ReclaimQueue {
    pending: Rc<RefCell<VecDeque<Reclaim>>>,
}

impl ReclaimQueue {
    pub fn push(&self, token: Reclaim) {
        self.pending.borrow_mut().push_back(token);
    }

    pub fn pop(&self) -> Option<Reclaim> {
        self.pending.borrow_mut().pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ties a [`Reclaim`] token to the lifetime of its host owner.
///
/// Dropped while still registered, the token is queued.
pub struct Registration {
    token: Option<Reclaim>,
    queue: ReclaimQueue,
}

impl Registration {
    pub fn new(queue: ReclaimQueue, token: Reclaim) -> Self {
        Self {
            token: Some(token),
            queue,
        }
    }

    /// Withdraw from automatic cleanup. The caller becomes responsible for the token.
    pub fn unregister(&mut self) -> Option<Reclaim> {
        self.token.take()
    }

    pub fn is_registered(&self) -> bool {
        self.token.is_some()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.queue.push(token);
        }
    }
}

/// Register a sandbox object of `class` at `ptr` for automatic cleanup.
pub fn register(cx: &mut Cx<'_>, class: &str, ptr: u32) -> Result<Registration, SandboxError> {
    let free = export_func::<u32, ()>(cx, &format!("{}_free", class))?;
    let token = Reclaim::Object {
        class: class.to_string(),
        free,
        ptr,
    };
    Ok(Registration::new(cx.data().reclaim.clone(), token))
}

/// Run every queued destructor, including ones queued while running.
pub fn collect(cx: &mut Cx<'_>) -> Result<usize, SandboxError> {
    let queue = cx.data().reclaim.clone();
    let mut ran = 0;
    while let Some(token) = queue.pop() {
        token.run(cx)?;
        ran += 1;
    }
    if ran > 0 {
        tracing::debug!(ran, "finalizers collected");
    }
    Ok(ran)
}
