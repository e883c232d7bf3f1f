//! Reference count and lifecycle of a sandbox closure held by the host.
//!
//! A wrapped closure has one external holder (the host value) plus one count
//! per in-flight invocation. The destructor must run exactly once, whichever
//! of these happens first:
//!
//! - the count reaches zero after an explicit release
//! - the host value is reclaimed without ever being released
//!
//! Both paths funnel through a compare-and-clear on [`Lifecycle`], so the
//! second one to arrive finds `Destroyed` and does nothing.

use lightbridge_primitives::ClosureKind;

use crate::error::HostError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Live,
    Destroyed,
}

/// Environment words to forward to one trampoline call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invocation {
    pub env_a: u32,
    pub env_b: u32,
}

/// Environment words to hand to the destructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Teardown {
    pub env_a: u32,
    pub env_b: u32,
}

#[derive(Debug)]
pub struct ClosureState {
    env_a: u32,
    env_b: u32,
    /// Word A as seen by the next invocation; zero while a call is running.
    exposed_a: u32,
    ref_count: u32,
    released: bool,
    kind: ClosureKind,
    lifecycle: Lifecycle,
}

impl ClosureState {
    pub fn new(env_a: u32, env_b: u32, kind: ClosureKind) -> Self {
        Self {
            env_a,
            env_b,
            exposed_a: env_a,
            ref_count: 1,
            released: false,
            kind,
            lifecycle: Lifecycle::Live,
        }
    }

    /// Enter an invocation.
    ///
    /// Word A is cleared for the duration of the call, so a reentrant
    /// invocation observes zero and the sandbox can refuse it.
    pub fn begin_call(&mut self) -> Result<Invocation, HostError> {
        if self.lifecycle == Lifecycle::Destroyed {
            return Err(HostError::ClosureDestroyed);
        }
        self.ref_count += 1;
        let env_a = std::mem::take(&mut self.exposed_a);
        Ok(Invocation {
            env_a,
            env_b: self.env_b,
        })
    }

    /// Leave an invocation started by [`begin_call`](Self::begin_call).
    ///
    /// Returns the destructor arguments when this was the last reference.
    pub fn end_call(&mut self, call: Invocation) -> Option<Teardown> {
        debug_assert!(self.ref_count > 0, "end_call without begin_call");
        self.ref_count = self.ref_count.saturating_sub(1);
        if self.ref_count == 0 {
            return self.destroy();
        }
        if self.kind == ClosureKind::Mut {
            self.exposed_a = call.env_a;
        }
        None
    }

    /// Explicit drop of the external reference.
    ///
    /// Destroys immediately when no call is in flight; otherwise the last
    /// call to finish performs the teardown. Releasing twice is a no-op.
    pub fn release(&mut self) -> Option<Teardown> {
        if self.released || self.lifecycle == Lifecycle::Destroyed {
            return None;
        }
        self.released = true;
        self.ref_count = self.ref_count.saturating_sub(1);
        if self.ref_count == 0 {
            self.exposed_a = 0;
            return self.destroy();
        }
        None
    }

    /// The host value became unreachable.
    pub fn reclaim(&mut self) -> Option<Teardown> {
        self.exposed_a = 0;
        self.destroy()
    }

    fn destroy(&mut self) -> Option<Teardown> {
        match std::mem::replace(&mut self.lifecycle, Lifecycle::Destroyed) {
            Lifecycle::Live => Some(Teardown {
                env_a: self.env_a,
                env_b: self.env_b,
            }),
            Lifecycle::Destroyed => None,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_live(&self) -> bool {
        self.lifecycle == Lifecycle::Live
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn kind(&self) -> ClosureKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: u32 = 0x1000;
    const B: u32 = 0x2000;

    fn mut_state() -> ClosureState {
        ClosureState::new(A, B, ClosureKind::Mut)
    }

    #[test]
    fn test_call_forwards_env_and_restores() {
        let mut state = mut_state();
        let call = state.begin_call().unwrap();
        assert_eq!(call, Invocation { env_a: A, env_b: B });
        assert_eq!(state.ref_count(), 2);
        assert_eq!(state.end_call(call), None);
        assert_eq!(state.ref_count(), 1);

        // Restored for the next call.
        let again = state.begin_call().unwrap();
        assert_eq!(again.env_a, A);
        state.end_call(again);
    }

    #[test]
    fn test_reentrant_call_sees_cleared_word() {
        let mut state = mut_state();
        let outer = state.begin_call().unwrap();
        let inner = state.begin_call().unwrap();
        assert_eq!(inner.env_a, 0);
        assert_eq!(state.end_call(inner), None);
        assert_eq!(state.end_call(outer), None);
        assert_eq!(state.begin_call().unwrap().env_a, A);
    }

    #[test]
    fn test_once_closure_does_not_restore() {
        let mut state = ClosureState::new(A, B, ClosureKind::Once);
        let call = state.begin_call().unwrap();
        assert_eq!(call.env_a, A);
        state.end_call(call);
        assert_eq!(state.begin_call().unwrap().env_a, 0);
    }

    #[test]
    fn test_release_without_calls_destroys_immediately() {
        let mut state = mut_state();
        assert_eq!(state.release(), Some(Teardown { env_a: A, env_b: B }));
        assert_eq!(state.lifecycle(), Lifecycle::Destroyed);
        assert_eq!(state.begin_call(), Err(HostError::ClosureDestroyed));
    }

    #[test]
    fn test_release_during_call_defers_to_call_end() {
        let mut state = mut_state();
        let call = state.begin_call().unwrap();
        assert_eq!(state.release(), None);
        assert!(state.is_live());
        assert_eq!(state.end_call(call), Some(Teardown { env_a: A, env_b: B }));
        assert!(!state.is_live());
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut state = mut_state();
        let call = state.begin_call().unwrap();
        assert_eq!(state.release(), None);
        assert_eq!(state.release(), None);
        assert_eq!(state.ref_count(), 1);
        assert!(state.end_call(call).is_some());
    }

    #[test]
    fn test_reclaim_after_release_is_noop() {
        let mut state = mut_state();
        assert!(state.release().is_some());
        assert_eq!(state.reclaim(), None);
    }

    #[test]
    fn test_reclaim_without_release_destroys_once() {
        let mut state = mut_state();
        assert_eq!(state.reclaim(), Some(Teardown { env_a: A, env_b: B }));
        assert_eq!(state.reclaim(), None);
        assert_eq!(state.release(), None);
    }

    #[test]
    fn test_nested_calls_then_release_destroys_exactly_once() {
        let mut state = mut_state();
        let mut teardowns = 0;
        let outer = state.begin_call().unwrap();
        let middle = state.begin_call().unwrap();
        if state.release().is_some() {
            teardowns += 1;
        }
        let inner = state.begin_call().unwrap();
        for call in [inner, middle, outer] {
            if state.end_call(call).is_some() {
                teardowns += 1;
            }
        }
        if state.reclaim().is_some() {
            teardowns += 1;
        }
        assert_eq!(teardowns, 1);
    }
}
