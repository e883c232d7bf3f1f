//! Host-side event loop: promises, microtasks, timers, socket events.
//!
//! The sandbox never blocks. It expresses suspension by handing the host a
//! closure and waiting for the host to call it. All of that waiting is
//! driven from here, on the single thread that owns the store.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use lightbridge_hostapi::SocketId;

use crate::error::SandboxError;
use crate::finalize;
use crate::socket::{self, WebSocketObject};
use crate::state::Cx;
use crate::value::{call_value, HostValue};

#[derive(Debug, Clone)]
pub enum Settled {
    Fulfilled(HostValue),
    Rejected(HostValue),
}

enum PromiseState {
    Pending(Vec<Reaction>),
    Settled(Settled),
}

pub struct Promise {
    state: RefCell<PromiseState>,
}

impl Default for Promise {
    fn default() -> Self {
        Self::new()
    }
}

impl Promise {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(PromiseState::Pending(Vec::new())),
        }
    }

    pub fn outcome(&self) -> Option<Settled> {
        match &*self.state.borrow() {
            PromiseState::Pending(_) => None,
            PromiseState::Settled(outcome) => Some(outcome.clone()),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(&*self.state.borrow(), PromiseState::Pending(_))
    }
}

/// A `then` registration. Missing handlers pass the outcome through to `derived`.
pub struct Reaction {
    pub on_fulfilled: Option<HostValue>,
    pub on_rejected: Option<HostValue>,
    pub derived: Rc<Promise>,
}

pub enum Job {
    React { reaction: Reaction, outcome: Settled },
    Callback(HostValue),
}

struct Timer {
    id: u32,
    deadline: f64,
    callback: HostValue,
}

#[derive(Default)]
pub struct EventLoop {
    microtasks: VecDeque<Job>,
    timers: Vec<Timer>,
    next_timer_id: u32,
    pub sockets: BTreeMap<SocketId, Rc<WebSocketObject>>,
}

impl EventLoop {
    pub fn queue_microtask(&mut self, callback: HostValue) {
        self.microtasks.push_back(Job::Callback(callback));
    }

    /// Schedule `callback` at `now + delay`. Ids start at 1.
    pub fn set_timeout(&mut self, callback: HostValue, delay_ms: f64, now: f64) -> u32 {
        self.next_timer_id += 1;
        let id = self.next_timer_id;
        self.timers.push(Timer {
            id,
            deadline: now + delay_ms.max(0.0),
            callback,
        });
        id
    }

    pub fn clear_timeout(&mut self, id: u32) -> bool {
        let before = self.timers.len();
        self.timers.retain(|t| t.id != id);
        self.timers.len() != before
    }

    /// Earliest due timer, ties broken by scheduling order.
    fn pop_due_timer(&mut self, now: f64) -> Option<HostValue> {
        let index = self
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.deadline <= now)
            .min_by(|(_, a), (_, b)| a.deadline.total_cmp(&b.deadline).then(a.id.cmp(&b.id)))
            .map(|(i, _)| i)?;
        Some(self.timers.remove(index).callback)
    }

    pub fn next_deadline(&self) -> Option<f64> {
        self.timers.iter().map(|t| t.deadline).min_by(f64::total_cmp)
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn pending_microtasks(&self) -> usize {
        self.microtasks.len()
    }

    /// Forget all queued work and sockets.
    pub fn clear(&mut self) {
        self.microtasks.clear();
        self.timers.clear();
        self.sockets.clear();
    }
}

// ── Promise operations ──

fn settle(events: &mut EventLoop, promise: &Rc<Promise>, outcome: Settled) {
    let reactions = {
        let mut state = promise.state.borrow_mut();
        match &mut *state {
            PromiseState::Settled(_) => return,
            PromiseState::Pending(reactions) => {
                let reactions = std::mem::take(reactions);
                *state = PromiseState::Settled(outcome.clone());
                reactions
            }
        }
    };
    for reaction in reactions {
        events.microtasks.push_back(Job::React {
            reaction,
            outcome: outcome.clone(),
        });
    }
}

/// Resolve `promise` with `value`, adopting the state of a promise value.
pub fn resolve_promise(events: &mut EventLoop, promise: &Rc<Promise>, value: HostValue) {
    if let HostValue::Promise(inner) = &value {
        if Rc::ptr_eq(inner, promise) {
            reject_promise(
                events,
                promise,
                HostValue::type_error("Chaining cycle detected for promise"),
            );
            return;
        }
        subscribe(
            events,
            inner,
            Reaction {
                on_fulfilled: None,
                on_rejected: None,
                derived: Rc::clone(promise),
            },
        );
        return;
    }
    settle(events, promise, Settled::Fulfilled(value));
}

pub fn reject_promise(events: &mut EventLoop, promise: &Rc<Promise>, reason: HostValue) {
    settle(events, promise, Settled::Rejected(reason));
}

/// Register a reaction; on an already settled promise it is queued right away.
pub fn subscribe(events: &mut EventLoop, promise: &Rc<Promise>, reaction: Reaction) {
    let outcome = {
        let mut state = promise.state.borrow_mut();
        match &mut *state {
            PromiseState::Pending(reactions) => {
                reactions.push(reaction);
                return;
            }
            PromiseState::Settled(outcome) => outcome.clone(),
        }
    };
    events.microtasks.push_back(Job::React { reaction, outcome });
}

/// `promise.then(on_fulfilled, on_rejected)`
pub fn then(
    events: &mut EventLoop,
    promise: &Rc<Promise>,
    on_fulfilled: Option<HostValue>,
    on_rejected: Option<HostValue>,
) -> Rc<Promise> {
    let derived = Rc::new(Promise::new());
    subscribe(
        events,
        promise,
        Reaction {
            on_fulfilled,
            on_rejected,
            derived: Rc::clone(&derived),
        },
    );
    derived
}

/// `Promise.resolve(value)`
pub fn promise_resolve(events: &mut EventLoop, value: HostValue) -> Rc<Promise> {
    if let HostValue::Promise(existing) = value {
        return existing;
    }
    let promise = Rc::new(Promise::new());
    resolve_promise(events, &promise, value);
    promise
}

// ── Driving ──

/// Invoke a callback whose exceptions nobody can observe.
pub fn call_detached(
    cx: &mut Cx<'_>,
    callback: &HostValue,
    args: &[HostValue],
    context: &str,
) -> Result<(), SandboxError> {
    match call_value(cx, callback, args) {
        Ok(_) => Ok(()),
        Err(SandboxError::Thrown(thrown)) => {
            tracing::warn!(%context, exception = %thrown.debug_string(), "uncaught exception");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn run_job(cx: &mut Cx<'_>, job: Job) -> Result<(), SandboxError> {
    match job {
        Job::Callback(callback) => call_detached(cx, &callback, &[], "microtask"),
        Job::React { reaction, outcome } => {
            let (handler, value, fulfilled) = match outcome {
                Settled::Fulfilled(v) => (reaction.on_fulfilled, v, true),
                Settled::Rejected(v) => (reaction.on_rejected, v, false),
            };
            match handler {
                None if fulfilled => {
                    resolve_promise(&mut cx.data_mut().events, &reaction.derived, value)
                }
                None => reject_promise(&mut cx.data_mut().events, &reaction.derived, value),
                Some(handler) => match call_value(cx, &handler, &[value]) {
                    Ok(result) => {
                        resolve_promise(&mut cx.data_mut().events, &reaction.derived, result)
                    }
                    Err(SandboxError::Thrown(thrown)) => {
                        reject_promise(&mut cx.data_mut().events, &reaction.derived, thrown)
                    }
                    Err(e) => return Err(e),
                },
            }
            Ok(())
        }
    }
}

/// Run until nothing is runnable: microtasks, socket events, due timers,
/// and queued finalizers, in that order. Never waits for time to pass.
pub fn run_until_idle(cx: &mut Cx<'_>) -> Result<(), SandboxError> {
    loop {
        let mut progressed = false;

        while let Some(job) = cx.data_mut().events.microtasks.pop_front() {
            run_job(cx, job)?;
            progressed = true;
        }

        let incoming = cx.data_mut().transport.poll();
        for event in incoming {
            socket::dispatch(cx, event)?;
            progressed = true;
        }

        let now = cx.data().env.monotonic_ms();
        let due = cx.data_mut().events.pop_due_timer(now);
        if let Some(callback) = due {
            call_detached(cx, &callback, &[], "timer")?;
            progressed = true;
        }

        if finalize::collect(cx)? > 0 {
            progressed = true;
        }

        if !progressed {
            return Ok(());
        }
    }
}
