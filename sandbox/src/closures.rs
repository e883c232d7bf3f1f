//! Sandbox closures exposed to the host as callable values.
//!
//! A closure arrives as two environment words, a destructor index, and a
//! trampoline index into the module's function table. Both entries are
//! resolved and type-checked once, when the closure is wrapped, according to
//! its [`ClosureShape`]. Trampolines take `(retptr, env_a, env_b, args...)`,
//! receive each argument as an owned handle, and report their result through
//! the scratch-stack tuple.
//!
//! Reference counting and the destroyed state live in [`ClosureState`]; this
//! module only decides when to call into the sandbox.

use std::cell::RefCell;

use wasmtime::{Ref, TypedFunc, WasmParams, WasmResults};

use lightbridge_hostapi::{ClosureState, HostError, Invocation, Lifecycle};
use lightbridge_primitives::{Arity, ClosureShape};

use crate::error::SandboxError;
use crate::error_channel::take_result;
use crate::finalize::{Reclaim, ReclaimQueue};
use crate::scratch::with_ret_area;
use crate::state::{call_guest, exports, Cx};
use crate::value::HostValue;

type Invoke0 = TypedFunc<(u32, u32, u32), ()>;
type Invoke1 = TypedFunc<(u32, u32, u32, u32), ()>;
type Invoke2 = TypedFunc<(u32, u32, u32, u32, u32), ()>;
type Destructor = TypedFunc<(u32, u32), ()>;

enum Invoker {
    Zero(Invoke0),
    One(Invoke1),
    Two(Invoke2),
}

pub struct SandboxClosure {
    state: RefCell<ClosureState>,
    shape: ClosureShape,
    invoker: Invoker,
    destructor: Destructor,
    reclaim: ReclaimQueue,
}

/// Resolve a function table entry with the given signature.
pub fn table_func<P, R>(cx: &mut Cx<'_>, index: u32) -> Result<TypedFunc<P, R>, SandboxError>
where
    P: WasmParams,
    R: WasmResults,
{
    let table = exports(cx)?
        .table
        .ok_or_else(|| SandboxError::usage("module exports no function table"))?;
    match table.get(&mut *cx, index.into()) {
        Some(Ref::Func(Some(func))) => func
            .typed::<P, R>(&*cx)
            .map_err(|e| SandboxError::usage(format!("table entry {}: {}", index, e))),
        _ => Err(SandboxError::usage(format!(
            "table entry {} is not a function",
            index
        ))),
    }
}

impl SandboxClosure {
    pub fn wrap(
        cx: &mut Cx<'_>,
        env_a: u32,
        env_b: u32,
        destructor_index: u32,
        invoke_index: u32,
        shape: ClosureShape,
    ) -> Result<Self, SandboxError> {
        let destructor = table_func::<(u32, u32), ()>(cx, destructor_index)?;
        let invoker = match shape.arity {
            Arity::Zero => Invoker::Zero(table_func(cx, invoke_index)?),
            Arity::One => Invoker::One(table_func(cx, invoke_index)?),
            Arity::Two => Invoker::Two(table_func(cx, invoke_index)?),
        };
        tracing::debug!(env_a, env_b, %shape, "wrapped closure");
        Ok(Self {
            state: RefCell::new(ClosureState::new(env_a, env_b, shape.kind)),
            shape,
            invoker,
            destructor,
            reclaim: cx.data().reclaim.clone(),
        })
    }

    pub fn shape(&self) -> ClosureShape {
        self.shape
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state.borrow().lifecycle()
    }

    pub fn ref_count(&self) -> u32 {
        self.state.borrow().ref_count()
    }

    /// Call the closure. Missing arguments are passed as `undefined`, extra ones dropped.
    pub fn invoke(&self, cx: &mut Cx<'_>, args: &[HostValue]) -> Result<HostValue, SandboxError> {
        let call = self
            .state
            .borrow_mut()
            .begin_call()
            .map_err(|e| match e {
                HostError::ClosureDestroyed => SandboxError::thrown_error(e.to_string()),
                other => SandboxError::HostError(other),
            })?;
        let outcome = self.dispatch(cx, call, args);
        let teardown = self.state.borrow_mut().end_call(call);
        if let Some(teardown) = teardown {
            tracing::debug!(env_a = teardown.env_a, "last reference gone after call");
            let destroyed = call_guest(cx, &self.destructor, (teardown.env_a, teardown.env_b));
            if outcome.is_ok() {
                destroyed?;
            }
        }
        outcome
    }

    /// Argument handles are owned by the trampoline once it is entered. If it
    /// traps instead of returning, whether it already released them is
    /// unknown, so they are abandoned rather than dropped (a dropped slot may
    /// have been reused); [`Bridge::teardown`](crate::Bridge::teardown)
    /// reclaims them with the rest of the heap.
    fn dispatch(
        &self,
        cx: &mut Cx<'_>,
        call: Invocation,
        args: &[HostValue],
    ) -> Result<HostValue, SandboxError> {
        let arg = |i: usize| args.get(i).cloned().unwrap_or(HostValue::Undefined);
        with_ret_area(cx, |cx, ret| {
            let (a, b) = (call.env_a, call.env_b);
            match &self.invoker {
                Invoker::Zero(f) => call_guest(cx, f, (ret.ptr(), a, b))?,
                Invoker::One(f) => {
                    let x = cx.data_mut().alloc(arg(0)).as_u32();
                    call_guest(cx, f, (ret.ptr(), a, b, x))?
                }
                Invoker::Two(f) => {
                    let x = cx.data_mut().alloc(arg(0)).as_u32();
                    let y = cx.data_mut().alloc(arg(1)).as_u32();
                    call_guest(cx, f, (ret.ptr(), a, b, x, y))?
                }
            }
            let tuple = ret.read(cx)?;
            take_result(cx, tuple)
        })
    }

    /// Drop the external reference.
    ///
    /// Returns true if the destructor ran now; false if an in-flight call
    /// will run it, or it already ran.
    pub fn release(&self, cx: &mut Cx<'_>) -> Result<bool, SandboxError> {
        let teardown = self.state.borrow_mut().release();
        match teardown {
            Some(teardown) => {
                tracing::debug!(env_a = teardown.env_a, "closure released");
                call_guest(cx, &self.destructor, (teardown.env_a, teardown.env_b))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Drop for SandboxClosure {
    fn drop(&mut self) {
        if let Some(teardown) = self.state.get_mut().reclaim() {
            tracing::debug!(env_a = teardown.env_a, "closure unreachable; destructor queued");
            self.reclaim.push(Reclaim::Closure {
                destructor: self.destructor.clone(),
                teardown,
            });
        }
    }
}

/// Run a stack-allocated two-argument closure once, without wrapping it.
///
/// The environment words stay owned by the sandbox frame that supplied them;
/// no destructor is involved.
pub fn call_once2(
    cx: &mut Cx<'_>,
    invoke_index: u32,
    env_a: u32,
    env_b: u32,
    x: HostValue,
    y: HostValue,
) -> Result<HostValue, SandboxError> {
    let invoke = table_func::<(u32, u32, u32, u32, u32), ()>(cx, invoke_index)?;
    with_ret_area(cx, |cx, ret| {
        let x = cx.data_mut().alloc(x).as_u32();
        let y = cx.data_mut().alloc(y).as_u32();
        call_guest(cx, &invoke, (ret.ptr(), env_a, env_b, x, y))?;
        let tuple = ret.read(cx)?;
        take_result(cx, tuple)
    })
}
