//! Closure adapter tests: invocation, reentrancy, call-once closures, and
//! exactly-once destruction on every release path.

mod common;

use proptest::prelude::*;

use lightbridge_hostapi::Lifecycle;
use lightbridge_sandbox::{Bridge, HostValue, SandboxError};

use common::*;

const ARITY0: u32 = 0;
const ARITY1: u32 = 1;
const ONCE: u32 = 0b100;

fn lifecycle(value: &HostValue) -> Lifecycle {
    value
        .as_function()
        .and_then(|f| f.as_closure())
        .expect("sandbox closure")
        .lifecycle()
}

// ── Test: invocation ──

#[test]
fn test_invoke_passes_environment() {
    init_tracing();
    let mut h = harness();
    let closure = make_closure(&mut h.bridge, 77, 0, ARITY0);
    assert!(closure.is_function());

    for _ in 0..3 {
        let result = h.bridge.call_function(&closure, &[]).unwrap();
        assert!(result.is_undefined());
    }
    assert_eq!(counter(&mut h.bridge, "invoke_count"), 3);
    assert_eq!(counter(&mut h.bridge, "last_invoke_a"), 77, "word A restored after each call");
    assert_eq!(h.bridge.scratch_pointer().unwrap(), 1024);
}

#[test]
fn test_argument_echoed_and_released() {
    let mut h = harness();
    let closure = make_closure(&mut h.bridge, 1, 0, ARITY1);

    let result = h
        .bridge
        .call_function(&closure, &[HostValue::string("hi")])
        .unwrap();
    assert!(result.strict_eq(&HostValue::string("hi")));
    assert_eq!(h.bridge.live_handles(), 0);
}

#[test]
fn test_missing_arguments_are_undefined() {
    let mut h = harness();
    let closure = make_closure(&mut h.bridge, 1, 0, ARITY1);
    let result = h.bridge.call_function(&closure, &[]).unwrap();
    assert!(result.is_undefined());
}

#[test]
fn test_call_from_sandbox_through_import() {
    let mut h = harness();
    let closure = make_closure(&mut h.bridge, 9, 0, ARITY1);
    let f = h.bridge.alloc(closure);
    let x = h.bridge.alloc(HostValue::Number(3.0));

    let r = h
        .bridge
        .call_export::<(u32, u32), u32>("call_function1", (f.as_u32(), x.as_u32()))
        .unwrap();
    let result = h.bridge.take(r.into()).unwrap();
    assert_eq!(result.as_f64(), Some(3.0));
    assert_eq!(counter(&mut h.bridge, "last_invoke_a"), 9);
}

// ── Test: reentrancy ──

#[test]
fn test_reentrant_call_refused() {
    let mut h = harness();
    let closure = make_closure(&mut h.bridge, 5, 0, ARITY1);

    // The trampoline calls its argument with itself; the nested call sees word A cleared.
    let err = h
        .bridge
        .call_function(&closure, &[closure.clone()])
        .err()
        .expect("reentrant call should throw");

    let message = err.exception_message().unwrap_or_default();
    assert!(message.contains("recursively"), "got {:?}", message);
    assert_eq!(counter(&mut h.bridge, "invoke_count"), 1);
    assert_eq!(lifecycle(&closure), Lifecycle::Live);
    assert_eq!(h.bridge.scratch_pointer().unwrap(), 1024, "both frames restored");
    assert_eq!(h.bridge.borrowed_stack_pointer(), 128);

    // Still callable afterwards.
    h.bridge.call_function(&closure, &[]).unwrap();
    assert_eq!(counter(&mut h.bridge, "invoke_count"), 2);
}

/// Sandbox → host → closure → host → closure, with the innermost call raising.
/// Returns the message of the exception left for the sandbox.
fn nested_raise_from_sandbox(bridge: &mut Bridge, closure: &HostValue) -> String {
    let f = bridge.alloc(closure.clone());
    let r = bridge
        .call_export::<(u32, u32), u32>("call_function1", (f.as_u32(), f.as_u32()))
        .unwrap();
    assert_eq!(r, 0);
    bridge.drop_ref(f).unwrap();
    take_exception(bridge).debug_string()
}

#[test]
fn test_nested_raise_keeps_scratch_balanced() {
    let mut h = harness();
    let closure = make_closure(&mut h.bridge, 6, 0, ARITY1);

    let message = nested_raise_from_sandbox(&mut h.bridge, &closure);
    assert!(message.contains("recursively"), "got {:?}", message);
    assert_eq!(h.bridge.scratch_pointer().unwrap(), 1024);
    assert_eq!(h.bridge.borrowed_stack_pointer(), 128);
    assert_eq!(h.bridge.live_handles(), 0);
    assert_eq!(lifecycle(&closure), Lifecycle::Live);
}

#[derive(Debug, Clone)]
enum Step {
    Plain,
    Reentrant,
    NestedFromSandbox,
    Throw,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(Step::Plain),
        Just(Step::Reentrant),
        Just(Step::NestedFromSandbox),
        Just(Step::Throw),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_nested_calls_leave_stacks_balanced(steps in prop::collection::vec(step(), 1..8)) {
        let mut h = harness();
        let closure = make_closure(&mut h.bridge, 2, 0, ARITY1);

        for step in &steps {
            match step {
                Step::Plain => {
                    let r = h.bridge.call_function(&closure, &[HostValue::Number(4.0)]).unwrap();
                    prop_assert_eq!(r.as_f64(), Some(4.0));
                }
                Step::Reentrant => {
                    let r = h.bridge.call_function(&closure, &[closure.clone()]);
                    prop_assert!(r.is_err());
                }
                Step::NestedFromSandbox => {
                    nested_raise_from_sandbox(&mut h.bridge, &closure);
                }
                Step::Throw => {
                    let r = call_with_str::<()>(&mut h.bridge, "throw_message", "nope");
                    prop_assert!(matches!(r, Err(SandboxError::Thrown(_))));
                }
            }
            prop_assert_eq!(h.bridge.scratch_pointer().unwrap(), 1024);
            prop_assert_eq!(h.bridge.borrowed_stack_pointer(), 128);
        }
        prop_assert_eq!(h.bridge.live_handles(), 0);
    }
}

// ── Test: call-once closures ──

#[test]
fn test_once_closure_second_call_throws() {
    let mut h = harness();
    let closure = make_closure(&mut h.bridge, 11, 0, ARITY0 | ONCE);

    h.bridge.call_function(&closure, &[]).unwrap();
    let err = h
        .bridge
        .call_function(&closure, &[])
        .err()
        .expect("second call should throw");
    assert!(matches!(err, SandboxError::Thrown(_)));
    assert_eq!(counter(&mut h.bridge, "invoke_count"), 1);
}

// ── Test: destruction ──

#[test]
fn test_explicit_drop_from_sandbox() {
    let mut h = harness();
    let handle = h
        .bridge
        .call_export::<(u32, u32, u32), u32>("make_closure", (21, 0, ARITY0))
        .unwrap();

    let destroyed = h.bridge.call_export::<u32, u32>("drop_closure", handle).unwrap();
    assert_eq!(destroyed, 1);
    assert_eq!(counter(&mut h.bridge, "dtor_count"), 1);
    assert_eq!(counter(&mut h.bridge, "last_dtor_a"), 21, "destructor sees the original word A");
    assert_eq!(h.bridge.live_handles(), 0);

    h.bridge.collect_garbage().unwrap();
    assert_eq!(counter(&mut h.bridge, "dtor_count"), 1);
}

#[test]
fn test_explicit_drop_from_host() {
    let mut h = harness();
    let closure = make_closure(&mut h.bridge, 4, 0, ARITY0);

    assert!(h.bridge.drop_closure(&closure).unwrap());
    assert!(!h.bridge.drop_closure(&closure).unwrap(), "second release is a no-op");
    assert_eq!(lifecycle(&closure), Lifecycle::Destroyed);

    let err = h.bridge.call_function(&closure, &[]).err().expect("destroyed");
    assert!(matches!(err, SandboxError::Thrown(_)));

    drop(closure);
    h.bridge.collect_garbage().unwrap();
    assert_eq!(counter(&mut h.bridge, "dtor_count"), 1);
    assert_eq!(counter(&mut h.bridge, "invoke_count"), 0);
}

#[test]
fn test_release_during_call_defers_destructor() {
    let mut h = harness();
    // env_b = 1: the trampoline drops the closure it was handed.
    let closure = make_closure(&mut h.bridge, 8, 1, ARITY1);

    h.bridge.call_function(&closure, &[closure.clone()]).unwrap();
    assert_eq!(counter(&mut h.bridge, "dtor_count"), 1, "ran once the call returned");
    assert_eq!(lifecycle(&closure), Lifecycle::Destroyed);

    drop(closure);
    h.bridge.collect_garbage().unwrap();
    assert_eq!(counter(&mut h.bridge, "dtor_count"), 1);
}

#[test]
fn test_unreachable_closure_reclaimed() {
    let mut h = harness();
    let closure = make_closure(&mut h.bridge, 30, 0, ARITY0);
    h.bridge.call_function(&closure, &[]).unwrap();

    drop(closure);
    assert_eq!(h.bridge.pending_reclaims(), 1);
    assert_eq!(counter(&mut h.bridge, "dtor_count"), 0, "nothing runs inside drop");

    // The previous call boundary collected it.
    assert_eq!(h.bridge.pending_reclaims(), 0);
    assert_eq!(counter(&mut h.bridge, "dtor_count"), 1);
    assert_eq!(counter(&mut h.bridge, "last_dtor_a"), 30);
}

#[test]
fn test_trapping_trampoline_abandons_arguments() {
    let mut h = harness();
    // env_b = 2: the trampoline traps before taking its argument.
    let closure = make_closure(&mut h.bridge, 3, 2, ARITY1);

    let result = h.bridge.call_function(&closure, &[HostValue::Number(1.0)]);
    assert!(matches!(result, Err(SandboxError::GuestTrapped(_))), "got {:?}", result);
    assert_eq!(h.bridge.scratch_pointer().unwrap(), 1024);
    assert_eq!(h.bridge.live_handles(), 1, "argument left for teardown");
    assert_eq!(lifecycle(&closure), Lifecycle::Live);

    drop(closure);
    assert_eq!(h.bridge.teardown().unwrap(), 1);
}

#[test]
fn test_drop_non_closure_is_usage_error() {
    let mut h = harness();
    let err = h
        .bridge
        .drop_closure(&HostValue::Number(1.0))
        .err()
        .expect("not a closure");
    assert!(matches!(err, SandboxError::Usage(_)));
}

#[test]
fn test_sandbox_drop_of_non_closure_is_usage_error() {
    let mut h = harness();
    let number = h.bridge.alloc(HostValue::Number(1.0));

    let result = h
        .bridge
        .call_export::<u32, u32>("drop_closure", number.as_u32());
    assert!(matches!(result, Err(SandboxError::Usage(_))), "got {:?}", result);
    assert_eq!(h.bridge.live_handles(), 1, "handle left in place");
    assert_eq!(h.bridge.get(number).unwrap().as_f64(), Some(1.0));
    assert_eq!(h.bridge.scratch_pointer().unwrap(), 1024);
}

#[test]
fn test_unknown_shape_unwinds() {
    let mut h = harness();
    let result = h
        .bridge
        .call_export::<(u32, u32, u32), u32>("make_closure", (1, 0, 3));
    assert!(matches!(result, Err(SandboxError::Usage(_))));
    assert_eq!(h.bridge.scratch_pointer().unwrap(), 1024);
}
