//! Native future bridge tests
//!
//! The fake native futures report "not ready" a configurable number of times
//! and fire every continuation from a freshly spawned thread.

mod common;

use common::*;
use common::assert_eq;
use rstest::rstest;
use std::future::Future;
use std::time::Duration;
use tether_runtime::async_runtime::{rust_call_async, RustFutureFns};
use tether_runtime::codec::StringConverter;
use tether_runtime::ffi::BufferErrorHandler;
use tether_runtime::{BridgeError, CallError};

use common::FutureEvent::{Complete, Free, Poll};

fn fns() -> RustFutureFns<i32> {
    unsafe { RustFutureFns::new(future_poll, future_complete, future_free) }
}

fn await_native(handle: u64) -> impl Future<Output = Result<i32, CallError<String>>> + Send {
    rust_call_async::<TestContext, _, _, _, _>(
        handle,
        fns(),
        |value: i32| Ok(value),
        BufferErrorHandler(StringConverter),
    )
}

fn expected_events(pending_polls: usize) -> Vec<FutureEvent> {
    let mut events = vec![Poll; pending_polls + 1];
    events.extend([Complete, Free]);
    events
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(5)]
fn test_polls_until_ready_then_completes_and_frees(#[case] pending_polls: usize) {
    let handle = start_future(pending_polls, FakeOutcome::Value(42));
    let result = context().block_on(await_native(handle));
    assert_eq!(result, Ok(42));
    assert_eq!(future_events(handle), expected_events(pending_polls));
}

#[test]
fn test_awaited_on_worker_thread() {
    let handle = start_future(3, FakeOutcome::Value(-7));
    let joined = context().block_on(context().spawn(await_native(handle)));
    assert_eq!(joined.unwrap(), Ok(-7));
    assert_eq!(future_events(handle), expected_events(3));
}

#[test]
fn test_declared_error_at_completion() {
    let handle = start_future(2, FakeOutcome::Declared("no such account".into()));
    let result = context().block_on(await_native(handle));
    assert_eq!(result, Err(CallError::Declared("no such account".to_string())));
    assert_eq!(future_events(handle), expected_events(2));
}

#[test]
fn test_panic_at_completion() {
    let handle = start_future(0, FakeOutcome::Panic("worker died".into()));
    let result = context().block_on(await_native(handle));
    assert_eq!(
        result,
        Err(CallError::Bridge(BridgeError::Panic("worker died".to_string())))
    );
    assert_eq!(future_events(handle), expected_events(0));
}

#[test]
fn test_cancellation_frees_once() {
    let handle = start_future(10_000, FakeOutcome::Value(1));
    let result = context().block_on(async {
        tokio::time::timeout(Duration::from_millis(30), await_native(handle)).await
    });
    assert!(result.is_err());

    // late continuations land on dropped receivers
    std::thread::sleep(Duration::from_millis(20));
    let events = future_events(handle);
    assert!(events.contains(&Poll));
    assert!(!events.contains(&Complete));
    assert_eq!(events.iter().filter(|e| **e == Free).count(), 1);
    assert_eq!(events.last(), Some(&Free));
}

#[test]
fn test_dropped_before_first_poll_still_frees() {
    let handle = start_future(0, FakeOutcome::Value(1));
    drop(await_native(handle));
    assert_eq!(future_events(handle), vec![Free]);
}

#[test]
fn test_lift_failure_after_completion() {
    let handle = start_future(0, FakeOutcome::Value(-1));
    let call = rust_call_async::<TestContext, _, _, _, _>(
        handle,
        fns(),
        |value: i32| u32::try_from(value).map_err(|e| BridgeError::internal(e.to_string())),
        BufferErrorHandler(StringConverter),
    );
    let result = context().block_on(call);
    assert!(matches!(result, Err(CallError::Bridge(BridgeError::Internal(_)))));
    assert_eq!(future_events(handle), expected_events(0));
}

#[test]
fn test_unknown_continuation_token_is_rejected() {
    assert!(matches!(
        context().resolve_continuation(u64::MAX, 0),
        Err(BridgeError::Internal(_))
    ));
}
