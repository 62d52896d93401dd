//! Shared test utilities
//!
//! An in-process stand-in for a native library: a boxed-slice buffer
//! allocator, reference-counted fake objects and fake native futures whose
//! continuations fire from another thread. Every entry point is a plain
//! `extern "C"` fn, exactly what generated bindings would resolve from a
//! cdylib.

#![allow(dead_code)]

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{LazyLock, Mutex};
use std::thread;
use std::time::Duration;
use tether_runtime::async_runtime::{build_runtime, ContinuationCallback, POLL_READY, POLL_WAKE};
use tether_runtime::ffi::{BufferApi, CallStatus, ForeignBuffer, CALL_ERROR, CALL_UNEXPECTED_ERROR};
use tether_runtime::{BridgeContext, ContextSource, ObjectMethods};
use tokio::runtime::Runtime;

pub use pretty_assertions::{assert_eq, assert_ne};

// ===== Buffers =====

static LIVE_BUFFERS: AtomicUsize = AtomicUsize::new(0);

pub unsafe extern "C" fn fake_alloc(size: i32, status: *mut CallStatus) -> ForeignBuffer {
    if size < 0 {
        (*status).code = CALL_UNEXPECTED_ERROR;
        return ForeignBuffer::empty();
    }
    let bytes = vec![0u8; size as usize].into_boxed_slice();
    LIVE_BUFFERS.fetch_add(1, Ordering::SeqCst);
    ForeignBuffer {
        capacity: size,
        len: 0,
        data: Box::into_raw(bytes) as *mut u8,
    }
}

pub unsafe extern "C" fn fake_free(buffer: ForeignBuffer, _status: *mut CallStatus) {
    if buffer.data.is_null() {
        return;
    }
    let slice = std::ptr::slice_from_raw_parts_mut(buffer.data, buffer.capacity as usize);
    drop(Box::from_raw(slice));
    LIVE_BUFFERS.fetch_sub(1, Ordering::SeqCst);
}

pub fn api() -> BufferApi {
    unsafe { BufferApi::new(fake_alloc, fake_free) }
}

/// Buffers allocated and not yet freed; only meaningful in `#[serial]` tests
pub fn live_buffers() -> usize {
    LIVE_BUFFERS.load(Ordering::SeqCst)
}

/// A native-owned buffer holding `bytes`, as native code would return it
pub fn native_buffer(bytes: &[u8]) -> ForeignBuffer {
    let mut status = CallStatus::new();
    let mut buffer = unsafe { fake_alloc(bytes.len() as i32, &mut status) };
    unsafe { buffer.as_capacity_slice() }.copy_from_slice(bytes);
    buffer.len = bytes.len() as i32;
    buffer
}

/// Copy a buffer's contents and free it
pub fn take_bytes(buffer: ForeignBuffer) -> Vec<u8> {
    let bytes = unsafe { buffer.as_slice() }.to_vec();
    let mut status = CallStatus::new();
    unsafe { fake_free(buffer, &mut status) };
    bytes
}

/// Decode a buffer holding a length-less UTF-8 string and free it
pub fn take_string(buffer: ForeignBuffer) -> String {
    String::from_utf8(take_bytes(buffer)).unwrap()
}

// ===== Context =====

static RUNTIME: LazyLock<Runtime> =
    LazyLock::new(|| build_runtime(Some(2)).expect("test runtime"));

static CONTEXT: LazyLock<BridgeContext> = LazyLock::new(|| {
    BridgeContext::with_runtime_handle("fake", api(), RUNTIME.handle().clone())
});

/// Trampolines in tests resolve against this context
pub struct TestContext;

impl ContextSource for TestContext {
    fn context() -> &'static BridgeContext {
        &CONTEXT
    }
}

pub fn context() -> &'static BridgeContext {
    TestContext::context()
}

// ===== Objects =====

/// Native object with an intrusive reference count
pub struct FakeObject {
    pub value: i32,
    refs: AtomicUsize,
}

static FREED_OBJECTS: LazyLock<Mutex<Vec<usize>>> = LazyLock::new(|| Mutex::new(Vec::new()));

pub fn new_object(value: i32) -> *mut c_void {
    Box::into_raw(Box::new(FakeObject {
        value,
        refs: AtomicUsize::new(1),
    })) as *mut c_void
}

/// How many times the object at `pointer` reached a native free
pub fn times_freed(pointer: *mut c_void) -> usize {
    FREED_OBJECTS
        .lock()
        .unwrap()
        .iter()
        .filter(|freed| **freed == pointer as usize)
        .count()
}

pub unsafe extern "C" fn object_free(pointer: *mut c_void, _status: *mut CallStatus) {
    let object = pointer as *const FakeObject;
    if (*object).refs.fetch_sub(1, Ordering::SeqCst) == 1 {
        FREED_OBJECTS.lock().unwrap().push(pointer as usize);
        // Keep the allocation so `times_freed` can still compare addresses
        // without the allocator reusing them.
    }
}

pub unsafe extern "C" fn object_clone(pointer: *mut c_void, _status: *mut CallStatus) -> *mut c_void {
    (*(pointer as *const FakeObject)).refs.fetch_add(1, Ordering::SeqCst);
    pointer
}

/// Native method that borrows the object
pub unsafe extern "C" fn object_value(pointer: *mut c_void, _status: *mut CallStatus) -> i32 {
    (*(pointer as *const FakeObject)).value
}

/// Native method that consumes the reference it is given
pub unsafe extern "C" fn object_take_value(pointer: *mut c_void, status: *mut CallStatus) -> i32 {
    let value = (*(pointer as *const FakeObject)).value;
    object_free(pointer, status);
    value
}

pub fn plain_methods() -> ObjectMethods {
    unsafe { ObjectMethods::new(object_free, None) }
}

pub fn cloning_methods() -> ObjectMethods {
    unsafe { ObjectMethods::new(object_free, Some(object_clone)) }
}

pub fn object_refs(pointer: *mut c_void) -> usize {
    unsafe { (*(pointer as *const FakeObject)).refs.load(Ordering::SeqCst) }
}

// ===== Futures =====

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeOutcome {
    Value(i32),
    Declared(String),
    Panic(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureEvent {
    Poll,
    Complete,
    Free,
}

struct FakeFuture {
    pending_polls: usize,
    outcome: FakeOutcome,
    events: Vec<FutureEvent>,
}

static NEXT_FUTURE: AtomicU64 = AtomicU64::new(1);

static FUTURES: LazyLock<Mutex<HashMap<u64, FakeFuture>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Start a fake native future that reports "not ready" `pending_polls` times
pub fn start_future(pending_polls: usize, outcome: FakeOutcome) -> u64 {
    let handle = NEXT_FUTURE.fetch_add(1, Ordering::SeqCst);
    FUTURES.lock().unwrap().insert(
        handle,
        FakeFuture {
            pending_polls,
            outcome,
            events: Vec::new(),
        },
    );
    handle
}

pub fn future_events(handle: u64) -> Vec<FutureEvent> {
    FUTURES
        .lock()
        .unwrap()
        .get(&handle)
        .map(|future| future.events.clone())
        .unwrap_or_default()
}

pub unsafe extern "C" fn future_poll(handle: u64, callback: ContinuationCallback, data: u64) {
    let ready = {
        let mut futures = FUTURES.lock().unwrap();
        let future = futures.get_mut(&handle).expect("unknown future");
        future.events.push(FutureEvent::Poll);
        if future.pending_polls == 0 {
            true
        } else {
            future.pending_polls -= 1;
            false
        }
    };
    let poll = if ready { POLL_READY } else { POLL_WAKE };
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(2));
        callback(data, poll);
    });
}

pub unsafe extern "C" fn future_complete(handle: u64, status: *mut CallStatus) -> i32 {
    let outcome = {
        let mut futures = FUTURES.lock().unwrap();
        let future = futures.get_mut(&handle).expect("unknown future");
        future.events.push(FutureEvent::Complete);
        future.outcome.clone()
    };
    match outcome {
        FakeOutcome::Value(value) => value,
        FakeOutcome::Declared(message) => {
            (*status).code = CALL_ERROR;
            (*status).error_buf = native_buffer(message.as_bytes());
            0
        }
        FakeOutcome::Panic(message) => {
            (*status).code = CALL_UNEXPECTED_ERROR;
            (*status).error_buf = native_buffer(message.as_bytes());
            0
        }
    }
}

pub unsafe extern "C" fn future_free(handle: u64) {
    if let Some(future) = FUTURES.lock().unwrap().get_mut(&handle) {
        future.events.push(FutureEvent::Free);
    }
}
