//! Native future bridge
//!
//! A native async function returns a future handle plus three entry points:
//! `poll`, `complete` and `free`. [`rust_call_async`] drives that triple as an
//! explicit state machine:
//!
//! ```text
//! Polling --poll, wait for continuation--> Polling   (not ready)
//! Polling --poll, wait for continuation--> Ready     (POLL_READY)
//! Ready   --complete through call status--> Done
//! ```
//!
//! `free` runs exactly once when the returned future finishes or is dropped,
//! whichever comes first.

use crate::context::ContextSource;
use crate::error::{BridgeError, CallError};
use crate::ffi::status::{rust_call_with_error, CallStatus, ErrorHandler};
use std::future::Future;

/// Poll result: the future can be completed
pub const POLL_READY: i8 = 0;

/// Poll result: poll again
pub const POLL_WAKE: i8 = 1;

/// Continuation native invokes once per poll cycle
pub type ContinuationCallback = extern "C" fn(data: u64, poll_result: i8);

/// Native `poll(handle, continuation, data)`
pub type FuturePollFn =
    unsafe extern "C" fn(handle: u64, callback: ContinuationCallback, callback_data: u64);

/// Native `complete(handle, status) -> value`
pub type FutureCompleteFn<F> = unsafe extern "C" fn(handle: u64, status: *mut CallStatus) -> F;

/// Native `free(handle)`
pub type FutureFreeFn = unsafe extern "C" fn(handle: u64);

/// Entry points for one native future type
pub struct RustFutureFns<F> {
    pub poll: FuturePollFn,
    pub complete: FutureCompleteFn<F>,
    pub free: FutureFreeFn,
}

impl<F> Clone for RustFutureFns<F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<F> Copy for RustFutureFns<F> {}

impl<F> std::fmt::Debug for RustFutureFns<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RustFutureFns").finish_non_exhaustive()
    }
}

impl<F> RustFutureFns<F> {
    /// # Safety
    ///
    /// All three must belong to the same native future type and stay valid
    /// while futures created from them are alive.
    pub unsafe fn new(
        poll: FuturePollFn,
        complete: FutureCompleteFn<F>,
        free: FutureFreeFn,
    ) -> Self {
        Self {
            poll,
            complete,
            free,
        }
    }
}

struct FreeGuard {
    handle: u64,
    free: FutureFreeFn,
}

impl Drop for FreeGuard {
    fn drop(&mut self) {
        tracing::trace!(handle = self.handle, "freeing native future");
        // Safety: the handle came from native and is freed only here
        unsafe { (self.free)(self.handle) };
    }
}

/// Await a native future
///
/// `lift` converts the completed FFI value; `handler` decodes declared errors
/// exactly as for a synchronous call. The native future is freed once, on
/// success, error or when the returned future is dropped (even unpolled).
pub fn rust_call_async<S, F, T, H, L>(
    handle: u64,
    fns: RustFutureFns<F>,
    lift: L,
    handler: H,
) -> impl Future<Output = Result<T, CallError<H::Error>>>
where
    S: ContextSource,
    H: ErrorHandler,
    L: FnOnce(F) -> Result<T, BridgeError>,
{
    let guard = FreeGuard {
        handle,
        free: fns.free,
    };

    async move {
        let _guard = guard;
        let context = S::context();

        loop {
            let (token, receiver) = context.register_continuation();
            // Safety: live handle owned by this call
            unsafe { (fns.poll)(handle, continuation_callback::<S>, token) };

            let poll = receiver.await.map_err(|_| {
                BridgeError::Runtime(format!(
                    "continuation for future {} dropped before it was resolved",
                    handle
                ))
            })?;

            if poll == POLL_READY {
                break;
            }
            tracing::trace!(handle, poll, "native future not ready");
        }

        let api = context.buffer_api();
        let value = rust_call_with_error(&api, &handler, |status| unsafe {
            (fns.complete)(handle, status)
        })?;
        lift(value).map_err(CallError::Bridge)
    }
}

/// Continuation trampoline handed to native `poll`
///
/// An unknown token means native resolved a continuation twice or invented
/// one; the process cannot continue safely.
pub extern "C" fn continuation_callback<S: ContextSource>(data: u64, poll_result: i8) {
    if let Err(e) = S::context().resolve_continuation(data, poll_result) {
        tracing::error!(error = %e, token = data, "invalid future continuation");
        std::process::abort();
    }
}
