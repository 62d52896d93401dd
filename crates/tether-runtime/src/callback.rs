//! Callback dispatch bridge
//!
//! Native code holds callback objects only as `u64` handles. Generated
//! trampolines (one `extern "C"` fn per interface method, collected in a
//! `'static` vtable) land here: the handle is resolved through the
//! interface's [`CallbackRegistry`], the method runs, and its outcome is
//! written back through the out-parameters as a call status:
//!
//! - `0`: return value written to the out slot
//! - `1`: declared error serialized into `error_buf`
//! - `2`: anything else, with the message as a string when it can be lowered
//!
//! Nothing unwinds into native code: panics are caught and reported as `2`.

use crate::codec::converter::{FfiConverter, StringConverter};
use crate::codec::stream::{StreamReader, StreamWriter};
use crate::context::ContextSource;
use crate::error::{BridgeError, BridgeResult};
use crate::ffi::buffer::{BufferApi, ForeignBuffer};
use crate::ffi::status::{CallStatus, CALL_ERROR, CALL_UNEXPECTED_ERROR};
use crate::handle_map::{ArcKey, RefCountedHandleMap};
use futures_util::FutureExt;
use std::any::Any;
use std::convert::Infallible;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Failure reported by a callback implementation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackError<E> {
    /// An error the interface declares
    Declared(E),
    /// Anything else; reported to native as a panic with this message
    Unexpected(String),
}

impl<E> From<BridgeError> for CallbackError<E> {
    fn from(error: BridgeError) -> Self {
        CallbackError::Unexpected(error.to_string())
    }
}

/// Result type for callback implementations
pub type CallbackResult<T, E = Infallible> = Result<T, CallbackError<E>>;

/// Native `free(handle)` vtable entry
pub type CallbackFreeFn = extern "C" fn(handle: u64);

/// Handle + free pair native holds for an async callback call in flight
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ForeignFuture {
    pub handle: u64,
    pub free: extern "C" fn(handle: u64),
}

/// Payload passed to the native completion callback
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ForeignFutureResult<R> {
    pub return_value: R,
    pub call_status: CallStatus,
}

/// Native completion callback for async callback methods
pub type ForeignFutureCompleteFn<R> =
    extern "C" fn(callback_data: u64, result: ForeignFutureResult<R>);

/// Error converter for methods that declare no error type
#[derive(Debug, Clone, Copy, Default)]
pub struct NoErrors;

impl FfiConverter for NoErrors {
    type Value = Infallible;
    type Ffi = ForeignBuffer;

    fn lift(&self, api: &BufferApi, value: ForeignBuffer) -> BridgeResult<Infallible> {
        api.free(value)?;
        Err(BridgeError::UndeclaredError)
    }

    fn lower(&self, _api: &BufferApi, value: &Infallible) -> BridgeResult<ForeignBuffer> {
        match *value {}
    }

    fn read(&self, _stream: &mut StreamReader<'_>) -> BridgeResult<Infallible> {
        Err(BridgeError::UndeclaredError)
    }

    fn write(&self, value: &Infallible, _stream: &mut StreamWriter<'_>) -> BridgeResult<()> {
        match *value {}
    }

    fn allocation_size(&self, value: &Infallible) -> usize {
        match *value {}
    }
}

/// Per-interface table of live callback objects
///
/// Objects are keyed by `Arc` identity: lowering the same `Arc` twice yields
/// the same handle with a reference count of two.
pub struct CallbackRegistry<T: ?Sized> {
    interface: &'static str,
    handles: RefCountedHandleMap<ArcKey<T>>,
    registered: AtomicBool,
}

impl<T: ?Sized> std::fmt::Debug for CallbackRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("interface", &self.interface)
            .field("live", &self.handles.len())
            .field("registered", &self.is_registered())
            .finish()
    }
}

impl<T: ?Sized> CallbackRegistry<T> {
    pub fn new(interface: &'static str) -> Self {
        Self {
            interface,
            handles: RefCountedHandleMap::new(),
            registered: AtomicBool::new(false),
        }
    }

    pub fn interface(&self) -> &'static str {
        self.interface
    }

    /// Hand the vtable to native, once
    ///
    /// Returns `false` when the vtable was already registered.
    ///
    /// # Safety
    ///
    /// `register` must be the interface's native init entry point and
    /// `vtable` must have the layout it expects.
    pub unsafe fn init<V: 'static>(
        &self,
        vtable: &'static V,
        register: unsafe extern "C" fn(vtable: *const V),
    ) -> bool {
        if self
            .registered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        register(vtable as *const V);
        tracing::debug!(interface = self.interface, "callback vtable registered");
        true
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// Drop every registered object
    pub fn teardown(&self) {
        let dropped = self.handles.drain();
        tracing::debug!(
            interface = self.interface,
            objects = dropped.len(),
            "callback registry torn down"
        );
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Register `object` (or add a reference) and return its handle
    pub fn lower(&self, object: Arc<T>) -> u64 {
        self.handles.insert(ArcKey::new(object))
    }

    pub fn try_lift(&self, handle: u64) -> Option<Arc<T>> {
        self.handles.try_get(handle).map(ArcKey::into_inner)
    }

    /// Resolve a handle that must be live
    pub fn lift(&self, handle: u64) -> BridgeResult<Arc<T>> {
        self.try_lift(handle)
            .ok_or_else(|| BridgeError::internal(missing_message(handle)))
    }

    /// The vtable `free` entry: native released one reference
    pub fn free(&self, handle: u64) -> bool {
        let evicted = self.handles.remove(handle);
        tracing::debug!(interface = self.interface, handle, evicted, "callback freed");
        evicted
    }

    /// Run a synchronous callback method for native
    ///
    /// # Safety
    ///
    /// `out_status` must be valid for writes; `out_return` must be valid for
    /// writes or null (for methods without a return value).
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn dispatch<R, E, F>(
        &self,
        api: &BufferApi,
        handle: u64,
        out_return: *mut R::Ffi,
        out_status: *mut CallStatus,
        returns: &R,
        errors: &E,
        method: F,
    ) where
        R: FfiConverter,
        E: FfiConverter<Ffi = ForeignBuffer>,
        F: FnOnce(&T) -> Result<R::Value, CallbackError<E::Value>>,
    {
        if out_status.is_null() {
            tracing::error!(interface = self.interface, handle, "callback dispatched without a status slot");
            return;
        }

        let (value, status) = match self.try_lift(handle) {
            Some(object) => {
                tracing::trace!(interface = self.interface, handle, "dispatching callback");
                let outcome = catch_unwind(AssertUnwindSafe(|| method(object.as_ref())));
                encode_outcome(api, returns, errors, outcome)
            }
            None => {
                tracing::warn!(interface = self.interface, handle, "dispatch to unknown callback handle");
                (None, unexpected_status(api, missing_message(handle)))
            }
        };

        if let Some(value) = value {
            if !out_return.is_null() {
                out_return.write(value);
            }
        }
        out_status.write(status);
    }

    /// Start an async callback method for native
    ///
    /// The method's future runs on the context's runtime. Native receives a
    /// [`ForeignFuture`] in `out_future`; calling its `free` before completion
    /// cancels the call, and `complete` is then never invoked. Otherwise
    /// `complete(callback_data, result)` reports the outcome with the same
    /// status encoding as [`dispatch`](Self::dispatch). A method that panics
    /// before returning its future completes at once with code 2 and a
    /// `ForeignFuture` handle of 0.
    ///
    /// # Safety
    ///
    /// `out_future` must be valid for writes.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn dispatch_async<S, R, E, F, Fut>(
        &self,
        handle: u64,
        complete: ForeignFutureCompleteFn<R::Ffi>,
        callback_data: u64,
        out_future: *mut ForeignFuture,
        returns: R,
        errors: E,
        method: F,
    ) where
        S: ContextSource,
        R: FfiConverter + Send + 'static,
        R::Ffi: Default,
        E: FfiConverter<Ffi = ForeignBuffer> + Send + 'static,
        F: FnOnce(Arc<T>) -> Fut,
        Fut: Future<Output = Result<R::Value, CallbackError<E::Value>>> + Send + 'static,
    {
        let context = S::context();
        let api = context.buffer_api();

        // Failures before a future exists complete at once behind a null handle
        let fail_now = |message: String| {
            if !out_future.is_null() {
                out_future.write(ForeignFuture {
                    handle: 0,
                    free: foreign_future_free::<S>,
                });
            }
            complete(
                callback_data,
                ForeignFutureResult {
                    return_value: R::Ffi::default(),
                    call_status: unexpected_status(&api, message),
                },
            );
        };

        let Some(object) = self.try_lift(handle) else {
            tracing::warn!(interface = self.interface, handle, "async dispatch to unknown callback handle");
            fail_now(missing_message(handle));
            return;
        };

        let call = match catch_unwind(AssertUnwindSafe(|| method(object))) {
            Ok(call) => call,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::warn!(interface = self.interface, handle, %message, "async callback panicked before starting");
                fail_now(message);
                return;
            }
        };

        let (cancel, cancelled) = oneshot::channel::<()>();
        let future_handle = context.insert_foreign_future(cancel);

        context.spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = cancelled => None,
                outcome = AssertUnwindSafe(call).catch_unwind() => Some(outcome),
            };

            match outcome {
                Some(outcome) => {
                    let (value, status) = encode_outcome(&api, &returns, &errors, outcome);
                    complete(
                        callback_data,
                        ForeignFutureResult {
                            return_value: value.unwrap_or_default(),
                            call_status: status,
                        },
                    );
                }
                None => tracing::debug!(future_handle, "async callback cancelled"),
            }
        });

        if !out_future.is_null() {
            out_future.write(ForeignFuture {
                handle: future_handle,
                free: foreign_future_free::<S>,
            });
        }
    }
}

/// `free` entry of [`ForeignFuture`]s handed out by `dispatch_async`
pub extern "C" fn foreign_future_free<S: ContextSource>(handle: u64) {
    S::context().free_foreign_future(handle);
}

fn missing_message(handle: u64) -> String {
    format!("No callback in handlemap '{}'", handle)
}

/// Code 2 with the message lowered as a string; an unlowerable message leaves
/// the buffer empty
fn unexpected_status(api: &BufferApi, message: String) -> CallStatus {
    CallStatus {
        code: CALL_UNEXPECTED_ERROR,
        error_buf: StringConverter.lower(api, &message).unwrap_or_default(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "callback panicked".to_string()
    }
}

/// Translate a method outcome into the out-slot value and call status
fn encode_outcome<R, E>(
    api: &BufferApi,
    returns: &R,
    errors: &E,
    outcome: std::thread::Result<Result<R::Value, CallbackError<E::Value>>>,
) -> (Option<R::Ffi>, CallStatus)
where
    R: FfiConverter,
    E: FfiConverter<Ffi = ForeignBuffer>,
{
    match outcome {
        Ok(Ok(value)) => match returns.lower(api, &value) {
            Ok(lowered) => (Some(lowered), CallStatus::new()),
            Err(e) => (None, unexpected_status(api, e.to_string())),
        },
        Ok(Err(CallbackError::Declared(error))) => match errors.lower(api, &error) {
            Ok(error_buf) => (
                None,
                CallStatus {
                    code: CALL_ERROR,
                    error_buf,
                },
            ),
            Err(e) => (None, unexpected_status(api, e.to_string())),
        },
        Ok(Err(CallbackError::Unexpected(message))) => (None, unexpected_status(api, message)),
        Err(payload) => (None, unexpected_status(api, panic_message(payload.as_ref()))),
    }
}

/// Callback objects travel as their `u64` handle
pub struct CallbackConverter<'a, T: ?Sized> {
    registry: &'a CallbackRegistry<T>,
}

impl<'a, T: ?Sized> CallbackConverter<'a, T> {
    pub fn new(registry: &'a CallbackRegistry<T>) -> Self {
        Self { registry }
    }
}

impl<T: ?Sized> FfiConverter for CallbackConverter<'_, T> {
    type Value = Arc<T>;
    type Ffi = u64;

    fn lift(&self, _api: &BufferApi, value: u64) -> BridgeResult<Arc<T>> {
        self.registry.lift(value)
    }

    fn lower(&self, _api: &BufferApi, value: &Arc<T>) -> BridgeResult<u64> {
        Ok(self.registry.lower(Arc::clone(value)))
    }

    fn read(&self, stream: &mut StreamReader<'_>) -> BridgeResult<Arc<T>> {
        self.registry.lift(stream.read_u64()?)
    }

    fn write(&self, value: &Arc<T>, stream: &mut StreamWriter<'_>) -> BridgeResult<()> {
        stream.write_u64(self.registry.lower(Arc::clone(value)))
    }

    fn allocation_size(&self, _value: &Arc<T>) -> usize {
        8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".to_string()
        }
    }

    #[test]
    fn test_lower_same_arc_shares_handle() {
        let registry: CallbackRegistry<dyn Greeter> = CallbackRegistry::new("Greeter");
        let greeter: Arc<dyn Greeter> = Arc::new(English);
        let first = registry.lower(greeter.clone());
        let second = registry.lower(greeter.clone());
        let other = registry.lower(Arc::new(English));
        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(registry.len(), 2);

        assert!(!registry.free(first));
        assert!(registry.free(first));
        assert!(registry.try_lift(first).is_none());
        assert_eq!(registry.lift(other).unwrap().greet(), "hello");
    }

    #[test]
    fn test_lift_missing_handle() {
        let registry: CallbackRegistry<dyn Greeter> = CallbackRegistry::new("Greeter");
        match registry.lift(42) {
            Err(BridgeError::Internal(message)) => {
                assert_eq!(message, "No callback in handlemap '42'")
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload = catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom 1");
        let payload = catch_unwind(|| std::panic::panic_any(7u8)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "callback panicked");
    }

    #[test]
    fn test_teardown_drops_objects() {
        let registry: CallbackRegistry<dyn Greeter> = CallbackRegistry::new("Greeter");
        let greeter: Arc<dyn Greeter> = Arc::new(English);
        registry.lower(greeter.clone());
        assert_eq!(Arc::strong_count(&greeter), 2);
        registry.teardown();
        assert_eq!(Arc::strong_count(&greeter), 1);
        assert!(registry.is_empty());
    }
}
