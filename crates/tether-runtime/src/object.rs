//! Native object proxies
//!
//! An [`ObjectHandle`] owns one native pointer and guarantees the native free
//! entry point runs exactly once, after every in-flight call has finished.
//!
//! Bookkeeping is two atomics:
//! - `call_counter` starts at 1 (the "alive" reference) and gains one per
//!   in-flight call
//! - `destroyed` flips false → true once, and that transition gives up the
//!   baseline reference
//!
//! Whoever brings the counter to zero performs the free. No lock is held
//! around native calls, so calls on one object run in parallel.

use crate::codec::converter::FfiConverter;
use crate::codec::stream::{StreamReader, StreamWriter};
use crate::error::{BridgeError, BridgeResult};
use crate::ffi::buffer::BufferApi;
use crate::ffi::status::{rust_call, CallStatus};
use std::collections::HashMap;
use std::ffi::c_void;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// Native `free(ptr, status)` for an object type
pub type ObjectFreeFn = unsafe extern "C" fn(ptr: *mut c_void, status: *mut CallStatus);

/// Native `clone(ptr, status) -> ptr` for reference-counted object types
pub type ObjectCloneFn =
    unsafe extern "C" fn(ptr: *mut c_void, status: *mut CallStatus) -> *mut c_void;

/// Per-type native lifetime entry points
#[derive(Debug, Clone, Copy)]
pub struct ObjectMethods {
    pub free: ObjectFreeFn,
    pub clone: Option<ObjectCloneFn>,
}

impl ObjectMethods {
    /// # Safety
    ///
    /// The entry points must belong to the same native object type and stay
    /// valid while any handle built from them is alive.
    pub unsafe fn new(free: ObjectFreeFn, clone: Option<ObjectCloneFn>) -> Self {
        Self { free, clone }
    }
}

/// Call-counted owner of a native object pointer
#[derive(Debug)]
pub struct ObjectHandle {
    pointer: *mut c_void,
    destroyed: AtomicBool,
    call_counter: AtomicI64,
    methods: ObjectMethods,
    api: BufferApi,
}

// Safety: the pointer is only handed to native entry points, which are
// thread-safe by contract; all local state is atomic.
unsafe impl Send for ObjectHandle {}
unsafe impl Sync for ObjectHandle {}

impl ObjectHandle {
    /// Take ownership of a pointer returned by a native constructor
    pub fn new(pointer: *mut c_void, methods: ObjectMethods, api: BufferApi) -> Self {
        Self {
            pointer,
            destroyed: AtomicBool::new(false),
            call_counter: AtomicI64::new(1),
            methods,
            api,
        }
    }

    /// Run `action` with a pointer valid for the duration of the call
    ///
    /// When the type is cloneable the action receives a fresh clone, which the
    /// native method consumes.
    pub fn call_with_pointer<R, F>(&self, action: F) -> BridgeResult<R>
    where
        F: FnOnce(*mut c_void) -> R,
    {
        self.acquire()?;
        let _guard = CallGuard { handle: self };
        let pointer = self.clone_pointer()?;
        Ok(action(pointer))
    }

    /// Like [`call_with_pointer`](Self::call_with_pointer) for actions that fail
    pub fn try_call_with_pointer<R, F>(&self, action: F) -> BridgeResult<R>
    where
        F: FnOnce(*mut c_void) -> BridgeResult<R>,
    {
        self.call_with_pointer(action)?
    }

    /// Request disposal; the free runs now or when the last call finishes
    pub fn destroy(&self) {
        if self
            .destroyed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.release();
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Baseline plus in-flight calls; 0 once freed
    pub fn call_count(&self) -> i64 {
        self.call_counter.load(Ordering::Acquire)
    }

    /// The pointer without any lifetime check
    ///
    /// Only for code that already holds the object alive, such as writing it
    /// into a stream inside a call. Using it after disposal is a use-after-free.
    pub fn raw_pointer(&self) -> *mut c_void {
        self.pointer
    }

    /// A pointer the caller may hand to native code as an owned reference
    pub fn lower_pointer(&self) -> BridgeResult<*mut c_void> {
        self.call_with_pointer(|pointer| pointer)
    }

    fn acquire(&self) -> BridgeResult<()> {
        let mut count = self.call_counter.load(Ordering::Acquire);
        loop {
            if count == 0 {
                return Err(BridgeError::Disposed);
            }
            if count == i64::MAX {
                return Err(BridgeError::CallCounterOverflow);
            }
            match self.call_counter.compare_exchange_weak(
                count,
                count + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(current) => count = current,
            }
        }
    }

    fn release(&self) {
        if self.call_counter.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.free_native();
        }
    }

    fn clone_pointer(&self) -> BridgeResult<*mut c_void> {
        match self.methods.clone {
            Some(clone) => {
                let pointer = self.pointer;
                rust_call(&self.api, |status| unsafe { clone(pointer, status) })
            }
            None => Ok(self.pointer),
        }
    }

    fn free_native(&self) {
        let free = self.methods.free;
        let pointer = self.pointer;
        tracing::debug!(?pointer, "freeing native object");
        if let Err(e) = rust_call(&self.api, |status| unsafe { free(pointer, status) }) {
            tracing::warn!(error = %e, ?pointer, "native object free failed");
        }
    }
}

impl Drop for ObjectHandle {
    fn drop(&mut self) {
        self.destroy();
    }
}

struct CallGuard<'a> {
    handle: &'a ObjectHandle,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.handle.release();
    }
}

/// A Rust type backed by a native object
pub trait FfiObject: Sized {
    fn from_object_handle(handle: ObjectHandle) -> Self;

    fn object_handle(&self) -> &ObjectHandle;
}

/// Object pointers travel as `u64` inside streams
pub struct ObjectConverter<T> {
    methods: ObjectMethods,
    api: BufferApi,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ObjectConverter<T> {
    pub fn new(methods: ObjectMethods, api: BufferApi) -> Self {
        Self {
            methods,
            api,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for ObjectConverter<T> {
    fn clone(&self) -> Self {
        Self::new(self.methods, self.api)
    }
}

impl<T> std::fmt::Debug for ObjectConverter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectConverter")
            .field("methods", &self.methods)
            .finish_non_exhaustive()
    }
}

impl<T: FfiObject> FfiConverter for ObjectConverter<T> {
    type Value = T;
    type Ffi = *mut c_void;

    fn lift(&self, api: &BufferApi, value: *mut c_void) -> BridgeResult<T> {
        Ok(T::from_object_handle(ObjectHandle::new(
            value,
            self.methods,
            *api,
        )))
    }

    fn lower(&self, _api: &BufferApi, value: &T) -> BridgeResult<*mut c_void> {
        value.object_handle().lower_pointer()
    }

    fn read(&self, stream: &mut StreamReader<'_>) -> BridgeResult<T> {
        let pointer = stream.read_u64()? as usize as *mut c_void;
        let api = self.api;
        self.lift(&api, pointer)
    }

    fn write(&self, value: &T, stream: &mut StreamWriter<'_>) -> BridgeResult<()> {
        let pointer = value.object_handle().lower_pointer()?;
        stream.write_u64(pointer as usize as u64)
    }

    fn allocation_size(&self, _value: &T) -> usize {
        8
    }
}

/// Explicit release of native resources held by a value
///
/// Composite types implement this field by field (see [`dispose_all!`]).
/// Disposal is idempotent.
pub trait Disposable {
    fn dispose(&self);
}

impl Disposable for ObjectHandle {
    fn dispose(&self) {
        self.destroy();
    }
}

impl<T: Disposable + ?Sized> Disposable for Arc<T> {
    fn dispose(&self) {
        (**self).dispose();
    }
}

impl<T: Disposable + ?Sized> Disposable for Box<T> {
    fn dispose(&self) {
        (**self).dispose();
    }
}

impl<T: Disposable> Disposable for Option<T> {
    fn dispose(&self) {
        if let Some(value) = self {
            value.dispose();
        }
    }
}

impl<T: Disposable> Disposable for [T] {
    fn dispose(&self) {
        self.iter().for_each(Disposable::dispose);
    }
}

impl<T: Disposable> Disposable for Vec<T> {
    fn dispose(&self) {
        self.as_slice().dispose();
    }
}

impl<K, V: Disposable, S> Disposable for HashMap<K, V, S> {
    fn dispose(&self) {
        self.values().for_each(Disposable::dispose);
    }
}

macro_rules! tuple_disposable {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: Disposable),+> Disposable for ($($name,)+) {
            fn dispose(&self) {
                $(self.$idx.dispose();)+
            }
        }
    };
}

tuple_disposable!(A: 0);
tuple_disposable!(A: 0, B: 1);
tuple_disposable!(A: 0, B: 1, C: 2);
tuple_disposable!(A: 0, B: 1, C: 2, D: 3);

/// Dispose each listed field in order
///
/// ```ignore
/// impl Disposable for Pair {
///     fn dispose(&self) {
///         dispose_all!(self.left, self.right);
///     }
/// }
/// ```
#[macro_export]
macro_rules! dispose_all {
    ($($value:expr),* $(,)?) => {
        $( $crate::object::Disposable::dispose(&$value); )*
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::buffer::ForeignBuffer;
    use std::sync::atomic::AtomicUsize;

    static FREES: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn alloc(_size: i32, _status: *mut CallStatus) -> ForeignBuffer {
        ForeignBuffer::empty()
    }

    unsafe extern "C" fn free_buffer(_buffer: ForeignBuffer, _status: *mut CallStatus) {}

    unsafe extern "C" fn free_object(_ptr: *mut c_void, _status: *mut CallStatus) {
        FREES.fetch_add(1, Ordering::SeqCst);
    }

    fn handle() -> ObjectHandle {
        let api = unsafe { BufferApi::new(alloc, free_buffer) };
        let methods = unsafe { ObjectMethods::new(free_object, None) };
        ObjectHandle::new(0x10 as *mut c_void, methods, api)
    }

    // Single test so the shared free counter is not raced by other tests
    #[test]
    fn test_lifecycle() {
        let object = handle();
        assert_eq!(object.call_count(), 1);
        let seen = object.call_with_pointer(|ptr| ptr as usize).unwrap();
        assert_eq!(seen, 0x10);
        assert_eq!(object.call_count(), 1);

        object.destroy();
        object.destroy();
        assert_eq!(FREES.load(Ordering::SeqCst), 1);
        assert!(matches!(
            object.call_with_pointer(|_| ()),
            Err(BridgeError::Disposed)
        ));
        drop(object);
        assert_eq!(FREES.load(Ordering::SeqCst), 1);

        let nested = (Some(handle()), vec![handle(), handle()]);
        nested.dispose();
        assert_eq!(FREES.load(Ordering::SeqCst), 4);
        drop(nested);
        assert_eq!(FREES.load(Ordering::SeqCst), 4);
    }
}
