//! Tether Runtime - FFI marshalling and lifetime management
//!
//! This library is the runtime half of generated bindings to a native library
//! exposing a C ABI:
//! - Big-endian value codec over native-allocated buffers
//! - The call-status protocol and its error translation
//! - Handle tables for objects native code refers to by number
//! - Call-counted proxies for native objects
//! - Callback dispatch from native into Rust trait objects
//! - Awaiting native futures and exposing Rust futures to native
//! - Contract version and checksum verification at load time

/// Tether runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod async_runtime;
pub mod callback;
pub mod codec;
pub mod context;
pub mod error;
pub mod ffi;
pub mod handle_map;
pub mod logging;
pub mod object;

// Re-export commonly used types
pub use async_runtime::{rust_call_async, RustFutureFns, POLL_READY, POLL_WAKE};
pub use callback::{
    CallbackConverter, CallbackError, CallbackRegistry, CallbackResult, ForeignFuture,
    ForeignFutureResult, NoErrors,
};
pub use codec::{FfiConverter, StreamReader, StreamWriter};
pub use context::{BridgeContext, ContextSource};
pub use error::{BridgeError, BridgeResult, CallError};
pub use ffi::{
    rust_call, rust_call_with_error, BufferApi, CallStatus, ContractCheck, ForeignBuffer,
    NativeLibrary, OwnedBuffer,
};
pub use handle_map::{ArcKey, HandleMap, RefCountedHandleMap};
pub use logging::init_logging;
pub use object::{Disposable, FfiObject, ObjectConverter, ObjectHandle, ObjectMethods};
