//! Foreign Function Interface (FFI) boundary
//!
//! The C-ABI side of the runtime:
//! - Native-allocated byte buffers and their single-free ownership
//! - The call-status out-parameter protocol and its error translation
//! - Contract version / checksum verification
//! - Loading the native library and resolving its entry points
//!
//! # Safety
//!
//! Raw pointers and `extern "C"` function pointers enter the runtime here.
//! The rest of the crate works with the safe wrappers these modules expose.

pub mod buffer;
pub mod contract;
pub mod loader;
pub mod status;

pub use buffer::{BufferAllocFn, BufferApi, BufferFreeFn, ForeignBuffer, ForeignBytes, OwnedBuffer};
pub use contract::{check_checksums, check_contract_version, ChecksumEntry, ContractCheck};
pub use loader::NativeLibrary;
pub use status::{
    check_call_status, rust_call, rust_call_with_error, BufferErrorHandler, CallStatus,
    ErrorHandler, NullErrorHandler, CALL_ERROR, CALL_SUCCESS, CALL_UNEXPECTED_ERROR,
};
