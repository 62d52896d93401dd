//! Call-status protocol
//!
//! Every native call reports its outcome through a [`CallStatus`] out
//! parameter. [`check_call_status`] is the single place where that status is
//! turned into a Rust result; synchronous calls reach it through
//! [`rust_call_with_error`] / [`rust_call`], async calls at completion time.

use crate::codec::converter::{lift_string, FfiConverter};
use crate::error::{BridgeError, BridgeResult, CallError};
use crate::ffi::buffer::{BufferApi, ForeignBuffer, OwnedBuffer};
use std::convert::Infallible;

pub const CALL_SUCCESS: i8 = 0;
pub const CALL_ERROR: i8 = 1;
pub const CALL_UNEXPECTED_ERROR: i8 = 2;

/// Message used when a panic carried no readable message
pub const DEFAULT_PANIC_MESSAGE: &str = "native panic";

/// `{i8 code; ForeignBuffer error_buf}`, matching the native struct
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallStatus {
    pub code: i8,
    pub error_buf: ForeignBuffer,
}

impl CallStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.code == CALL_SUCCESS
    }

    pub fn is_error(&self) -> bool {
        self.code == CALL_ERROR
    }

    pub fn is_panic(&self) -> bool {
        self.code == CALL_UNEXPECTED_ERROR
    }
}

/// Decoder for the error buffer of calls that declare an error type
pub trait ErrorHandler {
    type Error;

    /// Decode (and free) the error buffer
    fn lift_error(&self, api: &BufferApi, error_buf: ForeignBuffer) -> BridgeResult<Self::Error>;
}

/// Handler for calls that declare no error: any code 1 is a contract breach
#[derive(Debug, Clone, Copy, Default)]
pub struct NullErrorHandler;

impl ErrorHandler for NullErrorHandler {
    type Error = Infallible;

    fn lift_error(&self, api: &BufferApi, error_buf: ForeignBuffer) -> BridgeResult<Infallible> {
        if let Err(e) = api.free(error_buf) {
            tracing::warn!(error = %e, "failed to free undeclared error buffer");
        }
        Err(BridgeError::UndeclaredError)
    }
}

/// Adapts a buffer-backed error converter into an [`ErrorHandler`]
#[derive(Debug, Clone, Default)]
pub struct BufferErrorHandler<C>(pub C);

impl<C> ErrorHandler for BufferErrorHandler<C>
where
    C: FfiConverter<Ffi = ForeignBuffer>,
{
    type Error = C::Value;

    fn lift_error(&self, api: &BufferApi, error_buf: ForeignBuffer) -> BridgeResult<C::Value> {
        self.0.lift(api, error_buf)
    }
}

/// Translate a completed call status into a result
pub fn check_call_status<H: ErrorHandler>(
    api: &BufferApi,
    handler: &H,
    status: CallStatus,
) -> Result<(), CallError<H::Error>> {
    match status.code {
        CALL_SUCCESS => Ok(()),
        CALL_ERROR => match handler.lift_error(api, status.error_buf) {
            Ok(error) => Err(CallError::Declared(error)),
            Err(e) => Err(CallError::Bridge(e)),
        },
        CALL_UNEXPECTED_ERROR => Err(CallError::Bridge(BridgeError::Panic(panic_message(
            api,
            status.error_buf,
        )))),
        other => {
            drop(OwnedBuffer::from_raw(*api, status.error_buf));
            Err(CallError::Bridge(BridgeError::UnknownStatus(other)))
        }
    }
}

/// Decode the panic message, falling back to a fixed text
///
/// An empty buffer means the other side failed while serializing the message.
fn panic_message(api: &BufferApi, error_buf: ForeignBuffer) -> String {
    if error_buf.is_empty() {
        if let Err(e) = api.free(error_buf) {
            tracing::warn!(error = %e, "failed to free empty panic buffer");
        }
        return DEFAULT_PANIC_MESSAGE.to_string();
    }
    lift_string(api, error_buf).unwrap_or_else(|_| DEFAULT_PANIC_MESSAGE.to_string())
}

/// Call a native function whose contract declares an error type
pub fn rust_call_with_error<T, H, F>(
    api: &BufferApi,
    handler: &H,
    call: F,
) -> Result<T, CallError<H::Error>>
where
    H: ErrorHandler,
    F: FnOnce(&mut CallStatus) -> T,
{
    let mut status = CallStatus::new();
    let value = call(&mut status);
    check_call_status(api, handler, status)?;
    Ok(value)
}

/// Call a native function that declares no error
pub fn rust_call<T, F>(api: &BufferApi, call: F) -> BridgeResult<T>
where
    F: FnOnce(&mut CallStatus) -> T,
{
    rust_call_with_error(api, &NullErrorHandler, call).map_err(|e| match e {
        CallError::Declared(never) => match never {},
        CallError::Bridge(e) => e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let mut status = CallStatus::new();
        assert!(status.is_success());
        status.code = CALL_ERROR;
        assert!(status.is_error());
        status.code = CALL_UNEXPECTED_ERROR;
        assert!(status.is_panic());
    }

    #[test]
    fn test_status_layout() {
        assert_eq!(
            std::mem::offset_of!(CallStatus, error_buf),
            std::mem::align_of::<ForeignBuffer>()
        );
    }
}
