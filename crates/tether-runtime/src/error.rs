//! Error taxonomy for the FFI boundary
//!
//! Every failure the runtime can surface is a [`BridgeError`]. Calls that can
//! fail with a declared, typed error return [`CallError`], which keeps the
//! domain error separate from bridge-level failures.
//!
//! Classes:
//! - protocol violations (`Underflow`, `Internal`, `UnknownStatus`, contract
//!   mismatches, missing symbols): bugs or build skew, not business conditions
//! - panic class (`Panic`, `UndeclaredError`): unexpected failures reported by
//!   the other side of the boundary
//! - resource lifecycle (`Disposed`, `CallCounterOverflow`, `Allocation`):
//!   programming errors at the call site

use thiserror::Error;

/// Bridge-level failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Stream underflow: needed {needed} bytes, {remaining} remaining")]
    Underflow { needed: usize, remaining: usize },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Unknown call status code: {0}")]
    UnknownStatus(i8),

    #[error("Native panic: {0}")]
    Panic(String),

    #[error("Library has returned an error not declared in the interface definition")]
    UndeclaredError,

    #[error("Object has already been disposed")]
    Disposed,

    #[error("Call counter overflow")]
    CallCounterOverflow,

    #[error("Allocation failed: {0}")]
    Allocation(String),

    #[error("{namespace}: bindings expected contract version `{expected}`, library returned `{actual}`")]
    ContractVersion {
        namespace: String,
        expected: u32,
        actual: u32,
    },

    #[error("{namespace}: bindings expected function `{function}` checksum `{expected}`, library returned `{actual}`")]
    ContractChecksum {
        namespace: String,
        function: String,
        expected: u16,
        actual: u16,
    },

    #[error("Library not found: {0}")]
    LibraryNotFound(String),

    #[error("Failed to load library: {0}")]
    LibraryLoad(String),

    #[error("Symbol '{symbol}' not found in library '{library}'")]
    SymbolNotFound { library: String, symbol: String },

    #[error("Async runtime error: {0}")]
    Runtime(String),
}

impl BridgeError {
    /// Shorthand for [`BridgeError::Internal`]
    pub fn internal(msg: impl Into<String>) -> Self {
        BridgeError::Internal(msg.into())
    }

    /// Protocol violations indicate a bug in the bridge or a skewed build
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            BridgeError::Underflow { .. }
                | BridgeError::Internal(_)
                | BridgeError::UnknownStatus(_)
                | BridgeError::ContractVersion { .. }
                | BridgeError::ContractChecksum { .. }
                | BridgeError::SymbolNotFound { .. }
        )
    }

    /// Resource lifecycle violations are programming errors at the call site
    pub fn is_lifecycle_violation(&self) -> bool {
        matches!(
            self,
            BridgeError::Disposed | BridgeError::CallCounterOverflow
        )
    }
}

/// Outcome of a call whose contract declares an error type `E`
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError<E> {
    /// The declared domain error, decoded from the error buffer
    #[error("{0}")]
    Declared(E),

    /// Anything else
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl<E> CallError<E> {
    /// Returns the declared error, if this is one
    pub fn declared(self) -> Option<E> {
        match self {
            CallError::Declared(e) => Some(e),
            CallError::Bridge(_) => None,
        }
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, CallError::Bridge(BridgeError::Panic(_)))
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
