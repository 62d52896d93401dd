//! Async runtime infrastructure
//!
//! - Tokio runtime construction for bridge contexts
//! - A lazily started fallback runtime for callers without one
//! - The native future bridge (poll/complete/free → awaitable)

pub mod future;

pub use future::{
    continuation_callback, rust_call_async, ContinuationCallback, FutureCompleteFn,
    FutureFreeFn, FuturePollFn, RustFutureFns, POLL_READY, POLL_WAKE,
};

use crate::error::{BridgeError, BridgeResult};
use std::future::Future;
use std::sync::OnceLock;
use tokio::runtime::Runtime;

/// Fallback runtime for [`block_on`]
static TOKIO_RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Build a tokio runtime
///
/// `None` gives a current-thread runtime; `Some(n)` a multi-thread runtime
/// with `n` workers.
pub fn build_runtime(worker_threads: Option<usize>) -> BridgeResult<Runtime> {
    let mut builder = match worker_threads {
        Some(threads) => {
            let mut builder = tokio::runtime::Builder::new_multi_thread();
            builder.worker_threads(threads.max(1));
            builder
        }
        None => tokio::runtime::Builder::new_current_thread(),
    };

    builder
        .thread_name("tether-worker")
        .enable_all()
        .build()
        .map_err(|e| BridgeError::Runtime(format!("failed to start tokio runtime: {}", e)))
}

/// Get the fallback runtime, starting it on first use
pub fn runtime() -> BridgeResult<&'static Runtime> {
    if let Some(runtime) = TOKIO_RUNTIME.get() {
        return Ok(runtime);
    }
    let runtime = build_runtime(None)?;
    Ok(TOKIO_RUNTIME.get_or_init(|| runtime))
}

/// Block on a future until it completes
///
/// Bridges the sync/async boundary for callers that do not own a context.
pub fn block_on<F: Future>(future: F) -> BridgeResult<F::Output> {
    Ok(runtime()?.block_on(future))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_initialization() {
        assert!(runtime().is_ok());
    }

    #[test]
    fn test_block_on() {
        assert_eq!(block_on(async { 42 }).unwrap(), 42);
    }

    #[test]
    fn test_multi_thread_runtime() {
        let runtime = build_runtime(Some(2)).unwrap();
        let value = runtime.block_on(async { tokio::spawn(async { "hello" }).await.unwrap() });
        assert_eq!(value, "hello");
    }
}
