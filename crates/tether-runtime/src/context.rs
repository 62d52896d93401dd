//! Runtime context
//!
//! Everything the bridge mutates at runtime lives in a [`BridgeContext`]: the
//! native buffer allocator, the continuation table for futures being awaited,
//! the table of async callback calls native may cancel, and the tokio runtime
//! those calls run on.
//!
//! C trampolines cannot carry a context argument, so they reach it through a
//! [`ContextSource`] type parameter that names a `'static` context.

use crate::async_runtime::build_runtime;
use crate::error::{BridgeError, BridgeResult};
use crate::ffi::buffer::BufferApi;
use crate::ffi::loader::NativeLibrary;
use crate::handle_map::HandleMap;
use crate::logging::init_logging;
use std::future::Future;
use tether_config::BindingsConfig;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Type-level accessor for the context a trampoline runs against
pub trait ContextSource: 'static {
    fn context() -> &'static BridgeContext;
}

#[derive(Debug)]
enum RuntimeSlot {
    Owned(Runtime),
    Shared(Handle),
}

/// Bridge state for one native library
#[derive(Debug)]
pub struct BridgeContext {
    namespace: String,
    api: BufferApi,
    continuations: HandleMap<oneshot::Sender<i8>>,
    foreign_futures: HandleMap<oneshot::Sender<()>>,
    runtime: RuntimeSlot,
    library: Option<NativeLibrary>,
}

impl BridgeContext {
    /// Context with its own current-thread runtime
    pub fn new(namespace: impl Into<String>, api: BufferApi) -> BridgeResult<Self> {
        Ok(Self::build(
            namespace.into(),
            api,
            RuntimeSlot::Owned(build_runtime(None)?),
            None,
        ))
    }

    /// Context that spawns onto an existing runtime
    pub fn with_runtime_handle(
        namespace: impl Into<String>,
        api: BufferApi,
        handle: Handle,
    ) -> Self {
        Self::build(namespace.into(), api, RuntimeSlot::Shared(handle), None)
    }

    /// Load the configured library, verify its contract and start a runtime
    ///
    /// Also installs the fallback log subscriber with the configured filter
    /// unless the host already set one up.
    ///
    /// # Safety
    ///
    /// Loads and runs native code; see [`NativeLibrary::open`].
    pub unsafe fn from_config(config: &BindingsConfig) -> BridgeResult<Self> {
        init_logging(config.runtime.log_filter.as_deref());
        let library = NativeLibrary::open(&config.library.cdylib_name, &config.library.search_paths)?;
        let namespace = config.namespace().to_string();

        library
            .contract_check(&namespace, &config.contract)?
            .verify_once()?;

        let api = library.buffer_api(&namespace)?;
        let runtime = build_runtime(config.runtime.worker_threads)?;
        tracing::info!(
            namespace = %namespace,
            library = %library.path().display(),
            "bridge context ready"
        );

        Ok(Self::build(
            namespace,
            api,
            RuntimeSlot::Owned(runtime),
            Some(library),
        ))
    }

    fn build(
        namespace: String,
        api: BufferApi,
        runtime: RuntimeSlot,
        library: Option<NativeLibrary>,
    ) -> Self {
        Self {
            namespace,
            api,
            continuations: HandleMap::new(),
            foreign_futures: HandleMap::new(),
            runtime,
            library,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn buffer_api(&self) -> BufferApi {
        self.api
    }

    /// The loaded library, when built from configuration
    pub fn library(&self) -> Option<&NativeLibrary> {
        self.library.as_ref()
    }

    pub fn runtime_handle(&self) -> &Handle {
        match &self.runtime {
            RuntimeSlot::Owned(runtime) => runtime.handle(),
            RuntimeSlot::Shared(handle) => handle,
        }
    }

    /// Run a future to completion on this context's runtime
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        match &self.runtime {
            RuntimeSlot::Owned(runtime) => runtime.block_on(future),
            RuntimeSlot::Shared(handle) => handle.block_on(future),
        }
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime_handle().spawn(future)
    }

    /// Register a one-shot readiness slot for one poll cycle
    pub fn register_continuation(&self) -> (u64, oneshot::Receiver<i8>) {
        let (sender, receiver) = oneshot::channel();
        (self.continuations.insert(sender), receiver)
    }

    /// Deliver a poll result to the slot registered under `token`
    ///
    /// The token is removed in the same step, so a second delivery for the
    /// same token fails. A receiver that was dropped is ignored.
    pub fn resolve_continuation(&self, token: u64, poll: i8) -> BridgeResult<()> {
        let sender = self.continuations.take(token).ok_or_else(|| {
            BridgeError::internal(format!("continuation token {} is not registered", token))
        })?;
        if sender.send(poll).is_err() {
            tracing::debug!(token, "continuation resolved after its waiter went away");
        }
        Ok(())
    }

    pub fn pending_continuations(&self) -> usize {
        self.continuations.len()
    }

    /// Track an async callback call native may cancel
    pub fn insert_foreign_future(&self, cancel: oneshot::Sender<()>) -> u64 {
        self.foreign_futures.insert(cancel)
    }

    /// Native released a foreign future: cancel it if still running
    pub fn free_foreign_future(&self, handle: u64) -> bool {
        match self.foreign_futures.take(handle) {
            Some(cancel) => {
                let _ = cancel.send(());
                true
            }
            None => false,
        }
    }

    pub fn pending_foreign_futures(&self) -> usize {
        self.foreign_futures.len()
    }

    /// Cancel outstanding foreign futures and fail pending continuations
    pub fn teardown(&self) {
        let cancelled = self.foreign_futures.drain();
        let abandoned = self.continuations.drain();
        tracing::debug!(
            namespace = %self.namespace,
            foreign_futures = cancelled.len(),
            continuations = abandoned.len(),
            "bridge context torn down"
        );
        for cancel in cancelled {
            let _ = cancel.send(());
        }
    }
}
