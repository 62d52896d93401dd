//! Handle tables - integer keys for objects passed into native code
//!
//! Native code cannot hold Rust references, so objects it needs to keep are
//! stored here and represented by a `u64` handle. Handles start at 1, grow
//! monotonically and are never reused; 0 is never a valid handle.
//!
//! Two variants:
//! - [`HandleMap`]: every insert allocates a fresh handle, removal is
//!   unconditional
//! - [`RefCountedHandleMap`]: equal objects share one handle with a reference
//!   count, removal evicts only when the count reaches zero
//!
//! Each table owns one mutex. Evicted objects are dropped after it is
//! released, since dropping may free native resources and call back in.

use crate::error::{BridgeError, BridgeResult};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// First handle handed out by a fresh table
pub const FIRST_HANDLE: u64 = 1;

fn lock<S>(state: &Mutex<S>) -> MutexGuard<'_, S> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn missing(handle: u64) -> BridgeError {
    BridgeError::internal(format!("handle {} not found in handle map", handle))
}

#[derive(Debug)]
struct PlainState<T> {
    next_handle: u64,
    entries: HashMap<u64, T>,
}

/// Handle table without deduplication
#[derive(Debug)]
pub struct HandleMap<T> {
    state: Mutex<PlainState<T>>,
}

impl<T> Default for HandleMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleMap<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PlainState {
                next_handle: FIRST_HANDLE,
                entries: HashMap::new(),
            }),
        }
    }

    /// Store `object` under a fresh handle
    pub fn insert(&self, object: T) -> u64 {
        let mut state = lock(&self.state);
        let handle = state.next_handle;
        state.next_handle += 1;
        state.entries.insert(handle, object);
        tracing::debug!(handle, "handle inserted");
        handle
    }

    /// Remove and return the object
    pub fn take(&self, handle: u64) -> Option<T> {
        let evicted = lock(&self.state).entries.remove(&handle);
        if evicted.is_some() {
            tracing::debug!(handle, "handle evicted");
        }
        evicted
    }

    /// Remove the object, dropping it outside the lock
    pub fn remove(&self, handle: u64) -> bool {
        self.take(handle).is_some()
    }

    pub fn contains(&self, handle: u64) -> bool {
        lock(&self.state).entries.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.state).entries.is_empty()
    }

    /// Evict every entry and return them, in no particular order
    pub fn drain(&self) -> Vec<T> {
        let entries = std::mem::take(&mut lock(&self.state).entries);
        entries.into_values().collect()
    }

    pub fn clear(&self) {
        drop(self.drain());
    }
}

impl<T: Clone> HandleMap<T> {
    /// Look up without affecting the entry
    pub fn try_get(&self, handle: u64) -> Option<T> {
        lock(&self.state).entries.get(&handle).cloned()
    }

    /// Look up, treating absence as a protocol violation
    pub fn get(&self, handle: u64) -> BridgeResult<T> {
        self.try_get(handle).ok_or_else(|| missing(handle))
    }
}

#[derive(Debug)]
struct Entry<T> {
    object: T,
    refcount: u64,
}

#[derive(Debug)]
struct CountedState<T> {
    next_handle: u64,
    by_handle: HashMap<u64, Entry<T>>,
    by_object: HashMap<T, u64>,
}

/// Deduplicating handle table with per-entry reference counts
#[derive(Debug)]
pub struct RefCountedHandleMap<T> {
    state: Mutex<CountedState<T>>,
}

impl<T> Default for RefCountedHandleMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RefCountedHandleMap<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CountedState {
                next_handle: FIRST_HANDLE,
                by_handle: HashMap::new(),
                by_object: HashMap::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.state).by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.state).by_handle.is_empty()
    }

    pub fn contains(&self, handle: u64) -> bool {
        lock(&self.state).by_handle.contains_key(&handle)
    }

    /// Current reference count, 0 for unknown handles
    pub fn refcount(&self, handle: u64) -> u64 {
        lock(&self.state)
            .by_handle
            .get(&handle)
            .map_or(0, |entry| entry.refcount)
    }

    /// Add a reference to an existing entry
    pub fn retain(&self, handle: u64) -> bool {
        match lock(&self.state).by_handle.get_mut(&handle) {
            Some(entry) => {
                entry.refcount += 1;
                true
            }
            None => false,
        }
    }
}

impl<T: Eq + Hash + Clone> RefCountedHandleMap<T> {
    /// Store `object`, or add a reference if an equal object is present
    pub fn insert(&self, object: T) -> u64 {
        let mut state = lock(&self.state);
        if let Some(&handle) = state.by_object.get(&object) {
            if let Some(entry) = state.by_handle.get_mut(&handle) {
                entry.refcount += 1;
                tracing::debug!(handle, refcount = entry.refcount, "handle retained");
                return handle;
            }
        }
        let handle = state.next_handle;
        state.next_handle += 1;
        state.by_object.insert(object.clone(), handle);
        state.by_handle.insert(
            handle,
            Entry {
                object,
                refcount: 1,
            },
        );
        tracing::debug!(handle, "handle inserted");
        handle
    }

    pub fn try_get(&self, handle: u64) -> Option<T> {
        lock(&self.state)
            .by_handle
            .get(&handle)
            .map(|entry| entry.object.clone())
    }

    pub fn get(&self, handle: u64) -> BridgeResult<T> {
        self.try_get(handle).ok_or_else(|| missing(handle))
    }

    /// Drop one reference; returns the object once the last one is gone
    pub fn take(&self, handle: u64) -> Option<T> {
        let evicted = {
            let mut state = lock(&self.state);
            let entry = state.by_handle.get_mut(&handle)?;
            entry.refcount -= 1;
            if entry.refcount > 0 {
                return None;
            }
            let entry = state.by_handle.remove(&handle)?;
            let key = state.by_object.remove_entry(&entry.object);
            (entry.object, key)
        };
        tracing::debug!(handle, "handle evicted");
        Some(evicted.0)
    }

    /// Drop one reference; `true` when the entry was evicted
    pub fn remove(&self, handle: u64) -> bool {
        self.take(handle).is_some()
    }

    /// Evict every entry regardless of reference counts
    pub fn drain(&self) -> Vec<T> {
        let (entries, keys) = {
            let mut state = lock(&self.state);
            (
                std::mem::take(&mut state.by_handle),
                std::mem::take(&mut state.by_object),
            )
        };
        drop(keys);
        entries.into_values().map(|entry| entry.object).collect()
    }

    pub fn clear(&self) {
        drop(self.drain());
    }
}

/// Identity key for shared objects: equal only to clones of the same `Arc`
pub struct ArcKey<T: ?Sized>(pub Arc<T>);

impl<T: ?Sized> ArcKey<T> {
    pub fn new(object: Arc<T>) -> Self {
        Self(object)
    }

    pub fn into_inner(self) -> Arc<T> {
        self.0
    }
}

impl<T: ?Sized> Clone for ArcKey<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: ?Sized> PartialEq for ArcKey<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: ?Sized> Eq for ArcKey<T> {}

impl<T: ?Sized> Hash for ArcKey<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Thin pointer only; vtable addresses are not stable across codegen units
        (Arc::as_ptr(&self.0) as *const () as usize).hash(state);
    }
}

impl<T: ?Sized> std::fmt::Debug for ArcKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ArcKey({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}
