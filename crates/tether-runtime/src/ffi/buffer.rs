//! Native-allocated byte buffers
//!
//! A [`ForeignBuffer`] is allocated by the native library and must be handed
//! back to the native free entry point exactly once. [`OwnedBuffer`] is the
//! scoped wrapper that enforces this: it frees on drop unless ownership is
//! released with [`OwnedBuffer::into_raw`].

use crate::codec::stream::{StreamReader, StreamWriter};
use crate::error::{BridgeError, BridgeResult};
use crate::ffi::status::{rust_call, CallStatus};

/// Native `alloc(size, status) -> buffer` entry point
pub type BufferAllocFn = unsafe extern "C" fn(size: i32, status: *mut CallStatus) -> ForeignBuffer;

/// Native `free(buffer, status)` entry point
pub type BufferFreeFn = unsafe extern "C" fn(buffer: ForeignBuffer, status: *mut CallStatus);

/// Capacity/length/pointer triple describing a native-owned byte block
///
/// Layout matches the native side exactly: `{i32 capacity; i32 len; u8* data}`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignBuffer {
    pub capacity: i32,
    pub len: i32,
    pub data: *mut u8,
}

// Safety: the buffer is a plain descriptor; ownership is tracked by the
// callers (OwnedBuffer or the native side), never by the descriptor itself.
unsafe impl Send for ForeignBuffer {}
unsafe impl Sync for ForeignBuffer {}

impl Default for ForeignBuffer {
    fn default() -> Self {
        Self::empty()
    }
}

impl ForeignBuffer {
    /// A buffer with no backing allocation
    pub const fn empty() -> Self {
        Self {
            capacity: 0,
            len: 0,
            data: std::ptr::null_mut(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len <= 0 || self.data.is_null()
    }

    pub fn is_null(&self) -> bool {
        self.data.is_null()
    }

    /// The first `len` bytes
    ///
    /// # Safety
    ///
    /// `data` must point to at least `len` initialized bytes that stay alive
    /// and unmodified for the returned lifetime.
    pub unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        if self.is_empty() {
            return &[];
        }
        std::slice::from_raw_parts(self.data, self.len as usize)
    }

    /// The whole `capacity` region, for writing
    ///
    /// # Safety
    ///
    /// `data` must point to `capacity` writable bytes owned by the caller for
    /// the returned lifetime.
    pub unsafe fn as_capacity_slice<'a>(&mut self) -> &'a mut [u8] {
        if self.data.is_null() || self.capacity <= 0 {
            return &mut [];
        }
        std::slice::from_raw_parts_mut(self.data, self.capacity as usize)
    }

    /// Reader over the first `len` bytes
    ///
    /// # Safety
    ///
    /// Same requirements as [`ForeignBuffer::as_slice`].
    pub unsafe fn reader<'a>(&self) -> StreamReader<'a> {
        StreamReader::new(self.as_slice())
    }
}

/// Borrowed client bytes passed into native code: `{i32 len; const u8* data}`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ForeignBytes {
    pub len: i32,
    pub data: *const u8,
}

impl ForeignBytes {
    /// Borrow `bytes` for the duration of a native call
    pub fn new(bytes: &[u8]) -> BridgeResult<Self> {
        let len = i32::try_from(bytes.len()).map_err(|_| {
            BridgeError::Allocation(format!("{} bytes exceed the i32 length field", bytes.len()))
        })?;
        Ok(Self {
            len,
            data: bytes.as_ptr(),
        })
    }
}

/// Native allocator entry points
///
/// Copied freely; every buffer the runtime creates or frees goes through it.
#[derive(Debug, Clone, Copy)]
pub struct BufferApi {
    alloc: BufferAllocFn,
    free: BufferFreeFn,
}

impl BufferApi {
    /// # Safety
    ///
    /// Both function pointers must be the native library's buffer entry
    /// points and stay valid for as long as this value is used.
    pub unsafe fn new(alloc: BufferAllocFn, free: BufferFreeFn) -> Self {
        Self { alloc, free }
    }

    /// Allocate a buffer with at least `size` bytes of capacity
    pub fn alloc(&self, size: usize) -> BridgeResult<OwnedBuffer> {
        let size = i32::try_from(size).map_err(|_| {
            BridgeError::Allocation(format!("requested size {} exceeds i32::MAX", size))
        })?;
        let alloc = self.alloc;
        let buffer = rust_call(self, |status| unsafe { alloc(size, status) })?;
        if buffer.data.is_null() {
            return Err(BridgeError::Allocation(format!(
                "native alloc returned a null data pointer (size={})",
                size
            )));
        }
        Ok(OwnedBuffer::from_raw(*self, buffer))
    }

    /// Hand a buffer back to the native allocator
    ///
    /// Buffers without a data pointer were never allocated and are ignored.
    pub fn free(&self, buffer: ForeignBuffer) -> BridgeResult<()> {
        if buffer.data.is_null() {
            return Ok(());
        }
        let free = self.free;
        rust_call(self, |status| unsafe { free(buffer, status) })
    }
}

/// Owning guard around a [`ForeignBuffer`]
#[derive(Debug)]
pub struct OwnedBuffer {
    api: BufferApi,
    buffer: Option<ForeignBuffer>,
}

impl OwnedBuffer {
    /// Take ownership of a buffer the native side handed over
    pub fn from_raw(api: BufferApi, buffer: ForeignBuffer) -> Self {
        Self {
            api,
            buffer: Some(buffer),
        }
    }

    /// Release ownership without freeing
    pub fn into_raw(mut self) -> ForeignBuffer {
        self.buffer.take().unwrap_or_default()
    }

    pub fn raw(&self) -> ForeignBuffer {
        self.buffer.unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.raw().len.max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.raw().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.raw().capacity.max(0) as usize
    }

    pub fn set_len(&mut self, len: usize) -> BridgeResult<()> {
        let capacity = self.capacity();
        let Some(buffer) = self.buffer.as_mut() else {
            return Err(BridgeError::internal("buffer already released"));
        };
        if len > capacity {
            return Err(BridgeError::internal(format!(
                "length {} exceeds buffer capacity {}",
                len, capacity
            )));
        }
        buffer.len = len as i32;
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.buffer {
            // Safety: the buffer came from the native allocator and is owned here
            Some(buffer) => unsafe { buffer.as_slice() },
            None => &[],
        }
    }

    pub fn reader(&self) -> StreamReader<'_> {
        StreamReader::new(self.as_slice())
    }

    /// Writer over the full capacity
    pub fn writer(&mut self) -> StreamWriter<'_> {
        match self.buffer.as_mut() {
            // Safety: owned allocation of `capacity` bytes
            Some(buffer) => StreamWriter::new(unsafe { buffer.as_capacity_slice() }),
            None => StreamWriter::new(&mut []),
        }
    }

    /// Free now and surface any failure
    pub fn free(mut self) -> BridgeResult<()> {
        match self.buffer.take() {
            Some(buffer) => self.api.free(buffer),
            None => Ok(()),
        }
    }
}

impl Drop for OwnedBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            if let Err(e) = self.api.free(buffer) {
                tracing::warn!(error = %e, "failed to free foreign buffer");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_buffer() {
        let buffer = ForeignBuffer::empty();
        assert!(buffer.is_empty());
        assert!(buffer.is_null());
        assert_eq!(unsafe { buffer.as_slice() }, &[] as &[u8]);
    }

    #[test]
    fn test_buffer_layout() {
        assert_eq!(
            std::mem::size_of::<ForeignBuffer>(),
            8 + std::mem::size_of::<*mut u8>()
        );
        assert_eq!(std::mem::offset_of!(ForeignBuffer, len), 4);
        assert_eq!(std::mem::offset_of!(ForeignBuffer, data), 8);
    }

    #[test]
    fn test_buffer_view() {
        let mut data = vec![1u8, 2, 3, 4];
        let buffer = ForeignBuffer {
            capacity: 4,
            len: 3,
            data: data.as_mut_ptr(),
        };
        assert_eq!(unsafe { buffer.as_slice() }, &[1, 2, 3]);
        let mut reader = unsafe { buffer.reader() };
        assert_eq!(reader.read_u16().unwrap(), 0x0102);
        assert_eq!(reader.remaining(), 1);
    }

    #[test]
    fn test_foreign_bytes() {
        let bytes = [9u8, 8, 7];
        let foreign = ForeignBytes::new(&bytes).unwrap();
        assert_eq!(foreign.len, 3);
        assert_eq!(foreign.data, bytes.as_ptr());
    }
}
