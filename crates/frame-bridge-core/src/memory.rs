//! Guest linear memory bridge.
//!
//! Host functions receive `(ptr, len)` pairs from the guest. Nothing about
//! them can be trusted, so every access is bounds-checked against the memory
//! size at the moment of the access.
//!
//! None of these functions keep a view into guest memory: the byte slice is
//! re-derived from the [`Memory`] handle on each call, and the returned
//! borrows are tied to the store borrow. A `memory.grow` inside the guest can
//! move the buffer, so a slice obtained before a guest call must never be
//! used after it; the borrow checker enforces this because guest calls need
//! the store mutably.

use std::ops::Range;

use wasmtime::{Memory, StoreContext, StoreContextMut};

use frame_bridge_common::MemoryError;

/// A `(ptr, len)` region of guest memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GuestSlice {
    /// Byte offset into linear memory.
    pub ptr: u32,
    /// Length in bytes.
    pub len: u32,
}

impl GuestSlice {
    /// Create a new slice descriptor.
    pub const fn new(ptr: u32, len: u32) -> Self {
        Self { ptr, len }
    }

    /// Returns `true` if the slice covers no bytes.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Resolve to a byte range, checking it against `memory_size`.
    pub fn range(&self, memory_size: usize) -> Result<Range<usize>, MemoryError> {
        let start = self.ptr as usize;
        match start.checked_add(self.len as usize) {
            Some(end) if end <= memory_size => Ok(start..end),
            _ => Err(MemoryError::OutOfBounds {
                ptr: self.ptr,
                len: self.len,
                memory_size,
            }),
        }
    }
}

/// Borrow the bytes of `slice` from the current memory.
pub fn read_bytes<'a, T: 'a>(
    memory: &Memory,
    store: impl Into<StoreContext<'a, T>>,
    slice: GuestSlice,
) -> Result<&'a [u8], MemoryError> {
    let data = memory.data(store);
    let range = slice.range(data.len())?;
    Ok(&data[range])
}

/// Mutably borrow the bytes of `slice` from the current memory.
pub fn bytes_mut<'a, T: 'a>(
    memory: &Memory,
    store: impl Into<StoreContextMut<'a, T>>,
    slice: GuestSlice,
) -> Result<&'a mut [u8], MemoryError> {
    let data = memory.data_mut(store);
    let range = slice.range(data.len())?;
    Ok(&mut data[range])
}

/// Decode `slice` as UTF-8 into an owned host string.
///
/// Invalid UTF-8 is reported, never replaced.
pub fn decode<'a, T: 'a>(
    memory: &Memory,
    store: impl Into<StoreContext<'a, T>>,
    slice: GuestSlice,
) -> Result<String, MemoryError> {
    let bytes = read_bytes(memory, store, slice)?;
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|source| MemoryError::InvalidUtf8 {
            ptr: slice.ptr,
            len: slice.len,
            source,
        })
}

/// Copy `bytes` into guest memory at `ptr`.
///
/// The destination must already belong to the guest (typically the result of
/// its `alloc` export).
pub fn write_bytes<'a, T: 'a>(
    memory: &Memory,
    store: impl Into<StoreContextMut<'a, T>>,
    ptr: u32,
    bytes: &[u8],
) -> Result<GuestSlice, MemoryError> {
    let len = u32::try_from(bytes.len()).map_err(|_| MemoryError::TooLarge { len: bytes.len() })?;
    let slice = GuestSlice::new(ptr, len);
    bytes_mut(memory, store, slice)?.copy_from_slice(bytes);
    Ok(slice)
}
