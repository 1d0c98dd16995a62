//! Device global-memory allocations.
//!
//! [`DeviceBuffer`] stands in for an accelerator global-memory allocation:
//! zero-filled at creation and aligned to the 256-byte granularity real
//! device allocators guarantee. The engine uses it for exchange-slot arrays
//! and descriptor buffers; callers can use it for payload buffers, which
//! keeps payload addresses word-aligned as the copy path requires.

use crate::error::{LinkError, Result};
use std::alloc::{alloc_zeroed, dealloc, Layout};

/// Alignment of every device allocation, matching accelerator allocator
/// granularity.
pub const DEVICE_ALLOC_ALIGN: usize = 256;

/// A zero-filled, 256-byte-aligned allocation in a device's memory space.
///
/// The raw address is handed to peers for direct one-sided access, so the
/// buffer must stay alive until every queued round referencing it has
/// drained; the engine shares its own allocations into in-flight stream
/// work via `Arc` for exactly that reason.
pub struct DeviceBuffer {
    ptr: *mut u8,
    layout: Layout,
}

// Cells inside a DeviceBuffer are mutated either through atomics (exchange
// slots) or under the protocol's single-writer-per-region discipline
// (descriptor buffers, payloads), never through `&self` methods.
unsafe impl Send for DeviceBuffer {}
unsafe impl Sync for DeviceBuffer {}

impl DeviceBuffer {
    /// Allocate `bytes` of zero-filled device memory.
    pub fn alloc_zeroed(bytes: usize) -> Result<Self> {
        let size = bytes.max(1);
        let layout = Layout::from_size_align(size, DEVICE_ALLOC_ALIGN)
            .map_err(|_| LinkError::AllocFailed { bytes: size })?;
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(LinkError::AllocFailed { bytes: size });
        }
        tracing::debug!(bytes = size, addr = ptr as u64, "device buffer allocated");
        Ok(Self { ptr, layout })
    }

    /// Raw device address of the allocation.
    pub fn addr(&self) -> u64 {
        self.ptr as u64
    }

    /// Allocation size in bytes.
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    /// Read the buffer contents.
    ///
    /// Only meaningful once every round referencing this buffer has been
    /// synchronized; reading while a transfer is in flight races the copy.
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len()) }
    }

    /// Mutable view of the buffer contents, for filling payloads host-side.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len()) }
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr, self.layout) };
    }
}

impl std::fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DeviceBuffer(0x{:x}, {}B)", self.addr(), self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_is_zeroed_and_aligned() {
        let buf = DeviceBuffer::alloc_zeroed(1024).unwrap();
        assert_eq!(buf.len(), 1024);
        assert_eq!(buf.addr() % DEVICE_ALLOC_ALIGN as u64, 0);
        assert!(buf.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_mutation_roundtrip() {
        let mut buf = DeviceBuffer::alloc_zeroed(64).unwrap();
        buf.as_mut_slice().fill(0xA5);
        assert!(buf.as_slice().iter().all(|&b| b == 0xA5));
    }

    #[test]
    fn test_zero_sized_request() {
        let buf = DeviceBuffer::alloc_zeroed(0).unwrap();
        assert_eq!(buf.len(), 1);
    }
}
