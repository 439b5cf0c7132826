//! Physically addressable, driver-owned memory.
//!
//! Full physical-memory management (frame allocation, page tables) belongs
//! to the enclosing kernel and is out of scope for this core (`spec.md`
//! §1). What the ring transport and the GPU state machine need from it is
//! narrow: a byte buffer with a stable address the device can DMA into or
//! out of. [`DmaBuffer`] is that contract; [`LeakedVec`] is the default,
//! allocator-backed implementation, matching the leaked-`Vec` approach the
//! teacher's own `virtio_gpu.rs::allocate_virtqueue` uses for its ring and
//! per-descriptor buffers rather than pulling in a full frame allocator.

#[cfg(feature = "alloc")]
use alloc::vec::Vec;
use core::slice;

/// A block of driver-owned memory that is safe to hand to the device as the
/// target or source of a descriptor.
///
/// # Safety
///
/// Implementors must guarantee that `addr()` is a physical address valid for
/// `len()` bytes for as long as the `DmaBuffer` is alive, and that
/// `as_slice`/`as_mut_slice` access the same bytes the device will read or
/// write. Aliasing this memory from anywhere other than the pending
/// descriptor chain is undefined behavior, exactly as for raw MMIO.
pub unsafe trait DmaBuffer {
    /// Physical (DMA-visible) address of the first byte.
    fn addr(&self) -> u64;
    /// Length in bytes.
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn as_slice(&self) -> &[u8];
    fn as_mut_slice(&mut self) -> &mut [u8];
}

/// A zeroed buffer backed by a leaked, heap-allocated `Vec<u8>`.
///
/// On the host build used for testing, the "physical address" is simply
/// the virtual address of the allocation — identity mapping is assumed, as
/// it is on the early-boot paths of AArch64/RISC-V kernels the teacher
/// targets.
#[cfg(feature = "alloc")]
pub struct LeakedVec {
    ptr: *mut u8,
    len: usize,
}

#[cfg(feature = "alloc")]
impl LeakedVec {
    /// Allocate and zero `len` bytes, leaking the backing `Vec` so the
    /// memory remains valid for as long as the device may reference it.
    pub fn new(len: usize) -> Self {
        let mut buf = alloc::vec![0u8; len];
        let ptr = buf.as_mut_ptr();
        core::mem::forget(buf);
        Self { ptr, len }
    }
}

// SAFETY: `ptr` came from a `Vec<u8>` of length `len` that was immediately
// forgotten, so the allocation lives until the process (or, on bare metal,
// until explicitly freed by a higher layer) exits; `ptr` is never
// reallocated or moved after construction.
#[cfg(feature = "alloc")]
unsafe impl DmaBuffer for LeakedVec {
    fn addr(&self) -> u64 {
        self.ptr as u64
    }

    fn len(&self) -> usize {
        self.len
    }

    fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` is valid for `len` bytes per the struct invariant.
        unsafe { slice::from_raw_parts(self.ptr, self.len) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: `ptr` is valid for `len` bytes per the struct invariant,
        // and `&mut self` guarantees no other reference is live.
        unsafe { slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

#[cfg(all(test, feature = "alloc"))]
mod tests {
    use super::*;

    #[test]
    fn leaked_vec_is_zeroed_and_sized() {
        let buf = LeakedVec::new(64);
        assert_eq!(buf.len(), 64);
        assert!(buf.as_slice().iter().all(|&b| b == 0));
        assert_ne!(buf.addr(), 0);
    }

    #[test]
    fn leaked_vec_mutation_round_trips() {
        let mut buf = LeakedVec::new(8);
        buf.as_mut_slice().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(buf.as_slice(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
