//! The descriptor-chain arena and the virtqueue ring transport.
//!
//! Grounded on `kernel/src/drivers/virtio/queue.rs` (free-list descriptor
//! allocator, explicit `Ordering::Release`/`Ordering::Acquire` fences around
//! the available/used indices) and `kernel/src/drivers/virtio_gpu.rs`'s
//! `Virtqueue` (a single leaked buffer carved into descriptor table, avail
//! ring and used ring, rather than page-aligned frame-allocator regions —
//! the physical-memory layout rules a real bus transport enforces are an
//! external collaborator's concern per `spec.md` §1).

use core::sync::atomic::{fence, Ordering};

use crate::dma::{DmaBuffer, LeakedVec};
use crate::error::GpuError;

/// Descriptor continues via `next`.
pub const VIRTQ_DESC_F_NEXT: u16 = 1;
/// Descriptor is device-writable.
pub const VIRTQ_DESC_F_WRITE: u16 = 2;

/// One slot in the descriptor table.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct VirtqDesc {
    addr: u64,
    len: u32,
    flags: u16,
    next: u16,
}

const DESC_SIZE: usize = core::mem::size_of::<VirtqDesc>();

/// One segment of a request or response: a DMA address and a length.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub addr: u64,
    pub len: u32,
}

/// A ring-based descriptor arena shared with the device.
///
/// Owns the backing memory for the descriptor table, the available ring and
/// the used ring, carved out of a single [`DmaBuffer`] exactly as
/// `virtio_gpu.rs::allocate_virtqueue` does. The only legal writer of
/// `avail.idx`/`avail.ring[i]` is this struct; the only legal writer of
/// `used.idx`/`used.ring[i]` is the device (`spec.md` §5).
pub struct Virtqueue {
    size: u16,
    backing: LeakedVec,
    desc_off: usize,
    avail_off: usize,
    used_off: usize,
    free_head: u16,
    num_free: u16,
    last_used_idx: u16,
}

impl Virtqueue {
    /// Lay out and zero a ring of `size` descriptors.
    pub fn new(size: u16) -> Self {
        let sz = size as usize;
        let desc_off = 0;
        let avail_off = desc_off + sz * DESC_SIZE;
        // avail header (flags:u16, idx:u16) + ring of u16
        let used_off = avail_off + 4 + sz * 2;
        // used header (flags:u16, idx:u16) + ring of (id:u32, len:u32)
        let total = used_off + 4 + sz * 8;

        let mut backing = LeakedVec::new(total);

        // SAFETY: `backing` is zeroed and `total` bytes long; the pointer
        // arithmetic below stays within that allocation.
        unsafe {
            let desc_base = backing.as_mut_slice().as_mut_ptr().add(desc_off) as *mut VirtqDesc;
            for i in 0..size {
                let d = &mut *desc_base.add(i as usize);
                d.next = if i + 1 < size { i + 1 } else { 0 };
            }
        }

        Self {
            size,
            backing,
            desc_off,
            avail_off,
            used_off,
            free_head: 0,
            num_free: size,
            last_used_idx: 0,
        }
    }

    fn desc_ptr(&mut self, idx: u16) -> *mut VirtqDesc {
        // SAFETY: idx < self.size is an invariant of every call site below.
        unsafe {
            (self.backing.as_mut_slice().as_mut_ptr().add(self.desc_off) as *mut VirtqDesc)
                .add(idx as usize)
        }
    }

    fn avail_idx_ptr(&mut self) -> *mut u16 {
        (self.backing.as_mut_slice().as_mut_ptr() as usize + self.avail_off + 2) as *mut u16
    }

    fn avail_ring_ptr(&mut self, ring_idx: usize) -> *mut u16 {
        (self.backing.as_mut_slice().as_mut_ptr() as usize + self.avail_off + 4 + ring_idx * 2)
            as *mut u16
    }

    fn used_idx_ptr(&self) -> *const u16 {
        (self.backing.as_slice().as_ptr() as usize + self.used_off + 2) as *const u16
    }

    fn used_elem_ptr(&self, ring_idx: usize) -> *const (u32, u32) {
        (self.backing.as_slice().as_ptr() as usize + self.used_off + 4 + ring_idx * 8)
            as *const (u32, u32)
    }

    /// Allocate one descriptor slot from the free list.
    fn alloc_one(&mut self) -> Result<u16, GpuError> {
        if self.num_free == 0 {
            return Err(GpuError::DescriptorsExhausted);
        }
        let idx = self.free_head;
        // SAFETY: idx is in-bounds; the free list only ever links in-bounds
        // indices together.
        let next = unsafe { (*self.desc_ptr(idx)).next };
        self.free_head = next;
        self.num_free -= 1;
        Ok(idx)
    }

    fn free_one(&mut self, idx: u16) {
        // SAFETY: idx was returned by alloc_one and has not been freed since.
        unsafe {
            let d = &mut *self.desc_ptr(idx);
            d.next = self.free_head;
        }
        self.free_head = idx;
        self.num_free += 1;
    }

    /// Reserve a chain of `segments.len()` descriptors, all-or-nothing, and
    /// fill them in order. `write_flags` gets set on the final (response)
    /// descriptor in addition to `VIRTQ_DESC_F_WRITE`.
    fn reserve_chain(&mut self, req: &[Segment], resp: Segment) -> Result<u16, GpuError> {
        let n = req.len() + 1;
        let mut indices = [0u16; 8];
        if n > indices.len() {
            return Err(GpuError::InvalidArgument {
                name: "segment_count",
            });
        }

        // All-or-nothing: free whatever we managed to grab if we run out of
        // descriptors partway through, per `spec.md` §4.1 ("Failure to
        // allocate a chain fails the call with no side effects").
        for (got, slot) in indices.iter_mut().take(n).enumerate() {
            match self.alloc_one() {
                Ok(idx) => *slot = idx,
                Err(e) => {
                    for &prev in &indices[..got] {
                        self.free_one(prev);
                    }
                    return Err(e);
                }
            }
        }

        for (i, &idx) in indices[..n].iter().enumerate() {
            let next = if i + 1 < n { indices[i + 1] } else { 0 };
            // SAFETY: idx came from alloc_one above and is in-bounds.
            unsafe {
                let d = &mut *self.desc_ptr(idx);
                if i < req.len() {
                    d.addr = req[i].addr;
                    d.len = req[i].len;
                    d.flags = VIRTQ_DESC_F_NEXT;
                    d.next = next;
                } else {
                    d.addr = resp.addr;
                    d.len = resp.len;
                    d.flags = VIRTQ_DESC_F_WRITE;
                    d.next = 0;
                }
            }
        }

        Ok(indices[0])
    }

    /// Publish a chain head to the available ring and advance `avail.idx`
    /// with the two store/store barriers `spec.md` §4.1 requires.
    fn publish(&mut self, head: u16) {
        // SAFETY: avail_idx_ptr points within `backing`.
        let cur_idx = unsafe { *self.avail_idx_ptr() };
        let ring_idx = (cur_idx as usize) % self.size as usize;
        // SAFETY: avail_ring_ptr(ring_idx) points within `backing`.
        unsafe { *self.avail_ring_ptr(ring_idx) = head };

        // Barrier 1: the ring entry write above must be visible before the
        // index bump below becomes visible.
        fence(Ordering::Release);

        // SAFETY: avail_idx_ptr points within `backing`.
        unsafe { *self.avail_idx_ptr() = cur_idx.wrapping_add(1) };

        // Barrier 2: the device must never observe an incremented idx
        // without also observing the ring entry it points at.
        fence(Ordering::Release);
    }

    /// Poll the used ring once. Returns `Some(bytes_written)` as soon as the
    /// device has returned the next expected chain.
    fn poll_used(&mut self) -> Option<u32> {
        fence(Ordering::Acquire);
        // SAFETY: used_idx_ptr points within `backing`.
        let used_idx = unsafe { *self.used_idx_ptr() };
        if used_idx == self.last_used_idx {
            return None;
        }
        let ring_idx = (self.last_used_idx as usize) % self.size as usize;
        // SAFETY: used_elem_ptr(ring_idx) points within `backing`.
        let (_id, len) = unsafe { *self.used_elem_ptr(ring_idx) };
        self.last_used_idx = self.last_used_idx.wrapping_add(1);
        Some(len)
    }

    fn free_chain(&mut self, head: u16, count: usize) {
        let mut idx = head;
        for _ in 0..count {
            // SAFETY: idx is in-bounds: it came from a chain we built.
            let next = unsafe { (*self.desc_ptr(idx)).next };
            self.free_one(idx);
            idx = next;
        }
    }

    /// Publish `req` + `resp` as one chain, notify, and spin until the
    /// device returns it. Returns the byte count the device wrote into the
    /// response segment.
    ///
    /// `notify` is called exactly once, after the publish barriers, with no
    /// side effects if allocation failed (per `spec.md` §4.1: "Failure to
    /// allocate a chain fails the call with no side effects").
    pub fn transact<F: FnOnce()>(
        &mut self,
        req: &[Segment],
        resp: Segment,
        notify: F,
    ) -> Result<u32, GpuError> {
        let head = self.reserve_chain(req, resp)?;
        let n = req.len() + 1;

        self.publish(head);
        notify();

        loop {
            if let Some(len) = self.poll_used() {
                self.free_chain(head, n);
                return Ok(len);
            }
            core::hint::spin_loop();
        }
    }
}

/// The raw memory layout of a queue, exposed only so the in-process
/// loopback transport (`testing` feature) can play the device side of the
/// ring by reading/writing the same memory a real device's DMA engine
/// would see — it does not share this `Virtqueue` value, exactly as real
/// hardware never shares our Rust struct either.
#[derive(Clone, Copy)]
pub(crate) struct QueueLayout {
    pub base: usize,
    pub desc_off: usize,
    pub avail_off: usize,
    pub used_off: usize,
    pub size: u16,
}

impl Virtqueue {
    pub(crate) fn layout(&self) -> QueueLayout {
        QueueLayout {
            base: self.backing.as_slice().as_ptr() as usize,
            desc_off: self.desc_off,
            avail_off: self.avail_off,
            used_off: self.used_off,
            size: self.size,
        }
    }
}

// SAFETY: `Virtqueue` owns its backing memory exclusively; the device only
// ever writes through the used ring, never aliasing the descriptor table or
// avail ring that the driver owns. Callers serialize access with their own
// lock (`spec.md` §5), so concurrent `&mut` access never happens.
unsafe impl Send for Virtqueue {}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU16, Ordering as AtomicOrdering};

    #[test]
    fn reserve_and_free_round_trips_all_descriptors() {
        let mut vq = Virtqueue::new(4);
        assert_eq!(vq.num_free, 4);
        let head = vq
            .reserve_chain(&[Segment { addr: 1, len: 4 }], Segment { addr: 2, len: 4 })
            .unwrap();
        assert_eq!(vq.num_free, 2);
        vq.free_chain(head, 2);
        assert_eq!(vq.num_free, 4);
    }

    #[test]
    fn exhausted_ring_reports_no_side_effects() {
        let mut vq = Virtqueue::new(1);
        // 1 descriptor total is not enough for a 2-segment chain (1 req + 1
        // resp); the call must fail without leaking the single descriptor.
        let err = vq
            .reserve_chain(&[Segment { addr: 1, len: 1 }], Segment { addr: 2, len: 1 })
            .unwrap_err();
        assert_eq!(err, GpuError::DescriptorsExhausted);
        assert_eq!(vq.num_free, 1);
    }

    #[test]
    fn transact_completes_once_device_advances_used_idx() {
        let mut vq = Virtqueue::new(4);
        let notified = AtomicU16::new(0);
        // Addresses are plain integers, not references, so capturing them in
        // the `notify` closure below does not conflict with `transact`'s
        // `&mut self` borrow of `vq`.
        let used_idx_addr = vq.used_idx_ptr() as usize;
        let elem_addr = vq.used_elem_ptr(0) as usize;

        let result = vq.transact(
            &[Segment { addr: 0x1000, len: 8 }],
            Segment {
                addr: 0x2000,
                len: 24,
            },
            || {
                notified.fetch_add(1, AtomicOrdering::SeqCst);
                // SAFETY: test-only poke of the used ring to emulate the
                // device completing the just-published chain.
                unsafe {
                    *(elem_addr as *mut (u32, u32)) = (0, 24);
                    *(used_idx_addr as *mut u16) = 1;
                }
            },
        );
        assert_eq!(notified.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(result.unwrap(), 24);
    }
}
