//! An in-process "device" used only by tests (`testing` feature or
//! `cfg(test)`).
//!
//! Mirrors how the teacher's own `tests/` directory drives kernel
//! subsystems with software harnesses instead of real hardware (e.g.
//! `ipc_integration_tests.rs`) rather than the bus/MMIO layer this crate
//! otherwise only specifies a contract for. It does not share the driver's
//! [`super::queue::Virtqueue`] value — like real silicon, it only sees the
//! same memory the driver published into, through [`super::queue::QueueLayout`].

#[cfg(feature = "alloc")]
use core::cell::Cell;
#[cfg(feature = "alloc")]
use core::sync::atomic::{fence, Ordering};

#[cfg(feature = "alloc")]
use alloc::boxed::Box;
#[cfg(feature = "alloc")]
use alloc::vec::Vec;

#[cfg(feature = "alloc")]
use super::queue::{QueueLayout, VIRTQ_DESC_F_NEXT};
#[cfg(feature = "alloc")]
use super::Transport;

#[cfg(feature = "alloc")]
#[repr(C)]
#[derive(Clone, Copy)]
struct RawDesc {
    addr: u64,
    len: u32,
    flags: u16,
    next: u16,
}

/// A software model of the device side of one virtqueue.
///
/// `respond` is called with the full concatenation of the request's
/// device-readable segments and must return the bytes to write into the
/// response (device-writable) segment, truncated to fit if the response
/// segment is smaller.
#[cfg(feature = "alloc")]
pub struct LoopbackTransport {
    layout: Cell<Option<QueueLayout>>,
    device_cursor: Cell<u16>,
    respond: Box<dyn Fn(&[u8]) -> Vec<u8>>,
}

#[cfg(feature = "alloc")]
impl LoopbackTransport {
    pub fn new(respond: impl Fn(&[u8]) -> Vec<u8> + 'static) -> Self {
        Self {
            layout: Cell::new(None),
            device_cursor: Cell::new(0),
            respond: Box::new(respond),
        }
    }

    /// Bind to the memory of a driver-owned queue. Must be called once,
    /// after the queue is constructed, before any `transact` call.
    pub(crate) fn bind(&self, layout: QueueLayout) {
        self.layout.set(Some(layout));
    }

    fn avail_idx_ptr(layout: &QueueLayout) -> *const u16 {
        (layout.base + layout.avail_off + 2) as *const u16
    }

    fn avail_ring_ptr(layout: &QueueLayout, ring_idx: usize) -> *const u16 {
        (layout.base + layout.avail_off + 4 + ring_idx * 2) as *const u16
    }

    fn desc_ptr(layout: &QueueLayout, idx: u16) -> *mut RawDesc {
        (layout.base + layout.desc_off + idx as usize * core::mem::size_of::<RawDesc>())
            as *mut RawDesc
    }

    fn used_idx_ptr(layout: &QueueLayout) -> *mut u16 {
        (layout.base + layout.used_off + 2) as *mut u16
    }

    fn used_elem_ptr(layout: &QueueLayout, ring_idx: usize) -> *mut (u32, u32) {
        (layout.base + layout.used_off + 4 + ring_idx * 8) as *mut (u32, u32)
    }

    /// Service every chain the driver has published since the last call.
    fn service(&self) {
        let Some(layout) = self.layout.get() else {
            return;
        };

        // SAFETY: avail_idx_ptr points within the driver's queue backing
        // memory, which outlives this loopback transport for the duration
        // of the test.
        let avail_idx = unsafe { *Self::avail_idx_ptr(&layout) };

        while self.device_cursor.get() != avail_idx {
            let ring_idx = (self.device_cursor.get() as usize) % layout.size as usize;
            // SAFETY: ring_idx is modulo-reduced into [0, size).
            let head = unsafe { *Self::avail_ring_ptr(&layout, ring_idx) };

            // Walk the chain, concatenating device-readable segments and
            // remembering the final device-writable descriptor.
            let mut request = Vec::new();
            let mut idx = head;
            let mut resp_desc: Option<RawDesc> = None;
            loop {
                // SAFETY: idx is a valid descriptor index published by the
                // driver's `reserve_chain`.
                let d = unsafe { *Self::desc_ptr(&layout, idx) };
                if d.flags & super::queue::VIRTQ_DESC_F_WRITE != 0 {
                    resp_desc = Some(d);
                } else {
                    // SAFETY: addr/len describe a driver-owned DMA buffer
                    // that remains valid until the chain is returned.
                    let bytes =
                        unsafe { core::slice::from_raw_parts(d.addr as *const u8, d.len as usize) };
                    request.extend_from_slice(bytes);
                }
                if d.flags & VIRTQ_DESC_F_NEXT == 0 {
                    break;
                }
                idx = d.next;
            }

            let response = (self.respond)(&request);
            let mut written = 0u32;
            if let Some(resp_desc) = resp_desc {
                let cap = (resp_desc.len as usize).min(response.len());
                // SAFETY: resp_desc.addr/len describe the driver-owned
                // response buffer for this chain.
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        response.as_ptr(),
                        resp_desc.addr as *mut u8,
                        cap,
                    );
                }
                written = cap as u32;
            }

            let used_ring_idx =
                (unsafe { *Self::used_idx_ptr(&layout) } as usize) % layout.size as usize;
            // SAFETY: used_elem_ptr(used_ring_idx) is within the queue's used
            // ring region; only the device (this loopback) writes it.
            unsafe { *Self::used_elem_ptr(&layout, used_ring_idx) = (head as u32, written) };
            fence(Ordering::Release);
            // SAFETY: used_idx_ptr is within the queue's used ring region.
            unsafe {
                let p = Self::used_idx_ptr(&layout);
                *p = (*p).wrapping_add(1);
            }

            self.device_cursor.set(self.device_cursor.get().wrapping_add(1));
        }
    }
}

#[cfg(feature = "alloc")]
impl Transport for LoopbackTransport {
    fn select_queue(&self, _qidx: u16) {}
    fn enable_queue(&self) {}

    fn notify(&self, _qidx: u16) {
        self.service();
    }

    fn reset_device_status(&self) {}
}

#[cfg(feature = "alloc")]
impl super::GpuQueue<LoopbackTransport> {
    /// Build a queue backed by an in-process loopback device instead of a
    /// real bus transport. `respond` plays the part of the device firmware:
    /// given the concatenated request bytes, it returns the response bytes.
    pub fn new_loopback(
        qidx: u16,
        queue_size: u16,
        respond: impl Fn(&[u8]) -> Vec<u8> + 'static,
    ) -> Self {
        let queue = super::GpuQueue::new(LoopbackTransport::new(respond), qidx, queue_size);
        queue.transport.bind(queue.layout());
        queue
    }
}

#[cfg(all(test, feature = "alloc"))]
mod tests {
    use super::*;
    use crate::transport::queue::Segment;

    #[test]
    fn loopback_echoes_request_length_as_response() {
        let mut queue = super::super::GpuQueue::<LoopbackTransport>::new_loopback(
            0,
            4,
            |req| alloc::vec![req.len() as u8; 4],
        );

        let mut req_buf = alloc::vec![0u8; 8];
        req_buf.copy_from_slice(b"abcdefgh");
        let mut resp_buf = alloc::vec![0u8; 4];

        let written = queue
            .transact_rw(
                Segment {
                    addr: req_buf.as_ptr() as u64,
                    len: req_buf.len() as u32,
                },
                Segment {
                    addr: resp_buf.as_mut_ptr() as u64,
                    len: resp_buf.len() as u32,
                },
            )
            .unwrap();

        assert_eq!(written, 4);
        assert_eq!(resp_buf, [8, 8, 8, 8]);
    }
}
