//! The ring-transport layer: publishes descriptor chains to the device and
//! waits for completion through the used ring.
//!
//! Grounded on `kernel/src/drivers/virtio/mod.rs` (the `VirtioTransport`
//! abstraction over register access: queue select, queue size, queue
//! addresses, notify, status) and `kernel/src/drivers/virtio_gpu.rs`'s
//! `send_command_raw` (the transact-and-poll sequence this module
//! generalizes into `transact`/`transact_rw`/`transact_rrw`).

#[cfg(any(test, feature = "testing"))]
pub mod loopback;
pub mod queue;

use crate::error::GpuError;
use queue::{Segment, Virtqueue};

/// The register-window contract this core needs from the bus layer
/// (`spec.md` §6, "toward the transport/bus layer"). Everything about *how*
/// the device is discovered and mapped is the enclosing framework's job;
/// this trait is the narrow surface the ring transport drives directly.
pub trait Transport {
    /// Select a queue by index (`queue_select` register).
    fn select_queue(&self, qidx: u16);
    /// Enable the currently selected queue (`queue_enable` register).
    fn enable_queue(&self);
    /// Ring the doorbell for the given queue (the bus-layer notify hook).
    fn notify(&self, qidx: u16);
    /// Acknowledge a device interrupt (the interrupt bridge of `spec.md`
    /// §4.7). A no-op is a valid implementation for a purely polling
    /// transport.
    fn ack_interrupt(&self) {}
    /// Store `0` into the `device_status` register (`spec.md` §4.3's
    /// S_k -> S0 transition, §6's register list).
    fn reset_device_status(&self);
}

/// One queue's worth of ring state plus the transport used to kick it.
///
/// `transact`/`transact_rw`/`transact_rrw` are the three bindings `spec.md`
/// §4.1 names. `qidx` is fixed at construction because a `GpuQueue` always
/// drives exactly one virtqueue (the control queue, in this core).
pub struct GpuQueue<T: Transport> {
    transport: T,
    qidx: u16,
    ring: Virtqueue,
}

impl<T: Transport> GpuQueue<T> {
    pub fn new(transport: T, qidx: u16, queue_size: u16) -> Self {
        Self {
            transport,
            qidx,
            ring: Virtqueue::new(queue_size),
        }
    }

    /// Raw memory layout of this queue's ring, for binding an in-process
    /// loopback device (`testing` feature) to the same memory a real bus
    /// transport's DMA engine would see.
    pub(crate) fn layout(&self) -> queue::QueueLayout {
        self.ring.layout()
    }

    /// `transact(qidx, req_segments[], resp_segment)` — `spec.md` §4.1.
    pub fn transact(&mut self, req: &[Segment], resp: Segment) -> Result<u32, GpuError> {
        let transport = &self.transport;
        let qidx = self.qidx;
        self.ring.transact(req, resp, || {
            transport.select_queue(qidx);
            transport.enable_queue();
            transport.notify(qidx);
        })
    }

    /// Two-segment binding: one request segment, one response segment.
    pub fn transact_rw(&mut self, req: Segment, resp: Segment) -> Result<u32, GpuError> {
        self.transact(&[req], resp)
    }

    /// Three-segment binding: request header, a variable-length extra
    /// segment (e.g. the backing-memory entry list), and the response.
    pub fn transact_rrw(
        &mut self,
        req: Segment,
        extra: Segment,
        resp: Segment,
    ) -> Result<u32, GpuError> {
        self.transact(&[req, extra], resp)
    }

    /// Reset the `device_status` register to zero (`spec.md` §4.3's
    /// S_k -> S0 transition).
    pub fn reset_device_status(&self) {
        self.transport.reset_device_status();
    }
}
