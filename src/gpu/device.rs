//! The GPU device state machine and registration surface
//! (`spec.md` §4.3, §4.6, §4.7, §4.9; `spec.md` §5 concurrency model).
//!
//! Grounded on `virtio_gpu.rs`'s `VirtioGpuDriver` (the struct tying
//! together the control queue, the cached display info, and the
//! framebuffer) and its global `spin::Mutex<Option<VirtioGpuDriver>>`,
//! generalized from "always scanout 0, no rollback" into the spec's
//! explicit `S0`/`S_k` unwind-on-failure state machine and arbitrary
//! scanout selection.

use spin::Mutex;

use crate::error::{device_error, GpuError, GpuResult};
use crate::transport::{GpuQueue, Transport};

use super::blit::BlitOp;
use super::framebuffer::{BBox, Framebuffer};
use super::mode::{self, ScanoutInfo, VideoMode, CURSOR_SIZE, TEXT_COLS, TEXT_ROWS, TEXT_SNAPSHOT_BYTES};
use super::primitives::{self, Bitmap};
use super::protocol::{
    cmd, req_segment, resp, resp_segment, rid, CtrlHdr, MemEntry, Rect, ResourceAttachBacking,
    ResourceCreate2d, ResourceDetachBacking, ResourceUnref, RespDisplayInfo, SetScanout,
    TransferToHost2d, ResourceFlush, MAX_SCANOUTS,
};

/// The only virtqueue this core drives (`spec.md` §4.1, §6).
const CONTROL_QUEUE: u16 = 0;

impl From<BBox> for Rect {
    fn from(b: BBox) -> Self {
        Rect {
            x: b.x as u32,
            y: b.y as u32,
            width: b.width,
            height: b.height,
        }
    }
}

impl From<Rect> for BBox {
    fn from(r: Rect) -> Self {
        BBox::new(r.x as i32, r.y as i32, r.width, r.height)
    }
}

struct Inner<T: Transport> {
    queue: GpuQueue<T>,
    have_info: bool,
    display_info: [ScanoutInfo; MAX_SCANOUTS],
    /// 0 = text, k = graphics on scanout k-1 (`spec.md` §3, §4.3).
    cur_mode: u32,
    frame_box: BBox,
    clip_box: BBox,
    framebuffer: Option<Framebuffer>,
    /// The text screen this core owns outright; there is no separate VGA
    /// memory to mirror, so this buffer *is* the text screen (see
    /// `DESIGN.md` for this simplification of `spec.md` §4.3's "snapshot
    /// the text screen" step).
    text_snapshot: [u8; TEXT_SNAPSHOT_BYTES],
    text_cursor: (u32, u32),
}

impl<T: Transport> Inner<T> {
    fn new(queue: GpuQueue<T>) -> Self {
        Self {
            queue,
            have_info: false,
            display_info: [ScanoutInfo::default(); MAX_SCANOUTS],
            cur_mode: 0,
            frame_box: BBox::default(),
            clip_box: BBox::default(),
            framebuffer: None,
            text_snapshot: [0u8; TEXT_SNAPSHOT_BYTES],
            text_cursor: (0, 0),
        }
    }

    fn ensure_display_info(&mut self) -> GpuResult<()> {
        if self.have_info {
            return Ok(());
        }
        let mut req = CtrlHdr::request(cmd::GET_DISPLAY_INFO);
        let mut resp_buf = RespDisplayInfo::default();
        self.queue
            .transact_rw(req_segment(&mut req), resp_segment(&mut resp_buf))?;
        if resp_buf.hdr.type_ != resp::OK_DISPLAY_INFO {
            return Err(device_error("GET_DISPLAY_INFO", resp_buf.hdr.type_));
        }
        for (i, pmode) in resp_buf.pmodes.iter().enumerate() {
            self.display_info[i] = ScanoutInfo {
                enabled: pmode.enabled != 0,
                rect: pmode.rect.into(),
                flags: pmode.flags,
            };
        }
        self.have_info = true;
        Ok(())
    }

    fn create_resource_2d(&mut self, id: u32, width: u32, height: u32) -> GpuResult<()> {
        let mut req = ResourceCreate2d {
            hdr: CtrlHdr::request(cmd::RESOURCE_CREATE_2D),
            resource_id: id,
            format: super::protocol::FORMAT_R8G8B8A8_UNORM,
            width,
            height,
        };
        let mut resp_hdr = CtrlHdr::default();
        self.queue
            .transact_rw(req_segment(&mut req), resp_segment(&mut resp_hdr))?;
        check_ok("RESOURCE_CREATE_2D", &resp_hdr)
    }

    fn resource_unref(&mut self, id: u32) -> GpuResult<()> {
        let mut req = ResourceUnref {
            hdr: CtrlHdr::request(cmd::RESOURCE_UNREF),
            resource_id: id,
            padding: 0,
        };
        let mut resp_hdr = CtrlHdr::default();
        self.queue
            .transact_rw(req_segment(&mut req), resp_segment(&mut resp_hdr))?;
        check_ok("RESOURCE_UNREF", &resp_hdr)
    }

    fn attach_backing(&mut self, id: u32) -> GpuResult<()> {
        let fb = self
            .framebuffer
            .as_ref()
            .ok_or(GpuError::InvalidState {
                expected: "framebuffer allocated",
                actual: "none",
            })?;
        let mut req = ResourceAttachBacking {
            hdr: CtrlHdr::request(cmd::RESOURCE_ATTACH_BACKING),
            resource_id: id,
            nr_entries: 1,
        };
        let mut entry = MemEntry {
            addr: fb.addr(),
            length: fb.byte_len() as u32,
            padding: 0,
        };
        let mut resp_hdr = CtrlHdr::default();
        self.queue.transact_rrw(
            req_segment(&mut req),
            req_segment(&mut entry),
            resp_segment(&mut resp_hdr),
        )?;
        check_ok("RESOURCE_ATTACH_BACKING", &resp_hdr)
    }

    fn detach_backing(&mut self, id: u32) -> GpuResult<()> {
        let mut req = ResourceDetachBacking {
            hdr: CtrlHdr::request(cmd::RESOURCE_DETACH_BACKING),
            resource_id: id,
            padding: 0,
        };
        let mut resp_hdr = CtrlHdr::default();
        self.queue
            .transact_rw(req_segment(&mut req), resp_segment(&mut resp_hdr))?;
        check_ok("RESOURCE_DETACH_BACKING", &resp_hdr)
    }

    fn set_scanout(&mut self, scanout_id: u32, resource_id: u32, rect: BBox) -> GpuResult<()> {
        let mut req = SetScanout {
            hdr: CtrlHdr::request(cmd::SET_SCANOUT),
            rect: rect.into(),
            scanout_id,
            resource_id,
        };
        let mut resp_hdr = CtrlHdr::default();
        self.queue
            .transact_rw(req_segment(&mut req), resp_segment(&mut resp_hdr))?;
        check_ok("SET_SCANOUT", &resp_hdr)
    }

    /// The flush pipeline (`spec.md` §4.6): transfer-to-host then
    /// resource-flush, both synchronous. No-op in S0.
    fn flush_inner(&mut self) -> GpuResult<()> {
        if self.cur_mode == 0 {
            return Ok(());
        }
        let rect: Rect = self.frame_box.into();

        let mut transfer = TransferToHost2d {
            hdr: CtrlHdr::request(cmd::TRANSFER_TO_HOST_2D),
            rect,
            offset: 0,
            resource_id: rid::SCREEN,
            padding: 0,
        };
        let mut resp_hdr = CtrlHdr::default();
        self.queue
            .transact_rw(req_segment(&mut transfer), resp_segment(&mut resp_hdr))?;
        check_ok("TRANSFER_TO_HOST_2D", &resp_hdr)?;

        let mut flush_req = ResourceFlush {
            hdr: CtrlHdr::request(cmd::RESOURCE_FLUSH),
            rect,
            resource_id: rid::SCREEN,
            padding: 0,
        };
        let mut resp_hdr = CtrlHdr::default();
        self.queue
            .transact_rw(req_segment(&mut flush_req), resp_segment(&mut resp_hdr))?;
        check_ok("RESOURCE_FLUSH", &resp_hdr)
    }

    /// Best-effort unwind of a partially brought-up graphics resource back
    /// to S0, regardless of how far bring-up got (`spec.md` §4.3: "Any
    /// failed step unwinds prior steps and returns to S0").
    fn unwind_bringup(&mut self) {
        let _ = self.detach_backing(rid::SCREEN);
        let _ = self.resource_unref(rid::SCREEN);
        self.framebuffer = None;
        self.cur_mode = 0;
        self.frame_box = BBox::default();
        self.clip_box = BBox::default();
    }

    /// S0 -> S_k (`spec.md` §4.3).
    fn bring_up_graphics(&mut self, token: u32, rect: BBox) -> GpuResult<()> {
        // Step 1: the text screen buffer is this core's own canonical copy;
        // nothing external to mirror it from (see `text_snapshot` doc).
        let result = (|| -> GpuResult<()> {
            // Step 2.
            self.create_resource_2d(rid::SCREEN, rect.width, rect.height)?;
            // Step 3.
            self.framebuffer = Some(Framebuffer::new(rect.width, rect.height)?);
            // Step 4.
            self.attach_backing(rid::SCREEN)?;
            // Step 5.
            self.set_scanout(token - 1, rid::SCREEN, rect)?;
            self.cur_mode = token;
            self.frame_box = rect;
            self.clip_box = rect;
            // Step 6.
            self.flush_inner()
        })();

        if let Err(e) = result {
            log::warn!("set_mode({token}): bring-up failed ({e}), rolling back to text mode");
            self.unwind_bringup();
            return Err(e);
        }
        Ok(())
    }

    /// S_k -> S0 (`spec.md` §4.3: detach backing -> unref -> free
    /// framebuffer -> clear cur_mode -> reset device status register to
    /// zero).
    fn reset(&mut self) -> GpuResult<()> {
        if self.cur_mode == 0 {
            return Ok(());
        }
        let detach = self.detach_backing(rid::SCREEN);
        let unref = self.resource_unref(rid::SCREEN);
        self.framebuffer = None;
        self.cur_mode = 0;
        self.frame_box = BBox::default();
        self.clip_box = BBox::default();
        self.queue.reset_device_status();
        detach?;
        unref?;
        Ok(())
    }

    fn set_mode(&mut self, token: u32) -> GpuResult<()> {
        self.ensure_display_info()?;
        if token == self.cur_mode {
            return Ok(());
        }
        if token == 0 {
            return self.reset();
        }
        if self.cur_mode != 0 {
            self.reset()?;
        }
        let idx = (token - 1) as usize;
        let info = *self
            .display_info
            .get(idx)
            .ok_or(GpuError::InvalidArgument { name: "mode" })?;
        if !info.enabled {
            return Err(GpuError::InvalidArgument { name: "mode" });
        }
        self.bring_up_graphics(token, info.rect)
    }

    fn get_mode(&self) -> VideoMode {
        if self.cur_mode == 0 {
            mode::text_mode()
        } else {
            mode::graphics_mode(self.cur_mode, &self.frame_box)
        }
    }
}

fn check_ok(command: &'static str, hdr: &CtrlHdr) -> GpuResult<()> {
    if hdr.type_ == resp::OK_NODATA {
        Ok(())
    } else {
        Err(device_error(command, hdr.type_))
    }
}

/// A registered GPU device (`spec.md` §6's "toward the OS device
/// abstraction"). Guarded by one spinlock covering the mode manager and
/// framebuffer state (`spec.md` §5); the ring transport itself is
/// synchronized through the explicit fences in
/// [`crate::transport::queue::Virtqueue`], not this lock.
pub struct GpuDevice<T: Transport> {
    inner: Mutex<Inner<T>>,
}

impl<T: Transport> GpuDevice<T> {
    /// Build a device atop an already-initialized control queue. The
    /// enclosing framework is responsible for transport discovery, feature
    /// negotiation and virtqueue setup (`spec.md` §1).
    pub fn new(transport: T, queue_size: u16) -> Self {
        Self::from_queue(GpuQueue::new(transport, CONTROL_QUEUE, queue_size))
    }

    fn from_queue(queue: GpuQueue<T>) -> Self {
        Self {
            inner: Mutex::new(Inner::new(queue)),
        }
    }
}

#[cfg(any(test, feature = "testing"))]
impl GpuDevice<crate::transport::loopback::LoopbackTransport> {
    /// Build a device backed by the in-process loopback device instead of a
    /// real bus transport, for tests (`spec.md` §8).
    pub fn new_loopback(
        queue_size: u16,
        respond: impl Fn(&[u8]) -> alloc::vec::Vec<u8> + 'static,
    ) -> Self {
        Self::from_queue(GpuQueue::new_loopback(CONTROL_QUEUE, queue_size, respond))
    }
}

/// The operations `spec.md` §6 exposes toward the OS device abstraction.
pub trait GpuOps {
    fn get_available_modes(&self, slots: &mut [VideoMode], n: &mut usize) -> GpuResult<()>;
    fn get_mode(&self) -> VideoMode;
    fn set_mode(&self, token: u32) -> GpuResult<()>;
    fn flush(&self) -> GpuResult<()>;

    fn text_set_char(&self, row: u32, col: u32, ch: u8, attr: u8) -> GpuResult<()>;
    fn text_set_cursor(&self, row: u32, col: u32) -> GpuResult<()>;

    fn graphics_set_clipping_box(&self, box_: Option<BBox>) -> GpuResult<()>;
    /// Reserved, unimplemented (`spec.md` §4.4).
    fn graphics_set_clipping_region(&self) -> GpuResult<()>;
    fn graphics_draw_pixel(&self, loc: (i32, i32), p: u32) -> GpuResult<()>;
    fn graphics_draw_line(&self, a: (i32, i32), b: (i32, i32), p: u32) -> GpuResult<()>;
    fn graphics_draw_poly(&self, points: &[(i32, i32)], p: u32) -> GpuResult<()>;
    fn graphics_fill_box_with_pixel(&self, box_: BBox, p: u32, op: BlitOp) -> GpuResult<()>;
    fn graphics_fill_box_with_bitmap(
        &self,
        box_: BBox,
        bitmap: &Bitmap<'_>,
        op: BlitOp,
    ) -> GpuResult<()>;
    fn graphics_copy_box(&self, src: BBox, dst: BBox, op: BlitOp) -> GpuResult<()>;
    /// Reserved, unimplemented (`spec.md` §4.5, Non-goals).
    fn graphics_draw_text(&self) -> GpuResult<()>;
    /// Reserved, unimplemented (`spec.md` §4.5, Non-goals: hardware-cursor
    /// use).
    fn graphics_set_cursor_bitmap(&self) -> GpuResult<()>;
    /// Reserved, unimplemented (`spec.md` §4.5, Non-goals).
    fn graphics_set_cursor(&self) -> GpuResult<()>;
}

impl<T: Transport> GpuOps for GpuDevice<T> {
    fn get_available_modes(&self, slots: &mut [VideoMode], n: &mut usize) -> GpuResult<()> {
        let requested = *n;
        if requested < 2 {
            return Err(GpuError::InvalidArgument { name: "n" });
        }
        let mut inner = self.inner.lock();
        inner.ensure_display_info()?;
        let (produced, count) = mode::available_modes(&inner.display_info, requested)
            .ok_or(GpuError::InvalidArgument { name: "n" })?;
        let to_copy = count.min(slots.len());
        slots[..to_copy].copy_from_slice(&produced[..to_copy]);
        *n = to_copy;
        Ok(())
    }

    fn get_mode(&self) -> VideoMode {
        self.inner.lock().get_mode()
    }

    fn set_mode(&self, token: u32) -> GpuResult<()> {
        self.inner.lock().set_mode(token)
    }

    fn flush(&self) -> GpuResult<()> {
        self.inner.lock().flush_inner()
    }

    fn text_set_char(&self, row: u32, col: u32, ch: u8, attr: u8) -> GpuResult<()> {
        if row >= TEXT_ROWS || col >= TEXT_COLS {
            return Err(GpuError::InvalidArgument { name: "row_col" });
        }
        let mut inner = self.inner.lock();
        let i = ((row * TEXT_COLS + col) * 2) as usize;
        inner.text_snapshot[i] = ch;
        inner.text_snapshot[i + 1] = attr;
        Ok(())
    }

    fn text_set_cursor(&self, row: u32, col: u32) -> GpuResult<()> {
        if row >= TEXT_ROWS || col >= TEXT_COLS {
            return Err(GpuError::InvalidArgument { name: "row_col" });
        }
        self.inner.lock().text_cursor = (row, col);
        Ok(())
    }

    fn graphics_set_clipping_box(&self, box_: Option<BBox>) -> GpuResult<()> {
        let mut inner = self.inner.lock();
        if inner.cur_mode == 0 {
            return Err(GpuError::InvalidState {
                expected: "graphics mode",
                actual: "text",
            });
        }
        inner.clip_box = box_.unwrap_or(inner.frame_box);
        Ok(())
    }

    fn graphics_set_clipping_region(&self) -> GpuResult<()> {
        Err(GpuError::Unsupported {
            feature: "clipping_region",
        })
    }

    fn graphics_draw_pixel(&self, loc: (i32, i32), p: u32) -> GpuResult<()> {
        self.with_framebuffer(|fb, clip| {
            primitives::draw_pixel(fb, clip, loc.0, loc.1, p);
        })
    }

    fn graphics_draw_line(&self, a: (i32, i32), b: (i32, i32), p: u32) -> GpuResult<()> {
        self.with_framebuffer(|fb, clip| {
            primitives::draw_line(fb, clip, a, b, p);
        })
    }

    fn graphics_draw_poly(&self, points: &[(i32, i32)], p: u32) -> GpuResult<()> {
        self.with_framebuffer(|fb, clip| {
            primitives::draw_poly(fb, clip, points, p);
        })
    }

    fn graphics_fill_box_with_pixel(&self, box_: BBox, p: u32, op: BlitOp) -> GpuResult<()> {
        self.with_framebuffer(|fb, clip| {
            primitives::fill_box_with_pixel(fb, clip, &box_, p, op);
        })
    }

    fn graphics_fill_box_with_bitmap(
        &self,
        box_: BBox,
        bitmap: &Bitmap<'_>,
        op: BlitOp,
    ) -> GpuResult<()> {
        self.with_framebuffer(|fb, clip| {
            primitives::fill_box_with_bitmap(fb, clip, &box_, bitmap, op);
        })
    }

    fn graphics_copy_box(&self, src: BBox, dst: BBox, op: BlitOp) -> GpuResult<()> {
        self.with_framebuffer(|fb, clip| {
            primitives::copy_box(fb, clip, &src, &dst, op);
        })
    }

    fn graphics_draw_text(&self) -> GpuResult<()> {
        Err(GpuError::Unsupported {
            feature: "graphics_draw_text",
        })
    }

    fn graphics_set_cursor_bitmap(&self) -> GpuResult<()> {
        let _ = CURSOR_SIZE;
        Err(GpuError::Unsupported {
            feature: "graphics_set_cursor_bitmap",
        })
    }

    fn graphics_set_cursor(&self) -> GpuResult<()> {
        Err(GpuError::Unsupported {
            feature: "graphics_set_cursor",
        })
    }
}

impl<T: Transport> GpuDevice<T> {
    fn with_framebuffer(
        &self,
        f: impl FnOnce(&mut Framebuffer, &BBox),
    ) -> GpuResult<()> {
        let mut inner = self.inner.lock();
        if inner.cur_mode == 0 {
            return Err(GpuError::InvalidState {
                expected: "graphics mode",
                actual: "text",
            });
        }
        let clip = inner.clip_box;
        let fb = inner.framebuffer.as_mut().ok_or(GpuError::InvalidState {
            expected: "framebuffer allocated",
            actual: "none",
        })?;
        f(fb, &clip);
        Ok(())
    }
}
