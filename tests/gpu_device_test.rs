//! Cross-module scenarios from `spec.md` §8, driven through the in-process
//! loopback transport instead of real hardware — mirroring how the
//! teacher's own `tests/` directory exercises whole subsystems with
//! software harnesses.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use veridian_vgpu::gpu::protocol::{cmd, resp, rid};
use veridian_vgpu::gpu::{GpuDevice, GpuOps};
use veridian_vgpu::transport::loopback::LoopbackTransport;
use veridian_vgpu::GpuError;

type Device = GpuDevice<LoopbackTransport>;

fn u32_le(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

fn hdr_response(type_: u32) -> Vec<u8> {
    let mut out = vec![0u8; 24];
    out[0..4].copy_from_slice(&type_.to_le_bytes());
    out
}

fn display_info_response(rect: (u32, u32, u32, u32)) -> Vec<u8> {
    let mut out = hdr_response(resp::OK_DISPLAY_INFO);
    // pmodes[0]: rect (x,y,w,h) + enabled + flags, 15 more zeroed entries.
    out.extend_from_slice(&rect.0.to_le_bytes());
    out.extend_from_slice(&rect.1.to_le_bytes());
    out.extend_from_slice(&rect.2.to_le_bytes());
    out.extend_from_slice(&rect.3.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes()); // enabled
    out.extend_from_slice(&0u32.to_le_bytes()); // flags
    out.resize(24 + 16 * 24, 0);
    out
}

/// A minimal software model of the device side of the protocol: dispatches
/// on the command type tag and returns a success response, recording every
/// command it sees (and optionally failing one of them on demand).
struct MockDevice {
    calls: RefCell<Vec<(u32, Vec<u8>)>>,
    fail_once: Cell<Option<u32>>,
}

impl MockDevice {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            calls: RefCell::new(Vec::new()),
            fail_once: Cell::new(None),
        })
    }

    fn respond(self: &Rc<Self>, req: &[u8]) -> Vec<u8> {
        let type_ = u32_le(req, 0);
        self.calls.borrow_mut().push((type_, req.to_vec()));

        if self.fail_once.get() == Some(type_) {
            self.fail_once.set(None);
            return hdr_response(0xDEAD);
        }

        match type_ {
            t if t == cmd::GET_DISPLAY_INFO => display_info_response((0, 0, 1024, 768)),
            _ => hdr_response(resp::OK_NODATA),
        }
    }
}

fn new_device(mock: &Rc<MockDevice>) -> Device {
    let mock = mock.clone();
    Device::new_loopback(16, move |req| mock.respond(req))
}

#[test]
fn enumeration_with_one_enabled_scanout_0_at_1024x768() {
    let mock = MockDevice::new();
    let device = new_device(&mock);

    let mut slots = [veridian_vgpu::gpu::mode::text_mode(); 16];
    let mut n = 16usize;
    device.get_available_modes(&mut slots, &mut n).unwrap();

    assert_eq!(n, 2);
    assert_eq!(slots[0].token, 0);
    assert_eq!(slots[0].width, 80);
    assert_eq!(slots[0].height, 25);
    assert_eq!(slots[1].token, 1);
    assert_eq!(slots[1].width, 1024);
    assert_eq!(slots[1].height, 768);
    assert_eq!(slots[1].channel_offsets, [0, 1, 2, 3]);
}

#[test]
fn set_mode_rollback_on_attach_backing_failure() {
    let mock = MockDevice::new();
    let device = new_device(&mock);

    mock.fail_once.set(Some(cmd::RESOURCE_ATTACH_BACKING));
    let err = device.set_mode(1).unwrap_err();
    assert!(matches!(err, GpuError::DeviceError { .. }));
    assert_eq!(device.get_mode().token, 0, "must roll back to text mode");

    // A second attempt, with no injected failure, must succeed — proving
    // no resource was leaked by the failed attempt.
    device.set_mode(1).unwrap();
    assert_eq!(device.get_mode().token, 1);
    assert_eq!(device.get_mode().width, 1024);
}

#[test]
fn flush_issues_transfer_then_resource_flush_for_screen_rid() {
    let mock = MockDevice::new();
    let device = new_device(&mock);

    device.set_mode(1).unwrap();
    mock.calls.borrow_mut().clear();

    device.flush().unwrap();

    let calls = mock.calls.borrow();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, cmd::TRANSFER_TO_HOST_2D);
    assert_eq!(calls[1].0, cmd::RESOURCE_FLUSH);

    // TransferToHost2d: hdr(24) + rect(16) + offset(8) + resource_id(4) + padding(4)
    let transfer = &calls[0].1;
    assert_eq!(u32_le(transfer, 24), 0); // rect.x
    assert_eq!(u32_le(transfer, 32), 1024); // rect.width
    assert_eq!(u32_le(transfer, 36), 768); // rect.height
    assert_eq!(u32_le(transfer, 48), rid::SCREEN);

    // ResourceFlush: hdr(24) + rect(16) + resource_id(4) + padding(4)
    let flush = &calls[1].1;
    assert_eq!(u32_le(flush, 24), 0);
    assert_eq!(u32_le(flush, 40), rid::SCREEN);
}

#[test]
fn draw_pixel_with_clipping_matches_scenario_2() {
    let mock = MockDevice::new();
    let device = new_device(&mock);
    device.set_mode(1).unwrap();

    device
        .graphics_set_clipping_box(Some(veridian_vgpu::gpu::framebuffer::BBox::new(
            10, 10, 5, 5,
        )))
        .unwrap();

    device
        .graphics_draw_pixel((12, 12), 0xFF0000FF)
        .unwrap();
    device
        .graphics_draw_pixel((20, 20), 0xFF0000FF)
        .unwrap();

    // No direct framebuffer accessor is exposed on GpuDevice; the clipped
    // write is exercised end-to-end via flush, asserting only that it does
    // not error and that out-of-clip draws are accepted (not rejected) but
    // have no visible effect — the byte-level assertion lives in
    // `gpu::primitives`'s own unit test, which has direct buffer access.
    device.flush().unwrap();
}
