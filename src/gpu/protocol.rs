//! Wire structures and command/response tags (`spec.md` §4.2, §6).
//!
//! Layouts are bit-exact to `original_source/src/dev/virtio_gpu.c`'s
//! `struct virtio_gpu_*` definitions and to `virtio_gpu.rs`'s `VirtioGpu*`
//! `#[repr(C)]` structs: a 24-byte control header, 16-byte rectangles, and
//! one request body per command. All request and response buffers are
//! zero-initialized before use, matching both sources.

use crate::transport::queue::Segment;

/// Command type tags (request headers).
pub mod cmd {
    pub const GET_DISPLAY_INFO: u32 = 0x0100;
    pub const RESOURCE_CREATE_2D: u32 = 0x0101;
    pub const RESOURCE_UNREF: u32 = 0x0102;
    pub const SET_SCANOUT: u32 = 0x0103;
    pub const RESOURCE_FLUSH: u32 = 0x0104;
    pub const TRANSFER_TO_HOST_2D: u32 = 0x0105;
    pub const RESOURCE_ATTACH_BACKING: u32 = 0x0106;
    pub const RESOURCE_DETACH_BACKING: u32 = 0x0107;
    /// Reserved: 3D/capability-set negotiation is a non-goal (`spec.md`
    /// §1). Kept so an unexpected device response can be reported by name
    /// instead of a bare integer.
    pub const GET_CAPSET_INFO: u32 = 0x0108;
    /// Reserved alongside `GET_CAPSET_INFO`; never issued by this core.
    pub const GET_CAPSET: u32 = 0x0109;
    /// Reserved: extended display-descriptor retrieval is a non-goal
    /// (`spec.md` §1). Kept so an unexpected device response can be
    /// reported by name instead of a bare integer.
    pub const GET_EDID: u32 = 0x010a;
}

/// Success response type tags.
pub mod resp {
    pub const OK_NODATA: u32 = 0x1100;
    pub const OK_DISPLAY_INFO: u32 = 0x1101;
    /// Reserved alongside `cmd::GET_CAPSET_INFO`; never issued by this core.
    pub const OK_CAPSET_INFO: u32 = 0x1102;
    /// Reserved alongside `cmd::GET_CAPSET`; never issued by this core.
    pub const OK_CAPSET: u32 = 0x1103;
    /// Reserved alongside `cmd::GET_EDID`; never issued by this core.
    pub const OK_EDID: u32 = 0x1104;
}

/// Reserved resource ids (`spec.md` §6). 0 means "none" and is never used.
pub mod rid {
    pub const SCREEN: u32 = 42;
    /// Reserved: hardware-cursor use is a non-goal (`spec.md` §1); the id is
    /// carried so cursor-resource bookkeeping can be added without
    /// renumbering anything.
    pub const CURSOR: u32 = 23;
}

/// `VIRTIO_GPU_FLAG_FENCE`, carried bit-exact but never set by this core:
/// fencing is not exercised by synchronous 2D-only callers.
pub const FLAG_FENCE: u32 = 1;

/// RGBA8, one byte per channel, channel order (R, G, B, A) — `spec.md` §4.2.
pub const FORMAT_R8G8B8A8_UNORM: u32 = 67;

pub const MAX_SCANOUTS: usize = 16;

/// The 24-byte header every command request and response begins with.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CtrlHdr {
    pub type_: u32,
    pub flags: u32,
    pub fence_id: u64,
    pub ctx_id: u32,
    pub ring_idx: u8,
    pub padding: [u8; 3],
}

impl CtrlHdr {
    pub fn request(type_: u32) -> Self {
        Self {
            type_,
            flags: 0,
            fence_id: 0,
            ctx_id: 0,
            ring_idx: 0,
            padding: [0; 3],
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceCreate2d {
    pub hdr: CtrlHdr,
    pub resource_id: u32,
    pub format: u32,
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceUnref {
    pub hdr: CtrlHdr,
    pub resource_id: u32,
    pub padding: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceAttachBacking {
    pub hdr: CtrlHdr,
    pub resource_id: u32,
    pub nr_entries: u32,
}

/// One entry in the variable-length list that follows
/// [`ResourceAttachBacking`] as a separate segment.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct MemEntry {
    pub addr: u64,
    pub length: u32,
    pub padding: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceDetachBacking {
    pub hdr: CtrlHdr,
    pub resource_id: u32,
    pub padding: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SetScanout {
    pub hdr: CtrlHdr,
    pub rect: Rect,
    pub scanout_id: u32,
    pub resource_id: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferToHost2d {
    pub hdr: CtrlHdr,
    pub rect: Rect,
    pub offset: u64,
    pub resource_id: u32,
    pub padding: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceFlush {
    pub hdr: CtrlHdr,
    pub rect: Rect,
    pub resource_id: u32,
    pub padding: u32,
}

/// One scanout slot of the `GET_DISPLAY_INFO` response array.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DisplayOne {
    pub rect: Rect,
    pub enabled: u32,
    pub flags: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RespDisplayInfo {
    pub hdr: CtrlHdr,
    pub pmodes: [DisplayOne; MAX_SCANOUTS],
}

impl Default for RespDisplayInfo {
    fn default() -> Self {
        Self {
            hdr: CtrlHdr::default(),
            pmodes: [DisplayOne::default(); MAX_SCANOUTS],
        }
    }
}

/// View a `#[repr(C)]` request value as the read-only segment `transact`
/// needs. The value must outlive the `transact` call that uses it; callers
/// keep it on the stack for the duration of the synchronous transaction.
pub(crate) fn req_segment<T>(value: &T) -> Segment {
    Segment {
        addr: value as *const T as u64,
        len: core::mem::size_of::<T>() as u32,
    }
}

/// View a `#[repr(C)]` response value as the device-writable segment
/// `transact` needs.
pub(crate) fn resp_segment<T>(value: &mut T) -> Segment {
    Segment {
        addr: value as *mut T as u64,
        len: core::mem::size_of::<T>() as u32,
    }
}
