//! Video mode descriptors and the display-info cache (`spec.md` §3, §4.3).
//!
//! Grounded on `virtio_gpu.rs::get_display_info`'s cached
//! `VirtioGpuRespDisplayInfo`, generalized from "always scanout 0" to any of
//! the 16 scanouts the device reports as enabled.

use super::framebuffer::BBox;
use super::protocol::MAX_SCANOUTS;

/// One entry of the cached `GET_DISPLAY_INFO` response.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanoutInfo {
    pub enabled: bool,
    pub rect: BBox,
    pub flags: u32,
}

/// Either text or graphics-2D (`spec.md` §3).
///
/// `token` is the opaque "mode data": 0 for text, scanout index + 1 for
/// graphics, matching `cur_mode`'s own encoding so `get_mode` can
/// reconstruct a descriptor directly from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoMode {
    pub token: u32,
    pub width: u32,
    pub height: u32,
    pub channel_offsets: [i8; 4],
    pub cursor_capable: bool,
}

/// 80x25, channel offsets {0,1,-1,-1}, no cursor capability.
pub const TEXT_COLS: u32 = 80;
pub const TEXT_ROWS: u32 = 25;
/// Fixed 80x25x2-byte text-mode snapshot (`spec.md` §3).
pub const TEXT_SNAPSHOT_BYTES: usize = (TEXT_COLS * TEXT_ROWS * 2) as usize;
/// Nominal hardware-cursor size (reserved, not driven — `spec.md` §1).
pub const CURSOR_SIZE: u32 = 64;

pub fn text_mode() -> VideoMode {
    VideoMode {
        token: 0,
        width: TEXT_COLS,
        height: TEXT_ROWS,
        channel_offsets: [0, 1, -1, -1],
        cursor_capable: false,
    }
}

pub fn graphics_mode(token: u32, rect: &BBox) -> VideoMode {
    VideoMode {
        token,
        width: rect.width,
        height: rect.height,
        channel_offsets: [0, 1, 2, 3],
        cursor_capable: true,
    }
}

/// `get_available_modes` enumeration (`spec.md` §4.3): the first slot is
/// always text; subsequent slots are one per enabled scanout, in order, up
/// to `min(n - 1, 15)`. Requires `n >= 2`.
pub fn available_modes(
    display_info: &[ScanoutInfo; MAX_SCANOUTS],
    n: usize,
) -> Option<([VideoMode; MAX_SCANOUTS], usize)> {
    if n < 2 {
        return None;
    }
    let mut slots = [text_mode(); MAX_SCANOUTS];
    let max = (n - 1).min(MAX_SCANOUTS - 1);
    let mut produced = 1;
    for (i, info) in display_info.iter().enumerate() {
        if produced > max {
            break;
        }
        if info.enabled {
            slots[produced] = graphics_mode((i + 1) as u32, &info.rect);
            produced += 1;
        }
    }
    Some((slots, produced))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(enabled: bool, w: u32, h: u32) -> ScanoutInfo {
        ScanoutInfo {
            enabled,
            rect: BBox::new(0, 0, w, h),
            flags: 0,
        }
    }

    #[test]
    fn enumeration_with_one_enabled_scanout() {
        let mut infos = [ScanoutInfo::default(); MAX_SCANOUTS];
        infos[0] = info(true, 1024, 768);
        let (slots, count) = available_modes(&infos, 16).unwrap();
        assert_eq!(count, 2);
        assert_eq!(slots[0].token, 0);
        assert_eq!(slots[0].width, 80);
        assert_eq!(slots[0].height, 25);
        assert_eq!(slots[1].token, 1);
        assert_eq!(slots[1].width, 1024);
        assert_eq!(slots[1].height, 768);
        assert_eq!(slots[1].channel_offsets, [0, 1, 2, 3]);
    }

    #[test]
    fn enumeration_requires_at_least_two_slots() {
        let infos = [ScanoutInfo::default(); MAX_SCANOUTS];
        assert!(available_modes(&infos, 1).is_none());
    }

    #[test]
    fn disabled_scanouts_are_skipped() {
        let mut infos = [ScanoutInfo::default(); MAX_SCANOUTS];
        infos[0] = info(false, 640, 480);
        infos[1] = info(true, 800, 600);
        let (slots, _count) = available_modes(&infos, 16).unwrap();
        assert_eq!(slots[1].token, 2);
        assert_eq!(slots[1].width, 800);
    }
}
