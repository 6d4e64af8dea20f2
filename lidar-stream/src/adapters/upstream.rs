//! Interfaces consumed from the upstream processing pipeline
//!
//! The depth computation itself lives outside this crate. It hands over one
//! field of view at a time through [`FovResult`], and raw captures as plain
//! byte buffers that start with a [`RawCaptureHeader`].

use crate::core::types::{CalibrationRefs, Timescale, Timestamp};
use crate::protocol::{get_u16, get_u32, put_u16, put_u32};

/// Per-pixel depth results for one field of view
///
/// All per-pixel arrays are flat, row-major over the image: the pixel at
/// (`steer`, `stare`) lives at `stare * width + steer`.
pub trait FovResult {
    /// (steer width, stare height) in pixels
    fn image_size(&self) -> (u16, u16);

    /// Bin step between adjacent pixels (steer, stare)
    fn image_step(&self) -> (u16, u16);

    /// Bin position of pixel (0, 0) (steer, stare)
    fn top_left(&self) -> (u16, u16);

    /// Range samples; 0 means no return
    fn range(&self) -> &[u16];

    /// Signal (intensity) samples
    fn signal(&self) -> &[u16];

    fn snr(&self) -> &[u16];

    fn background(&self) -> &[u16];

    /// ROI index each pixel was captured in
    fn roi_indices(&self) -> &[u16];

    /// Capture time of every ROI, indexed by ROI index
    fn roi_timestamps(&self) -> &[Timestamp];

    /// Shared calibration vectors (X, Y, Theta, Phi)
    fn calibration(&self) -> CalibrationRefs;

    fn user_tag(&self) -> u32;

    /// Field-of-view (head) this result belongs to
    fn sensor_id(&self) -> u16;

    /// True on the first result after the calibration vectors changed
    fn new_calibration(&self) -> bool;

    fn timescale(&self) -> Timescale {
        Timescale::Arb
    }

    /// Result should be processed but not put on the wire
    fn suppress_stream(&self) -> bool {
        false
    }
}

/// Fields of view described by one raw capture header
pub const RAW_HEADER_FOVS: usize = 4;

// Per-FOV flag byte
const RAW_ACTIVE: u8 = 1 << 0;
const RAW_FIRST: u8 = 1 << 1;
const RAW_COMPLETED: u8 = 1 << 2;

const OFF_FLAGS: usize = 0;
const OFF_COUNTS: usize = 4;
const OFF_FRAME_TAG: usize = 12;

/// Header embedded in the first 16 bytes of every raw capture
///
/// | Off | Len | Field |
/// |----:|----:|-------|
/// | 0 | 4 | flag byte per FOV 0..3 (bit0 active, bit1 first, bit2 completed) |
/// | 4 | 8 | capture count per FOV 0..3 (u16 BE) |
/// | 12 | 4 | frame tag (u32 BE) |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawCaptureHeader {
    pub flags: [u8; RAW_HEADER_FOVS],
    pub counts: [u16; RAW_HEADER_FOVS],
    pub frame_tag: u32,
}

impl RawCaptureHeader {
    pub const LEN: usize = 16;

    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::LEN {
            return None;
        }
        let mut header = Self {
            frame_tag: get_u32(buf, OFF_FRAME_TAG),
            ..Self::default()
        };
        for fov in 0..RAW_HEADER_FOVS {
            header.flags[fov] = buf[OFF_FLAGS + fov];
            header.counts[fov] = get_u16(buf, OFF_COUNTS + 2 * fov);
        }
        Some(header)
    }

    pub fn write(&self, buf: &mut [u8]) {
        for fov in 0..RAW_HEADER_FOVS {
            buf[OFF_FLAGS + fov] = self.flags[fov];
            put_u16(buf, OFF_COUNTS + 2 * fov, self.counts[fov]);
        }
        put_u32(buf, OFF_FRAME_TAG, self.frame_tag);
    }

    pub fn is_active(&self, fov: usize) -> bool {
        self.flags[fov] & RAW_ACTIVE != 0
    }

    pub fn is_first(&self, fov: usize) -> bool {
        self.flags[fov] & RAW_FIRST != 0
    }

    pub fn is_completed(&self, fov: usize) -> bool {
        self.flags[fov] & RAW_COMPLETED != 0
    }

    pub fn count(&self, fov: usize) -> u16 {
        self.counts[fov]
    }

    /// Set the flags of one FOV
    pub fn set(&mut self, fov: usize, active: bool, first: bool, completed: bool) {
        let mut flags = 0;
        if active {
            flags |= RAW_ACTIVE;
        }
        if first {
            flags |= RAW_FIRST;
        }
        if completed {
            flags |= RAW_COMPLETED;
        }
        self.flags[fov] = flags;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_header_layout() {
        let mut header = RawCaptureHeader {
            frame_tag: 0x0102_0304,
            ..Default::default()
        };
        header.set(0, true, true, false);
        header.set(2, true, false, true);
        header.counts[0] = 3;
        header.counts[3] = 0xABCD;

        let mut buf = [0u8; RawCaptureHeader::LEN];
        header.write(&mut buf);
        assert_eq!(&buf[..4], &[0b011, 0, 0b101, 0]);
        assert_eq!(&buf[4..6], &[0, 3]);
        assert_eq!(&buf[10..12], &[0xAB, 0xCD]);
        assert_eq!(&buf[12..16], &[1, 2, 3, 4]);

        let parsed = RawCaptureHeader::parse(&buf).unwrap();
        assert_eq!(parsed, header);
        assert!(parsed.is_first(0) && parsed.is_active(0));
        assert!(parsed.is_completed(2) && !parsed.is_first(2));
        assert!(RawCaptureHeader::parse(&buf[..15]).is_none());
    }
}
