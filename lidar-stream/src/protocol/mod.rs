//! Fixed-layout binary wire protocol
//!
//! ```text
//! TCP stream:
//! ┌──────────────────────────┬───────────────────────────────────────────┐
//! │ Frame header (16 bytes)  │ Packet (706 B Type D or 549 B Type C)     │
//! │ u32 BE length + 12 × 0   │ global header (21 B) + type body          │
//! └──────────────────────────┴───────────────────────────────────────────┘
//! ```
//!
//! UDP datagrams carry the packet alone, without the frame header.
//!
//! All multi-byte fields are big-endian. Sub-byte fields are read and
//! written through explicit accessor functions with documented bit
//! positions; nothing relies on in-memory struct layout.

pub mod calibration;
pub mod framing;
pub mod header;
pub mod processed;
pub mod ring_buffer;

pub use calibration::{CalibrationTable, CalibrationView, TYPE_C_LEN};
pub use framing::{FrameDecoder, FRAME_HEADER_LEN};
pub use header::{GlobalHeader, PacketType, GLOBAL_HEADER_LEN, MAGIC};
pub use processed::{SceneFields, TypeDView, TYPE_D_LEN};

// ============================================================================
// Big-endian field accessors
// ============================================================================

#[inline]
pub(crate) fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

#[inline]
pub(crate) fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

#[inline]
pub(crate) fn put_i32(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

/// Write the low 48 bits of `value`
#[inline]
pub(crate) fn put_u48(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 6].copy_from_slice(&value.to_be_bytes()[2..]);
}

#[inline]
pub(crate) fn get_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

#[inline]
pub(crate) fn get_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

#[inline]
pub(crate) fn get_i32(buf: &[u8], offset: usize) -> i32 {
    get_u32(buf, offset) as i32
}

#[inline]
pub(crate) fn get_u48(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes[2..].copy_from_slice(&buf[offset..offset + 6]);
    u64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u48_truncates_high_bits() {
        let mut buf = [0u8; 8];
        put_u48(&mut buf, 1, 0xFFFF_1234_5678_9ABC);
        assert_eq!(&buf[1..7], &[0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]);
        assert_eq!(get_u48(&buf, 1), 0x1234_5678_9ABC);
    }

    #[test]
    fn test_big_endian_order() {
        let mut buf = [0u8; 6];
        put_u16(&mut buf, 0, 0x0102);
        put_i32(&mut buf, 2, -2);
        assert_eq!(buf, [0x01, 0x02, 0xFF, 0xFF, 0xFF, 0xFE]);
        assert_eq!(get_i32(&buf, 2), -2);
    }
}
