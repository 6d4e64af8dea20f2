//! Global header shared by every packet type
//!
//! | Off | Len | Field |
//! |----:|----:|-------|
//! | 0 | 4 | magic "LDSP" |
//! | 4 | 1 | bits 7..4 protocol version, bits 3..0 packet type |
//! | 5 | 4 | device version |
//! | 9 | 4 | sequence number |
//! | 13 | 4 | device id |
//! | 17 | 4 | reserved |

use super::{get_u32, put_u32};

pub const MAGIC: [u8; 4] = *b"LDSP";
pub const PROTOCOL_VERSION: u8 = 1;
pub const GLOBAL_HEADER_LEN: usize = 21;

const OFF_PACKING: usize = 4;
const OFF_DEVICE_VERSION: usize = 5;
const OFF_SEQUENCE: usize = 9;
const OFF_DEVICE_ID: usize = 13;
const OFF_RESERVED: usize = 17;

/// Packet type nibble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Type D: one processed return
    Processed,
    /// Type C: one window of the calibration table
    Calibration,
}

impl PacketType {
    pub fn nibble(self) -> u8 {
        match self {
            PacketType::Processed => 0xD,
            PacketType::Calibration => 0xC,
        }
    }

    pub fn from_nibble(value: u8) -> Option<Self> {
        match value & 0x0F {
            0xD => Some(PacketType::Processed),
            0xC => Some(PacketType::Calibration),
            _ => None,
        }
    }

    /// Fixed packet size on the wire
    pub fn packet_len(self) -> usize {
        match self {
            PacketType::Processed => super::TYPE_D_LEN,
            PacketType::Calibration => super::TYPE_C_LEN,
        }
    }
}

/// Pack version (bits 7..4) and type (bits 3..0) into one byte
#[inline]
pub fn packing_byte(version: u8, packet_type: PacketType) -> u8 {
    ((version & 0x0F) << 4) | packet_type.nibble()
}

#[inline]
pub fn packing_version(byte: u8) -> u8 {
    byte >> 4
}

#[inline]
pub fn packing_type(byte: u8) -> Option<PacketType> {
    PacketType::from_nibble(byte)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalHeader {
    pub packet_type: PacketType,
    pub device_version: u32,
    pub sequence: u32,
    pub device_id: u32,
}

impl GlobalHeader {
    /// Write the header into the first 21 bytes of `buf`
    pub fn write(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&MAGIC);
        buf[OFF_PACKING] = packing_byte(PROTOCOL_VERSION, self.packet_type);
        put_u32(buf, OFF_DEVICE_VERSION, self.device_version);
        put_u32(buf, OFF_SEQUENCE, self.sequence);
        put_u32(buf, OFF_DEVICE_ID, self.device_id);
        put_u32(buf, OFF_RESERVED, 0);
    }

    /// Parse and validate magic, version and type
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < GLOBAL_HEADER_LEN || buf[..4] != MAGIC {
            return None;
        }
        if packing_version(buf[OFF_PACKING]) != PROTOCOL_VERSION {
            return None;
        }
        Some(Self {
            packet_type: packing_type(buf[OFF_PACKING])?,
            device_version: get_u32(buf, OFF_DEVICE_VERSION),
            sequence: get_u32(buf, OFF_SEQUENCE),
            device_id: get_u32(buf, OFF_DEVICE_ID),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = GlobalHeader {
            packet_type: PacketType::Processed,
            device_version: 0x0102_0304,
            sequence: 7,
            device_id: 0xAABB_CCDD,
        };
        let mut buf = [0xEEu8; GLOBAL_HEADER_LEN];
        header.write(&mut buf);

        assert_eq!(&buf[0..4], b"LDSP");
        assert_eq!(buf[4], 0x1D);
        assert_eq!(&buf[5..9], &[1, 2, 3, 4]);
        assert_eq!(&buf[9..13], &[0, 0, 0, 7]);
        assert_eq!(&buf[13..17], &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(&buf[17..21], &[0, 0, 0, 0]);

        assert_eq!(GlobalHeader::parse(&buf), Some(header));
    }

    #[test]
    fn test_parse_rejects_foreign_bytes() {
        let mut buf = [0u8; GLOBAL_HEADER_LEN];
        GlobalHeader {
            packet_type: PacketType::Calibration,
            device_version: 0,
            sequence: 0,
            device_id: 0,
        }
        .write(&mut buf);
        assert_eq!(buf[4], 0x1C);

        let mut bad_type = buf;
        bad_type[4] = 0x1A;
        assert!(GlobalHeader::parse(&bad_type).is_none());

        let mut bad_version = buf;
        bad_version[4] = 0x2C;
        assert!(GlobalHeader::parse(&bad_version).is_none());

        assert!(GlobalHeader::parse(&buf[..20]).is_none());
    }
}
