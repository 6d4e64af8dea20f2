//! Type D packet: one processed return (706 bytes)
//!
//! | Off | Len | Field |
//! |----:|----:|-------|
//! | 0 | 21 | global header |
//! | 21 | 6 | timestamp seconds (u48) |
//! | 27 | 4 | timestamp nanoseconds |
//! | 31 | 1 | bits 7..4 timescale, bits 3..0 scene-field validity |
//! | 32 | 16 | previous begin/end, current begin/end scene sequence |
//! | 48 | 18 | geometry (extents, partial extents, offsets, steps, user tag) |
//! | 66 | 640 | 64 channel records × 10 bytes |

use super::header::{GlobalHeader, PacketType, GLOBAL_HEADER_LEN};
use super::{get_u16, get_u32, get_u48, put_u16, put_u32, put_u48};
use crate::core::types::{Channel, Geometry, ProcessedReturn, Timescale, Timestamp, CHANNELS_PER_RETURN};

pub const TYPE_D_LEN: usize = 706;

const OFF_SECONDS: usize = 21;
const OFF_NANOS: usize = 27;
const OFF_TIME_FLAGS: usize = 31;
const OFF_PREV_BEGIN: usize = 32;
const OFF_PREV_END: usize = 36;
const OFF_CUR_BEGIN: usize = 40;
const OFF_CUR_END: usize = 44;
const OFF_STEER_EXTENT: usize = 48;
const OFF_STARE_EXTENT: usize = 50;
const OFF_PARTIAL_STEER: usize = 52;
const OFF_PARTIAL_STARE: usize = 53;
const OFF_STEER_OFFSET: usize = 54;
const OFF_STARE_OFFSET: usize = 56;
const OFF_STEER_STEP: usize = 58;
const OFF_STARE_STEP: usize = 60;
const OFF_USER_TAG: usize = 62;
const OFF_CHANNELS: usize = 66;

pub const CHANNEL_RECORD_LEN: usize = 10;

// Scene-field validity bits (byte 31, low nibble)
const SCENE_PREV_BEGIN: u8 = 1 << 0;
const SCENE_PREV_END: u8 = 1 << 1;
const SCENE_CUR_BEGIN: u8 = 1 << 2;
const SCENE_CUR_END: u8 = 1 << 3;

// Channel flag byte (record offset 9)
const CH_INTENSITY_VALID: u8 = 1 << 7;
const CH_RANGE_VALID: u8 = 1 << 6;
const CH_BACKGROUND_VALID: u8 = 1 << 5;
const CH_SNR_VALID: u8 = 1 << 4;
const CH_ANNOTATION_TYPE_MASK: u8 = 0x0F;

/// Advisory scene-boundary sequence numbers carried by a Type D packet
///
/// `None` fields go out as zero with their validity bit clear.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SceneFields {
    pub prev_begin: Option<u32>,
    pub prev_end: Option<u32>,
    pub cur_begin: Option<u32>,
    pub cur_end: Option<u32>,
}

impl SceneFields {
    fn validity_bits(&self) -> u8 {
        let mut bits = 0;
        if self.prev_begin.is_some() {
            bits |= SCENE_PREV_BEGIN;
        }
        if self.prev_end.is_some() {
            bits |= SCENE_PREV_END;
        }
        if self.cur_begin.is_some() {
            bits |= SCENE_CUR_BEGIN;
        }
        if self.cur_end.is_some() {
            bits |= SCENE_CUR_END;
        }
        bits
    }
}

/// Pack a channel's validity flags and annotation type into its flag byte
#[inline]
pub fn channel_flags(channel: &Channel) -> u8 {
    let mut flags = channel.annotation_type & CH_ANNOTATION_TYPE_MASK;
    if channel.intensity_valid {
        flags |= CH_INTENSITY_VALID;
    }
    if channel.range_valid {
        flags |= CH_RANGE_VALID;
    }
    if channel.background_valid {
        flags |= CH_BACKGROUND_VALID;
    }
    if channel.snr_valid {
        flags |= CH_SNR_VALID;
    }
    flags
}

/// Serialize one processed return into a Type D packet
pub fn encode_processed(
    header: &GlobalHeader,
    ret: &ProcessedReturn,
    scene: &SceneFields,
    buf: &mut [u8; TYPE_D_LEN],
) {
    debug_assert_eq!(header.packet_type, PacketType::Processed);
    header.write(&mut buf[..GLOBAL_HEADER_LEN]);

    put_u48(buf, OFF_SECONDS, ret.timestamp.seconds);
    put_u32(buf, OFF_NANOS, ret.timestamp.nanos);
    buf[OFF_TIME_FLAGS] = ((ret.timescale as u8) << 4) | scene.validity_bits();
    put_u32(buf, OFF_PREV_BEGIN, scene.prev_begin.unwrap_or(0));
    put_u32(buf, OFF_PREV_END, scene.prev_end.unwrap_or(0));
    put_u32(buf, OFF_CUR_BEGIN, scene.cur_begin.unwrap_or(0));
    put_u32(buf, OFF_CUR_END, scene.cur_end.unwrap_or(0));

    let geo = &ret.geometry;
    put_u16(buf, OFF_STEER_EXTENT, geo.steer_extent);
    put_u16(buf, OFF_STARE_EXTENT, geo.stare_extent);
    buf[OFF_PARTIAL_STEER] = geo.partial_steer_extent;
    buf[OFF_PARTIAL_STARE] = geo.partial_stare_extent;
    put_u16(buf, OFF_STEER_OFFSET, geo.steer_offset);
    put_u16(buf, OFF_STARE_OFFSET, geo.stare_offset);
    put_u16(buf, OFF_STEER_STEP, geo.steer_step);
    put_u16(buf, OFF_STARE_STEP, geo.stare_step);
    put_u32(buf, OFF_USER_TAG, geo.user_tag);

    for (i, ch) in ret.channels.iter().enumerate() {
        let off = OFF_CHANNELS + i * CHANNEL_RECORD_LEN;
        put_u16(buf, off, ch.intensity);
        put_u16(buf, off + 2, ch.range);
        put_u16(buf, off + 4, ch.background);
        put_u16(buf, off + 6, ch.snr);
        buf[off + 8] = ch.annotation;
        buf[off + 9] = channel_flags(ch);
    }
}

/// Read-only accessors over a received Type D packet
#[derive(Debug, Clone, Copy)]
pub struct TypeDView<'a> {
    buf: &'a [u8],
    header: GlobalHeader,
}

impl<'a> TypeDView<'a> {
    /// Validate length, magic and packet type
    pub fn new(buf: &'a [u8]) -> Option<Self> {
        if buf.len() != TYPE_D_LEN {
            return None;
        }
        let header = GlobalHeader::parse(buf)?;
        match header.packet_type {
            PacketType::Processed => Some(Self { buf, header }),
            PacketType::Calibration => None,
        }
    }

    pub fn header(&self) -> &GlobalHeader {
        &self.header
    }

    pub fn sequence(&self) -> u32 {
        self.header.sequence
    }

    pub fn timestamp(&self) -> Timestamp {
        Timestamp::new(get_u48(self.buf, OFF_SECONDS), get_u32(self.buf, OFF_NANOS))
    }

    pub fn timescale(&self) -> Timescale {
        Timescale::from_nibble(self.buf[OFF_TIME_FLAGS] >> 4)
    }

    pub fn scene(&self) -> SceneFields {
        let bits = self.buf[OFF_TIME_FLAGS] & 0x0F;
        let field = |bit: u8, off: usize| (bits & bit != 0).then(|| get_u32(self.buf, off));
        SceneFields {
            prev_begin: field(SCENE_PREV_BEGIN, OFF_PREV_BEGIN),
            prev_end: field(SCENE_PREV_END, OFF_PREV_END),
            cur_begin: field(SCENE_CUR_BEGIN, OFF_CUR_BEGIN),
            cur_end: field(SCENE_CUR_END, OFF_CUR_END),
        }
    }

    pub fn geometry(&self) -> Geometry {
        Geometry {
            steer_extent: get_u16(self.buf, OFF_STEER_EXTENT),
            stare_extent: get_u16(self.buf, OFF_STARE_EXTENT),
            partial_steer_extent: self.buf[OFF_PARTIAL_STEER],
            partial_stare_extent: self.buf[OFF_PARTIAL_STARE],
            steer_offset: get_u16(self.buf, OFF_STEER_OFFSET),
            stare_offset: get_u16(self.buf, OFF_STARE_OFFSET),
            steer_step: get_u16(self.buf, OFF_STEER_STEP),
            stare_step: get_u16(self.buf, OFF_STARE_STEP),
            user_tag: get_u32(self.buf, OFF_USER_TAG),
        }
    }

    /// Decode channel `index` (0..64)
    pub fn channel(&self, index: usize) -> Channel {
        debug_assert!(index < CHANNELS_PER_RETURN);
        let off = OFF_CHANNELS + index * CHANNEL_RECORD_LEN;
        let flags = self.buf[off + 9];
        Channel {
            intensity: get_u16(self.buf, off),
            range: get_u16(self.buf, off + 2),
            background: get_u16(self.buf, off + 4),
            snr: get_u16(self.buf, off + 6),
            annotation: self.buf[off + 8],
            annotation_type: flags & CH_ANNOTATION_TYPE_MASK,
            intensity_valid: flags & CH_INTENSITY_VALID != 0,
            range_valid: flags & CH_RANGE_VALID != 0,
            background_valid: flags & CH_BACKGROUND_VALID != 0,
            snr_valid: flags & CH_SNR_VALID != 0,
        }
    }
}
