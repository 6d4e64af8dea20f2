//! Type C packet: one window of the calibration table (549 bytes)
//!
//! | Off | Len | Field |
//! |----:|----:|-------|
//! | 0 | 21 | global header (sequence = window index) |
//! | 21 | 4 | image end-U (table width) |
//! | 25 | 4 | image end-V (table height) |
//! | 29 | 2 | window start-U |
//! | 31 | 2 | window start-V |
//! | 33 | 4 | parameter type |
//! | 37 | 512 | 64 × (theta i32, phi i32) arc-seconds |
//!
//! For a W×H image the table is (2W−1)×(2H−1). It goes out row by row, each
//! row split into windows of 64 entries, zero-padded past the row end.

use super::header::{GlobalHeader, PacketType, GLOBAL_HEADER_LEN};
use super::{get_i32, get_u16, get_u32, put_i32, put_u16, put_u32};
use crate::core::types::CalibrationRefs;
use std::sync::Arc;

pub const TYPE_C_LEN: usize = 549;

/// Table entries per Type C packet
pub const ENTRIES_PER_WINDOW: usize = 64;

/// Parameter type: theta/phi angle table
pub const PARAM_THETA_PHI: u32 = 1;

const OFF_END_U: usize = 21;
const OFF_END_V: usize = 25;
const OFF_START_U: usize = 29;
const OFF_START_V: usize = 31;
const OFF_PARAM_TYPE: usize = 33;
const OFF_ENTRIES: usize = 37;
const ENTRY_LEN: usize = 8;

/// Largest table width or height whose window start fits the u16 start fields
pub const MAX_TABLE_DIM: u32 = u16::MAX as u32;

/// Degrees to whole arc-seconds
#[inline]
pub fn deg_to_arcsec(deg: f32) -> i32 {
    (deg as f64 * 3600.0).round() as i32
}

/// Table dimensions for a `steer_extent` × `stare_extent` image
pub fn table_dims(steer_extent: u16, stare_extent: u16) -> (u32, u32) {
    let dim = |extent: u16| (2 * extent as u32).saturating_sub(1);
    (dim(steer_extent), dim(stare_extent))
}

/// Cached theta/phi vectors together with the table shape they describe
///
/// Holds shared references only; the vectors themselves are never copied.
#[derive(Debug, Clone)]
pub struct CalibrationTable {
    width: u32,
    height: u32,
    theta: Arc<[f32]>,
    phi: Arc<[f32]>,
}

impl CalibrationTable {
    /// Build from a return's calibration set and image extents
    ///
    /// Returns `None` unless all four vectors are present and the table
    /// fits [`MAX_TABLE_DIM`] in both directions.
    pub fn from_refs(refs: &CalibrationRefs, steer_extent: u16, stare_extent: u16) -> Option<Self> {
        if !refs.is_complete() {
            return None;
        }
        let (width, height) = table_dims(steer_extent, stare_extent);
        if width > MAX_TABLE_DIM || height > MAX_TABLE_DIM {
            log::warn!(
                "Calibration table {}x{} exceeds the window start range, not cached",
                width,
                height
            );
            return None;
        }
        Some(Self {
            width,
            height,
            theta: Arc::clone(refs.theta.as_ref()?),
            phi: Arc::clone(refs.phi.as_ref()?),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// True if `refs` carries the very same vectors
    pub fn is_same(&self, refs: &CalibrationRefs) -> bool {
        matches!((&refs.theta, &refs.phi), (Some(t), Some(p))
            if Arc::ptr_eq(t, &self.theta) && Arc::ptr_eq(p, &self.phi))
    }

    fn windows_per_row(&self) -> usize {
        (self.width as usize).div_ceil(ENTRIES_PER_WINDOW)
    }

    /// Type C packets needed for the whole table
    pub fn window_count(&self) -> usize {
        self.windows_per_row() * self.height as usize
    }

    /// Serialize window `index` (raster order) into a Type C packet
    ///
    /// The header's sequence field is overwritten with the window index.
    pub fn encode_window(&self, header: &GlobalHeader, index: usize, buf: &mut [u8; TYPE_C_LEN]) {
        debug_assert!(index < self.window_count());
        let per_row = self.windows_per_row().max(1);
        let v = index / per_row;
        let start_u = (index % per_row) * ENTRIES_PER_WINDOW;

        let header = GlobalHeader {
            packet_type: PacketType::Calibration,
            sequence: index as u32,
            ..*header
        };
        header.write(&mut buf[..GLOBAL_HEADER_LEN]);

        put_u32(buf, OFF_END_U, self.width);
        put_u32(buf, OFF_END_V, self.height);
        put_u16(buf, OFF_START_U, start_u as u16);
        put_u16(buf, OFF_START_V, v as u16);
        put_u32(buf, OFF_PARAM_TYPE, PARAM_THETA_PHI);

        let row_start = v * self.width as usize;
        for slot in 0..ENTRIES_PER_WINDOW {
            let u = start_u + slot;
            let (theta, phi) = if u < self.width as usize {
                let i = row_start + u;
                (
                    self.theta.get(i).copied().map_or(0, deg_to_arcsec),
                    self.phi.get(i).copied().map_or(0, deg_to_arcsec),
                )
            } else {
                (0, 0)
            };
            let off = OFF_ENTRIES + slot * ENTRY_LEN;
            put_i32(buf, off, theta);
            put_i32(buf, off + 4, phi);
        }
    }
}

/// Read-only accessors over a received Type C packet
#[derive(Debug, Clone, Copy)]
pub struct CalibrationView<'a> {
    buf: &'a [u8],
    header: GlobalHeader,
}

impl<'a> CalibrationView<'a> {
    pub fn new(buf: &'a [u8]) -> Option<Self> {
        if buf.len() != TYPE_C_LEN {
            return None;
        }
        let header = GlobalHeader::parse(buf)?;
        match header.packet_type {
            PacketType::Calibration => Some(Self { buf, header }),
            PacketType::Processed => None,
        }
    }

    pub fn header(&self) -> &GlobalHeader {
        &self.header
    }

    /// Window index within the table burst
    pub fn window_index(&self) -> u32 {
        self.header.sequence
    }

    pub fn end_u(&self) -> u32 {
        get_u32(self.buf, OFF_END_U)
    }

    pub fn end_v(&self) -> u32 {
        get_u32(self.buf, OFF_END_V)
    }

    pub fn start_u(&self) -> u16 {
        get_u16(self.buf, OFF_START_U)
    }

    pub fn start_v(&self) -> u16 {
        get_u16(self.buf, OFF_START_V)
    }

    pub fn param_type(&self) -> u32 {
        get_u32(self.buf, OFF_PARAM_TYPE)
    }

    /// (theta, phi) in arc-seconds for window slot `slot` (0..64)
    pub fn entry(&self, slot: usize) -> (i32, i32) {
        let off = OFF_ENTRIES + slot * ENTRY_LEN;
        (get_i32(self.buf, off), get_i32(self.buf, off + 4))
    }
}
