//! Core data types shared by the pool, pipeline, protocol and adapters.
//!
//! Key types:
//! - [`ProcessedReturn`]: one 64-channel unit of range/intensity/SNR/background
//!   data, the payload of a Type-D packet
//! - [`RawCaptureUnit`]: one unmodified sensor capture buffer
//! - [`WorkUnit`]: the unit of transfer between pipeline stages, referencing
//!   pool-owned entities by handle
//!
//! All three are created once during pool warm-up and recycled for the life
//! of the process. `reset()` returns each to its pristine state without
//! releasing its storage.

use crate::error::Error;
use crate::pool::Handle;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Channels carried by one processed return (and one Type-D packet)
pub const CHANNELS_PER_RETURN: usize = 64;

/// Maximum processed returns referenced by one work unit
pub const RETURNS_PER_CHUNK: usize = 16;

/// Handle to a pool-owned processed return
pub type ReturnHandle = Handle<ProcessedReturn>;
/// Handle to a pool-owned raw capture unit
pub type RawHandle = Handle<RawCaptureUnit>;
/// Handle to a pool-owned work unit
pub type ChunkHandle = Handle<WorkUnit>;

/// The three entity kinds managed by the memory pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    ProcessedReturn,
    RawCapture,
    Chunk,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EntityKind::ProcessedReturn => write!(f, "processed return"),
            EntityKind::RawCapture => write!(f, "raw capture"),
            EntityKind::Chunk => write!(f, "work unit"),
        }
    }
}

/// Construction-time choice of what a pipeline streams
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// Per-pixel depth results as Type-D packets (plus Type-C calibration)
    #[default]
    ProcessedData,
    /// Unmodified sensor captures
    RawData,
}

impl FromStr for OutputMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processed" => Ok(OutputMode::ProcessedData),
            "raw" => Ok(OutputMode::RawData),
            other => Err(Error::UnsupportedOutputMode(other.to_string())),
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OutputMode::ProcessedData => write!(f, "processed"),
            OutputMode::RawData => write!(f, "raw"),
        }
    }
}

/// Time base of a return's timestamp (4-bit wire value)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Timescale {
    Tai = 0,
    Utc = 1,
    Gps = 2,
    #[default]
    Arb = 3,
}

impl Timescale {
    /// Decode the 4-bit wire value; unknown values map to arbitrary
    pub fn from_nibble(value: u8) -> Self {
        match value & 0x0F {
            0 => Timescale::Tai,
            1 => Timescale::Utc,
            2 => Timescale::Gps,
            _ => Timescale::Arb,
        }
    }
}

/// Split coarse/fine timestamp (48-bit seconds + 32-bit nanoseconds)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub seconds: u64,
    pub nanos: u32,
}

impl Timestamp {
    /// Largest seconds value representable on the wire
    pub const MAX_SECONDS: u64 = (1 << 48) - 1;

    pub const fn new(seconds: u64, nanos: u32) -> Self {
        Self { seconds, nanos }
    }
}

/// One channel of a processed return
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Channel {
    pub intensity: u16,
    pub range: u16,
    pub background: u16,
    pub snr: u16,
    pub annotation: u8,
    /// 4-bit annotation type
    pub annotation_type: u8,
    pub intensity_valid: bool,
    pub range_valid: bool,
    pub background_valid: bool,
    pub snr_valid: bool,
}

/// Image geometry carried with every return
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Geometry {
    /// Complete image extent in the steer direction
    pub steer_extent: u16,
    /// Complete image extent in the stare direction
    pub stare_extent: u16,
    /// Steer positions covered by this return
    pub partial_steer_extent: u8,
    /// Channels populated in this return
    pub partial_stare_extent: u8,
    pub steer_offset: u16,
    pub stare_offset: u16,
    pub steer_step: u16,
    pub stare_step: u16,
    pub user_tag: u32,
}

/// Shared calibration vectors attached to a return
///
/// The vectors are reference counted: the upstream source may swap in a new
/// set while returns holding the old one are still queued.
#[derive(Debug, Clone, Default)]
pub struct CalibrationRefs {
    pub x: Option<Arc<[f32]>>,
    pub y: Option<Arc<[f32]>>,
    pub theta: Option<Arc<[f32]>>,
    pub phi: Option<Arc<[f32]>>,
}

impl CalibrationRefs {
    /// True when all four vectors are present
    pub fn is_complete(&self) -> bool {
        self.x.is_some() && self.y.is_some() && self.theta.is_some() && self.phi.is_some()
    }

    pub fn clear(&mut self) {
        self.x = None;
        self.y = None;
        self.theta = None;
        self.phi = None;
    }
}

/// One 64-channel unit of processed lidar data plus metadata
#[derive(Debug, Clone)]
pub struct ProcessedReturn {
    pub channels: [Channel; CHANNELS_PER_RETURN],
    pub timestamp: Timestamp,
    pub timescale: Timescale,
    pub geometry: Geometry,
    /// Skip this return entirely on the wire
    pub suppress_stream: bool,
    /// Closes the current frame (scene)
    pub last_in_frame: bool,
    /// Last return referenced by its work unit
    pub last_in_buffer: bool,
    /// One-shot request to resend the full calibration table
    pub resend_calibration: bool,
    pub calibration: CalibrationRefs,
}

impl ProcessedReturn {
    pub fn new() -> Self {
        Self {
            channels: [Channel::default(); CHANNELS_PER_RETURN],
            timestamp: Timestamp::default(),
            timescale: Timescale::default(),
            geometry: Geometry::default(),
            suppress_stream: false,
            last_in_frame: false,
            last_in_buffer: false,
            resend_calibration: false,
            calibration: CalibrationRefs::default(),
        }
    }

    /// Restore the pristine state; drops calibration references
    pub fn reset(&mut self) {
        self.channels = [Channel::default(); CHANNELS_PER_RETURN];
        self.timestamp = Timestamp::default();
        self.timescale = Timescale::default();
        self.geometry = Geometry::default();
        self.suppress_stream = false;
        self.last_in_frame = false;
        self.last_in_buffer = false;
        self.resend_calibration = false;
        self.calibration.clear();
    }
}

impl Default for ProcessedReturn {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-size buffer holding one unmodified sensor capture
#[derive(Debug)]
pub struct RawCaptureUnit {
    data: Box<[u8]>,
    len: usize,
    /// Outstanding-capture counter owned by the raw adapter's frame gate
    release: Option<Arc<AtomicUsize>>,
}

impl RawCaptureUnit {
    /// Allocate a unit with a fixed capacity (pool warm-up only)
    pub fn with_capacity(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
            len: 0,
            release: None,
        }
    }

    /// Copy a capture into the buffer
    ///
    /// Returns false (leaving the unit empty) if the capture does not fit.
    pub fn fill(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.data.len() {
            return false;
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
        true
    }

    /// Valid captured bytes
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Attach a counter that is decremented when this unit returns to the pool
    pub fn track_release(&mut self, counter: Arc<AtomicUsize>) {
        self.release = Some(counter);
    }

    pub fn reset(&mut self) {
        self.len = 0;
        if let Some(counter) = self.release.take() {
            counter.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// What a work unit references
#[derive(Debug, Clone, Copy)]
pub enum ChunkPayload {
    Empty,
    Returns {
        handles: [ReturnHandle; RETURNS_PER_CHUNK],
        used: usize,
    },
    Raw(RawHandle),
}

/// Unit of transfer between pipeline stages
///
/// References either a batch of processed returns or exactly one raw
/// capture unit, never both. It owns nothing: the referenced entities
/// belong to the pool and are disposed with the work unit.
#[derive(Debug)]
pub struct WorkUnit {
    payload: ChunkPayload,
}

impl WorkUnit {
    pub const fn new() -> Self {
        Self {
            payload: ChunkPayload::Empty,
        }
    }

    #[inline]
    pub fn payload(&self) -> &ChunkPayload {
        &self.payload
    }

    /// Append a processed return
    ///
    /// Returns false if the unit is full or already carries a raw capture.
    pub fn push_return(&mut self, handle: ReturnHandle) -> bool {
        match &mut self.payload {
            ChunkPayload::Empty => {
                let mut handles = [Handle::dangling(); RETURNS_PER_CHUNK];
                handles[0] = handle;
                self.payload = ChunkPayload::Returns { handles, used: 1 };
                true
            }
            ChunkPayload::Returns { handles, used } if *used < RETURNS_PER_CHUNK => {
                handles[*used] = handle;
                *used += 1;
                true
            }
            _ => false,
        }
    }

    /// Attach the single raw capture unit
    ///
    /// Returns false if the unit already references anything.
    pub fn set_raw(&mut self, handle: RawHandle) -> bool {
        match self.payload {
            ChunkPayload::Empty => {
                self.payload = ChunkPayload::Raw(handle);
                true
            }
            _ => false,
        }
    }

    /// Referenced processed returns (empty for raw units)
    pub fn returns(&self) -> &[ReturnHandle] {
        match &self.payload {
            ChunkPayload::Returns { handles, used } => &handles[..*used],
            _ => &[],
        }
    }

    pub fn raw(&self) -> Option<RawHandle> {
        match self.payload {
            ChunkPayload::Raw(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self.payload, ChunkPayload::Returns { used, .. } if used == RETURNS_PER_CHUNK)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.payload, ChunkPayload::Empty)
    }

    /// Forget all references (the pool disposes them first)
    pub fn reset(&mut self) {
        self.payload = ChunkPayload::Empty;
    }
}

impl Default for WorkUnit {
    fn default() -> Self {
        Self::new()
    }
}
