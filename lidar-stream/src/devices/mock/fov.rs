//! Synthetic field-of-view result

use crate::adapters::FovResult;
use crate::core::types::{CalibrationRefs, Timescale, Timestamp};

/// One generated field of view, owned arrays behind [`FovResult`]
#[derive(Debug, Clone)]
pub struct SyntheticFov {
    pub(crate) width: u16,
    pub(crate) height: u16,
    pub(crate) range: Vec<u16>,
    pub(crate) signal: Vec<u16>,
    pub(crate) snr: Vec<u16>,
    pub(crate) background: Vec<u16>,
    pub(crate) roi: Vec<u16>,
    pub(crate) stamps: Vec<Timestamp>,
    pub(crate) calibration: CalibrationRefs,
    pub(crate) user_tag: u32,
    pub(crate) sensor_id: u16,
    pub(crate) new_calibration: bool,
}

impl SyntheticFov {
    /// Pixels with a return
    pub fn valid_pixels(&self) -> usize {
        self.range.iter().filter(|&&r| r != 0).count()
    }
}

impl FovResult for SyntheticFov {
    fn image_size(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    // Bins at half-pixel resolution, matching the calibration table grid
    fn image_step(&self) -> (u16, u16) {
        (2, 2)
    }

    fn top_left(&self) -> (u16, u16) {
        (0, 0)
    }

    fn range(&self) -> &[u16] {
        &self.range
    }

    fn signal(&self) -> &[u16] {
        &self.signal
    }

    fn snr(&self) -> &[u16] {
        &self.snr
    }

    fn background(&self) -> &[u16] {
        &self.background
    }

    fn roi_indices(&self) -> &[u16] {
        &self.roi
    }

    fn roi_timestamps(&self) -> &[Timestamp] {
        &self.stamps
    }

    fn calibration(&self) -> CalibrationRefs {
        self.calibration.clone()
    }

    fn user_tag(&self) -> u32 {
        self.user_tag
    }

    fn sensor_id(&self) -> u16 {
        self.sensor_id
    }

    fn new_calibration(&self) -> bool {
        self.new_calibration
    }

    fn timescale(&self) -> Timescale {
        Timescale::Utc
    }
}
