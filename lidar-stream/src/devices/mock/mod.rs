//! Synthetic sensor for running the streamer without hardware
//!
//! Renders a flat wall in front of the sensor, one field of view per call:
//!
//! | Output | Content |
//! |--------|---------|
//! | range | `wall / (cos(steer) * cos(stare))` + Gaussian noise, random dropouts as 0 |
//! | signal / SNR / background | Gaussian levels, signal falling off with range |
//! | ROI | one per steer column, timestamps spread across the frame period |
//! | calibration | half-pixel Theta/Phi grid over the field of view, created once |
//!
//! Raw mode produces frames of `captures_per_frame` captures, each starting
//! with a valid [`RawCaptureHeader`] followed by random payload bytes.

mod fov;
mod noise;

pub use fov::SyntheticFov;
pub use noise::SampleNoise;

use crate::adapters::RawCaptureHeader;
use crate::config::MockConfig;
use crate::core::types::{CalibrationRefs, Timestamp};
use crate::protocol::calibration::table_dims;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Distance to the rendered wall in range counts
const WALL_RANGE: f32 = 2000.0;
const RANGE_NOISE: f32 = 4.0;
/// Full field of view in degrees (steer, stare)
const FIELD_OF_VIEW_DEG: (f32, f32) = (60.0, 30.0);

/// Generates fields of view and raw frames for one head
pub struct SyntheticSource {
    head: u16,
    config: MockConfig,
    noise: SampleNoise,
    calibration: CalibrationRefs,
    calibration_announced: bool,
    frame: u32,
}

impl SyntheticSource {
    pub fn new(head: u16, config: &MockConfig) -> Self {
        // Distinct but reproducible stream per head
        let seed = match config.seed {
            0 => 0,
            seed => seed.wrapping_add(head as u64),
        };
        let calibration = build_calibration(config.steer_angles, config.stare_extent);
        log::info!(
            "Synthetic source for head {}: {}x{} @ {:.1} Hz",
            head,
            config.steer_angles,
            config.stare_extent,
            config.frame_rate_hz
        );

        Self {
            head,
            config: config.clone(),
            noise: SampleNoise::new(seed),
            calibration,
            calibration_announced: false,
            frame: 0,
        }
    }

    /// Time between frames
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.config.frame_rate_hz)
    }

    pub fn frames_generated(&self) -> u32 {
        self.frame
    }

    /// Render the next field of view
    pub fn next_fov(&mut self) -> SyntheticFov {
        let width = self.config.steer_angles;
        let height = self.config.stare_extent;
        let (w, h) = (width as usize, height as usize);
        let pixels = w * h;

        let mut fov = SyntheticFov {
            width,
            height,
            range: vec![0; pixels],
            signal: vec![0; pixels],
            snr: vec![0; pixels],
            background: vec![0; pixels],
            roi: vec![0; pixels],
            stamps: self.column_timestamps(w),
            calibration: self.calibration.clone(),
            user_tag: self.frame,
            sensor_id: self.head,
            new_calibration: !self.calibration_announced,
        };
        self.calibration_announced = true;

        for stare in 0..h {
            let phi = pixel_angle(stare, h, FIELD_OF_VIEW_DEG.1).to_radians();
            for steer in 0..w {
                let pixel = stare * w + steer;
                fov.roi[pixel] = steer as u16;
                fov.background[pixel] = self.noise.level(120.0, 15.0);

                if self.noise.chance(self.config.dropout) {
                    continue;
                }
                let theta = pixel_angle(steer, w, FIELD_OF_VIEW_DEG.0).to_radians();
                let truth = WALL_RANGE / (theta.cos() * phi.cos());
                let range = self.noise.range(truth, RANGE_NOISE);
                let signal = self.noise.level(4.0e6 / truth, 20.0);

                fov.range[pixel] = range;
                fov.signal[pixel] = signal;
                fov.snr[pixel] = signal / fov.background[pixel].max(1);
            }
        }

        self.frame = self.frame.wrapping_add(1);
        fov
    }

    /// Produce the captures of the next raw frame, in order
    pub fn next_raw_frame(&mut self) -> Vec<Vec<u8>> {
        let count = self.config.captures_per_frame.max(1);
        let len = self.config.capture_len.max(RawCaptureHeader::LEN);
        let tag = self.frame;

        let captures = (0..count)
            .map(|i| {
                let mut header = RawCaptureHeader {
                    frame_tag: tag,
                    ..RawCaptureHeader::default()
                };
                header.set(0, true, i == 0, i + 1 == count);
                header.counts[0] = count;

                let mut buf = vec![0u8; len];
                self.noise.fill_bytes(&mut buf[RawCaptureHeader::LEN..]);
                header.write(&mut buf);
                buf
            })
            .collect();

        self.frame = self.frame.wrapping_add(1);
        captures
    }

    /// One ROI per steer column, spread across the frame period
    fn column_timestamps(&self, columns: usize) -> Vec<Timestamp> {
        let start = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let step = self.frame_period() / columns.max(1) as u32;
        (0..columns)
            .map(|c| {
                let t = start + step * c as u32;
                Timestamp::new(t.as_secs(), t.subsec_nanos())
            })
            .collect()
    }
}

/// Angle in degrees of pixel `i` of `n`, centred on the boresight
fn pixel_angle(i: usize, n: usize, span_deg: f32) -> f32 {
    if n <= 1 {
        return 0.0;
    }
    -span_deg / 2.0 + span_deg * i as f32 / (n - 1) as f32
}

/// Half-pixel calibration grid for a `steer` x `stare` image
fn build_calibration(steer: u16, stare: u16) -> CalibrationRefs {
    let (width, height) = table_dims(steer, stare);
    let (width, height) = (width as usize, height as usize);

    let mut x = Vec::with_capacity(width * height);
    let mut y = Vec::with_capacity(width * height);
    let mut theta = Vec::with_capacity(width * height);
    let mut phi = Vec::with_capacity(width * height);
    for v in 0..height {
        for u in 0..width {
            x.push(u as f32 / 2.0);
            y.push(v as f32 / 2.0);
            theta.push(pixel_angle(u, width, FIELD_OF_VIEW_DEG.0));
            phi.push(pixel_angle(v, height, FIELD_OF_VIEW_DEG.1));
        }
    }

    CalibrationRefs {
        x: Some(Arc::from(x)),
        y: Some(Arc::from(y)),
        theta: Some(Arc::from(theta)),
        phi: Some(Arc::from(phi)),
    }
}
