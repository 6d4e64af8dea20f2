//! ProcessedData adapter: one field of view in, 64-channel returns out
//!
//! The image is cut into returns of one steer column by up to 64 stare rows:
//!
//! ```text
//!            steer 0     steer 1          steer W-1
//!          +---------+---------+-- ... --+---------+
//! rows  0  | ret 0   | ret B   |         |         |
//!    ..63  |         |         |         |         |
//!          +---------+---------+         +---------+
//! rows 64  | ret 1   | ret B+1 |         |         |
//!   ..127  |         |         |         |         |
//!          +---------+---------+         +---------+
//!            ...                            last: closes the frame
//! ```
//!
//! with `B = ceil(H / 64)` blocks per column, emitted steer-major. Returns are
//! batched into work units of
//! [`RETURNS_PER_CHUNK`](crate::core::types::RETURNS_PER_CHUNK) and handed to the next
//! stage as soon as a unit is full, plus once more at the end of the field of
//! view for the remainder.

use super::upstream::FovResult;
use crate::core::types::{
    CalibrationRefs, ChunkHandle, Geometry, ProcessedReturn, Timestamp, CHANNELS_PER_RETURN,
};
use crate::core::PipelineContext;
use crate::error::Result;
use crate::pipeline::ChunkSink;

/// Counters kept across fields of view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterStats {
    pub fovs: u64,
    pub returns: u64,
    /// Returns dropped because no work unit was available
    pub returns_dropped: u64,
    /// Fields of view rejected for short per-pixel arrays
    pub fovs_rejected: u64,
}

/// Converts per-FOV depth results into processed returns
pub struct ProcessedDataAdapter {
    ctx: PipelineContext,
    /// Carried into returns without a single valid range sample
    last_timestamp: Timestamp,
    stats: AdapterStats,
}

impl ProcessedDataAdapter {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx,
            last_timestamp: Timestamp::default(),
            stats: AdapterStats::default(),
        }
    }

    pub fn stats(&self) -> AdapterStats {
        self.stats
    }

    /// Convert one field of view and hand the resulting work units to `sink`
    ///
    /// Returns the number of returns handed on. Running out of work units
    /// drops returns and is not an error; running out of returns or
    /// overflowing the next stage's ring is, and is fatal for the pipeline.
    pub fn process_fov(&mut self, fov: &dyn FovResult, sink: &dyn ChunkSink) -> Result<usize> {
        let (width, height) = fov.image_size();
        let (width, height) = (width as usize, height as usize);
        if width == 0 || height == 0 {
            return Ok(0);
        }

        let pixels = width * height;
        if !arrays_complete(fov, pixels) {
            self.stats.fovs_rejected += 1;
            log::warn!(
                "FOV {} ({}x{}): per-pixel arrays shorter than {} pixels, skipped",
                fov.sensor_id(),
                width,
                height,
                pixels
            );
            return Ok(0);
        }

        self.stats.fovs += 1;
        let blocks = height.div_ceil(CHANNELS_PER_RETURN);
        let total = width * blocks;
        let calibration = fov.calibration();
        let mut resend = fov.new_calibration();
        let mut chunk: Option<ChunkHandle> = None;
        let mut emitted = 0;

        for steer in 0..width {
            for block in 0..blocks {
                let closes_frame = steer * blocks + block == total - 1;

                let unit = match chunk {
                    Some(unit) => unit,
                    None => match self.ctx.pool().get_return_chunk() {
                        Some(unit) => {
                            chunk = Some(unit);
                            unit
                        }
                        None => {
                            self.stats.returns_dropped += 1;
                            continue;
                        }
                    },
                };

                let handle = match self.ctx.pool().get_processed_return() {
                    Ok(handle) => handle,
                    Err(e) => {
                        self.discard(unit);
                        return Err(e);
                    }
                };

                let timestamp = self.last_timestamp;
                let derived = self.ctx.pool().with_return(handle, |ret| {
                    fill_return(ret, fov, steer, block, &calibration, timestamp);
                    ret.last_in_frame = closes_frame;
                    ret.resend_calibration = std::mem::take(&mut resend);
                    ret.timestamp
                })?;
                self.last_timestamp = derived;

                let full = self.ctx.pool().with_chunk(unit, |w| {
                    w.push_return(handle);
                    w.is_full()
                })?;
                emitted += 1;

                if full {
                    chunk = None;
                    self.flush(unit, sink)?;
                }
            }
        }

        if let Some(unit) = chunk {
            self.flush(unit, sink)?;
        }

        self.stats.returns += emitted as u64;
        log::trace!(
            "FOV {}: {} returns in {} columns",
            fov.sensor_id(),
            emitted,
            width
        );
        Ok(emitted)
    }

    /// Mark the last return of the unit and pass the unit on
    fn flush(&self, unit: ChunkHandle, sink: &dyn ChunkSink) -> Result<()> {
        let pool = self.ctx.pool();
        let last = pool.with_chunk(unit, |w| w.returns().last().copied())?;
        if let Some(last) = last {
            pool.with_return(last, |ret| ret.last_in_buffer = true)?;
        }

        if let Err(e) = sink.hand_chunk_in(unit) {
            self.discard(unit);
            return Err(e);
        }
        Ok(())
    }

    fn discard(&self, unit: ChunkHandle) {
        if let Err(e) = self.ctx.pool().dispose_chunk(unit) {
            log::error!("Dispose of undelivered {:?} failed: {}", unit, e);
        }
    }
}

fn arrays_complete(fov: &dyn FovResult, pixels: usize) -> bool {
    fov.range().len() >= pixels
        && fov.signal().len() >= pixels
        && fov.snr().len() >= pixels
        && fov.background().len() >= pixels
        && fov.roi_indices().len() >= pixels
}

/// Populate one return from column `steer`, rows `block * 64 ..`
fn fill_return(
    ret: &mut ProcessedReturn,
    fov: &dyn FovResult,
    steer: usize,
    block: usize,
    calibration: &CalibrationRefs,
    previous: Timestamp,
) {
    let (width, height) = fov.image_size();
    let (step_steer, step_stare) = fov.image_step();
    let (left, top) = fov.top_left();
    let width = width as usize;
    let first_row = block * CHANNELS_PER_RETURN;
    let rows = (height as usize - first_row).min(CHANNELS_PER_RETURN);

    let range = fov.range();
    let signal = fov.signal();
    let snr = fov.snr();
    let background = fov.background();
    let roi = fov.roi_indices();

    let mut valid_rois = [0u16; CHANNELS_PER_RETURN];
    let mut valid = 0;

    for (c, channel) in ret.channels.iter_mut().take(rows).enumerate() {
        let pixel = (first_row + c) * width + steer;
        channel.range = range[pixel];
        channel.intensity = signal[pixel];
        channel.snr = snr[pixel];
        channel.background = background[pixel];
        channel.range_valid = range[pixel] != 0;
        channel.intensity_valid = true;
        channel.snr_valid = true;
        channel.background_valid = true;

        if channel.range_valid {
            valid_rois[valid] = roi[pixel];
            valid += 1;
        }
    }

    ret.timestamp = median_roi_timestamp(&mut valid_rois[..valid], fov.roi_timestamps())
        .unwrap_or(previous);
    ret.timescale = fov.timescale();
    ret.suppress_stream = fov.suppress_stream();
    ret.calibration = calibration.clone();
    ret.geometry = Geometry {
        steer_extent: width as u16,
        stare_extent: height,
        partial_steer_extent: 1,
        partial_stare_extent: rows as u8,
        steer_offset: left.wrapping_add((steer as u16).wrapping_mul(step_steer)),
        stare_offset: top.wrapping_add((first_row as u16).wrapping_mul(step_stare)),
        steer_step: step_steer,
        stare_step: step_stare,
        user_tag: fov.user_tag(),
    };
}

/// Timestamp of the median ROI among the valid channels
///
/// Picks the entry at position `n / 2` of the sorted ROI indices. `None` when
/// nothing is valid or the ROI is outside the timestamp table.
fn median_roi_timestamp(rois: &mut [u16], table: &[Timestamp]) -> Option<Timestamp> {
    if rois.is_empty() {
        return None;
    }
    rois.sort_unstable();
    let median = rois[rois.len() / 2] as usize;
    table.get(median).copied()
}
