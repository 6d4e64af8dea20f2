//! RawData adapter: forwards unmodified captures of one frame at a time
//!
//! A gate keeps frames from interleaving on the wire:
//!
//! ```text
//!            first marker (count > 0)
//!   Idle  ------------------------------>  Transmitting { tag, expected, received }
//!    ^                                              |
//!    |  received == expected and every unit of     |
//!    +--  the frame is back in the pool  <----------+
//! ```
//!
//! Only field of view 0 is streamed. Captures that arrive while the gate is
//! closed are rejected before any pool entity is claimed.

use super::upstream::RawCaptureHeader;
use crate::core::types::{ChunkHandle, RawHandle};
use crate::core::PipelineContext;
use crate::error::Result;
use crate::pipeline::ChunkSink;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// The streamed field of view
const STREAMED_FOV: usize = 0;

/// Frame gate state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    Transmitting {
        frame_tag: u32,
        expected: u16,
        received: u16,
    },
}

/// What happened to one capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawOutcome {
    /// Handed to the next stage
    Forwarded,
    /// Field of view 0 not active in this capture
    Ignored,
    /// Gate closed: competing first marker, capture outside a frame, or a
    /// capture beyond the announced count
    Rejected,
    /// Too short, too long, or a first marker announcing zero captures
    Malformed,
    /// Counted for the frame but dropped for lack of a work unit
    Dropped,
}

/// Raw capture gate and forwarder
pub struct RawDataAdapter {
    ctx: PipelineContext,
    state: GateState,
    /// Units of the current frame not yet back in the pool
    outstanding: Arc<AtomicUsize>,
    frames: u64,
    rejected: u64,
}

impl RawDataAdapter {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx,
            state: GateState::Idle,
            outstanding: Arc::new(AtomicUsize::new(0)),
            frames: 0,
            rejected: 0,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// Frames admitted through the gate so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Units of the current frame still owned by the pipeline
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Gate one capture and forward it to `sink` if admitted
    ///
    /// Errors are pool exhaustion or ring overflow, both fatal.
    pub fn process_capture(&mut self, capture: &[u8], sink: &dyn ChunkSink) -> Result<RawOutcome> {
        self.try_reopen();

        let unit_size = self.ctx.pool().raw_unit_size();
        if capture.len() < RawCaptureHeader::LEN || capture.len() > unit_size {
            log::warn!(
                "Raw capture of {} bytes outside {}..={}, dropped",
                capture.len(),
                RawCaptureHeader::LEN,
                unit_size
            );
            return Ok(RawOutcome::Malformed);
        }
        let Some(header) = RawCaptureHeader::parse(capture) else {
            return Ok(RawOutcome::Malformed);
        };

        if !header.is_active(STREAMED_FOV) {
            return Ok(RawOutcome::Ignored);
        }

        match self.admit(&header) {
            Some(RawOutcome::Rejected) => {
                self.rejected += 1;
                return Ok(RawOutcome::Rejected);
            }
            Some(outcome) => return Ok(outcome),
            None => {}
        }

        // Counted before forwarding so a dropped capture cannot stall the gate
        if let GateState::Transmitting {
            expected, received, ..
        } = &mut self.state
        {
            *received += 1;
            if header.is_completed(STREAMED_FOV) {
                *expected = *received;
            }
        }

        let Some(chunk) = self.ctx.pool().get_return_chunk() else {
            return Ok(RawOutcome::Dropped);
        };
        self.forward(chunk, capture, sink)?;
        Ok(RawOutcome::Forwarded)
    }

    /// Apply the gate; `None` means the capture is admitted
    fn admit(&mut self, header: &RawCaptureHeader) -> Option<RawOutcome> {
        let first = header.is_first(STREAMED_FOV);
        match self.state {
            GateState::Idle if first => {
                let expected = header.count(STREAMED_FOV);
                if expected == 0 {
                    log::warn!(
                        "Frame {:#x} announces zero captures, dropped",
                        header.frame_tag
                    );
                    return Some(RawOutcome::Malformed);
                }
                self.state = GateState::Transmitting {
                    frame_tag: header.frame_tag,
                    expected,
                    received: 0,
                };
                self.frames += 1;
                log::debug!("Frame {:#x}: {} captures", header.frame_tag, expected);
                None
            }
            GateState::Idle => Some(RawOutcome::Rejected),
            GateState::Transmitting { frame_tag, .. } if first => {
                log::debug!(
                    "Frame {:#x} rejected, frame {:#x} still in flight",
                    header.frame_tag,
                    frame_tag
                );
                Some(RawOutcome::Rejected)
            }
            GateState::Transmitting {
                frame_tag,
                expected,
                received,
            } => {
                if header.frame_tag != frame_tag || received >= expected {
                    Some(RawOutcome::Rejected)
                } else {
                    None
                }
            }
        }
    }

    fn forward(&self, chunk: ChunkHandle, capture: &[u8], sink: &dyn ChunkSink) -> Result<()> {
        let pool = self.ctx.pool();
        let unit: RawHandle = match pool.get_raw_capture_unit() {
            Ok(unit) => unit,
            Err(e) => {
                self.discard(chunk);
                return Err(e);
            }
        };

        let filled = pool.with_raw(unit, |raw| {
            raw.fill(capture);
            self.outstanding.fetch_add(1, Ordering::AcqRel);
            raw.track_release(Arc::clone(&self.outstanding));
        });
        let attached = filled.and_then(|_| pool.with_chunk(chunk, |w| w.set_raw(unit)));
        if let Err(e) = attached {
            if let Err(e) = pool.dispose_raw(unit) {
                log::error!("Dispose of {:?} failed: {}", unit, e);
            }
            self.discard(chunk);
            return Err(e);
        }

        if let Err(e) = sink.hand_chunk_in(chunk) {
            self.discard(chunk);
            return Err(e);
        }
        Ok(())
    }

    /// Reopen the gate once the current frame is fully sent and released
    fn try_reopen(&mut self) {
        if let GateState::Transmitting {
            frame_tag,
            expected,
            received,
        } = self.state
        {
            if received >= expected && self.outstanding() == 0 {
                log::trace!("Frame {:#x} released", frame_tag);
                self.state = GateState::Idle;
            }
        }
    }

    fn discard(&self, chunk: ChunkHandle) {
        if let Err(e) = self.ctx.pool().dispose_chunk(chunk) {
            log::error!("Dispose of undelivered {:?} failed: {}", chunk, e);
        }
    }
}
