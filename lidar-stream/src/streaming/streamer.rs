//! Network streamer: chunks in, wire packets out
//!
//! Runs as the [`ChunkHandler`] of a pipeline stage. Per chunk it:
//!
//! 1. Polls the transport for a new client (never blocks)
//! 2. Drops the chunk if nobody is listening
//! 3. Corks the socket, sends the calibration table if one is due, then one
//!    Type D packet per non-suppressed return (or the raw capture verbatim)
//! 4. Uncorks
//!
//! # Sequencing
//!
//! Every Type D packet that reaches a ready transport gets the next
//! sequence number. Numbers are only committed after a successful send, so a
//! receiver sees no gaps. Suppressed returns never consume one.
//!
//! # Scenes
//!
//! A scene groups the sequence numbers of one frame. The return flagged
//! `last_in_frame` closes the current scene; the next packet opens a new
//! one. The scene fields written into each packet are whatever is known at
//! that moment and are never corrected afterwards.
//!
//! # Calibration
//!
//! The theta/phi table is cached from the first return that carries all four
//! vectors and replaced when a return carries a different set. The whole
//! table is sent before the next Type D packet when a client connects (in
//! processed mode), when the cached set changes, or when a return carries
//! the one-shot resend flag.

use super::settings::{StreamerSettings, StreamerStats};
use super::{LockPolicy, Transport};
use crate::core::types::{ChunkHandle, ChunkPayload, OutputMode, ProcessedReturn, ReturnHandle};
use crate::core::PipelineContext;
use crate::error::{Error, Result};
use crate::pipeline::ChunkHandler;
use crate::protocol::calibration::{table_dims, CalibrationTable, TYPE_C_LEN};
use crate::protocol::header::{GlobalHeader, PacketType};
use crate::protocol::processed::{encode_processed, SceneFields, TYPE_D_LEN};
use std::sync::Arc;

/// Log every Nth chunk dropped for lack of a client
const DROP_LOG_INTERVAL: u64 = 500;

/// Advisory scene bookkeeping
#[derive(Debug, Default)]
struct SceneTracker {
    /// (begin, end) of the last closed scene
    previous: Option<(u32, u32)>,
    /// First sequence of the open scene
    current_begin: Option<u32>,
}

impl SceneTracker {
    /// Scene fields for a packet about to go out with `sequence`
    fn fields(&self, sequence: u32, closes_frame: bool) -> SceneFields {
        SceneFields {
            prev_begin: self.previous.map(|(begin, _)| begin),
            prev_end: self.previous.map(|(_, end)| end),
            cur_begin: Some(self.current_begin.unwrap_or(sequence)),
            cur_end: closes_frame.then_some(sequence),
        }
    }

    /// Record that `sequence` was actually sent
    fn commit(&mut self, sequence: u32, closes_frame: bool) {
        let begin = *self.current_begin.get_or_insert(sequence);
        if closes_frame {
            self.previous = Some((begin, sequence));
            self.current_begin = None;
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Protocol state machine on top of a [`Transport`]
pub struct NetworkStreamer<T: Transport> {
    name: String,
    transport: T,
    settings: Arc<StreamerSettings>,
    stats: Arc<StreamerStats>,
    sequence: u32,
    scene: SceneTracker,
    calibration: Option<CalibrationTable>,
    resend_pending: bool,
    frame_limit: Option<u64>,
    frames_closed: u64,
    packet: [u8; TYPE_D_LEN],
    calibration_packet: [u8; TYPE_C_LEN],
}

impl<T: Transport> NetworkStreamer<T> {
    pub fn new(
        name: impl Into<String>,
        transport: T,
        settings: Arc<StreamerSettings>,
        frame_limit: Option<u32>,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            settings,
            stats: Arc::new(StreamerStats::default()),
            sequence: 0,
            scene: SceneTracker::default(),
            calibration: None,
            resend_pending: false,
            frame_limit: frame_limit.map(u64::from),
            frames_closed: 0,
            packet: [0u8; TYPE_D_LEN],
            calibration_packet: [0u8; TYPE_C_LEN],
        }
    }

    pub fn settings(&self) -> Arc<StreamerSettings> {
        Arc::clone(&self.settings)
    }

    pub fn stats(&self) -> Arc<StreamerStats> {
        Arc::clone(&self.stats)
    }

    /// Sequence number the next Type D packet will carry
    pub fn next_sequence(&self) -> u32 {
        self.sequence
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn frame_limit_reached(&self) -> bool {
        self.frame_limit.is_some_and(|limit| self.frames_closed >= limit)
    }

    fn on_connect(&mut self, mode: OutputMode) {
        self.stats.connection_accepted();
        if self.transport.lock_policy() == LockPolicy::WhileConnected {
            self.settings.lock();
        }
        self.scene.reset();
        if mode == OutputMode::ProcessedData {
            self.resend_pending = true;
        }
    }

    fn on_disconnect(&mut self) {
        if self.transport.lock_policy() == LockPolicy::WhileConnected {
            self.settings.unlock();
        }
        let stats = self.stats.snapshot();
        log::info!(
            "Streamer {} back to listening ({} packets, {} calibration bursts, {} send errors)",
            self.name,
            stats.packets_sent,
            stats.calibration_bursts,
            stats.send_errors
        );
    }

    /// Classify a send result
    ///
    /// `Ok(true)` sent, `Ok(false)` failed but the connection stays up,
    /// `Err(Disconnected)` the client is gone.
    fn check_send(&mut self, result: Result<()>) -> Result<bool> {
        match result {
            Ok(()) => {
                if self.transport.lock_policy() == LockPolicy::AfterFirstPacket
                    && !self.settings.is_locked()
                {
                    self.settings.lock();
                    log::info!("Streamer {} settings locked after first packet", self.name);
                }
                Ok(true)
            }
            Err(Error::Disconnected) => Err(Error::Disconnected),
            Err(e) => {
                self.stats.send_failed();
                log::warn!("Streamer {} send failed: {}", self.name, e);
                Ok(false)
            }
        }
    }

    /// Cache the return's calibration set if it differs from the cached one
    ///
    /// Returns true when the cache changed.
    fn refresh_calibration(&mut self, ret: &ProcessedReturn) -> bool {
        if !ret.calibration.is_complete() {
            return false;
        }
        let dims = table_dims(ret.geometry.steer_extent, ret.geometry.stare_extent);
        if let Some(table) = &self.calibration {
            if table.is_same(&ret.calibration) && (table.width(), table.height()) == dims {
                return false;
            }
        }
        match CalibrationTable::from_refs(
            &ret.calibration,
            ret.geometry.steer_extent,
            ret.geometry.stare_extent,
        ) {
            Some(table) => {
                log::debug!(
                    "Streamer {} cached calibration table {}x{}",
                    self.name,
                    table.width(),
                    table.height()
                );
                self.calibration = Some(table);
                true
            }
            None => false,
        }
    }

    /// Send the whole cached table; stays pending if nothing is cached yet
    ///
    /// `Ok(false)` when a window failed to go out: the table stays pending
    /// and no Type D packet may follow until a later burst completes.
    fn send_calibration(&mut self, header: &GlobalHeader) -> Result<bool> {
        let Some(table) = self.calibration.clone() else {
            return Ok(true);
        };
        let windows = table.window_count();
        for index in 0..windows {
            table.encode_window(header, index, &mut self.calibration_packet);
            let result = self.transport.send_packet(&self.calibration_packet);
            if !self.check_send(result)? {
                log::debug!(
                    "Streamer {} calibration burst interrupted at window {}/{}",
                    self.name,
                    index,
                    windows
                );
                return Ok(false);
            }
        }
        self.resend_pending = false;
        self.stats.calibration_sent(windows as u64);
        log::debug!(
            "Streamer {} sent calibration table ({} windows)",
            self.name,
            windows
        );
        Ok(true)
    }

    fn stream_return(&mut self, ret: &mut ProcessedReturn, header: &GlobalHeader) -> Result<()> {
        if ret.suppress_stream {
            return Ok(());
        }
        if self.refresh_calibration(ret) {
            self.resend_pending = true;
        }
        if std::mem::take(&mut ret.resend_calibration) {
            self.resend_pending = true;
        }
        if self.frame_limit_reached() {
            return Ok(());
        }
        if self.resend_pending && !self.send_calibration(header)? {
            return Ok(());
        }

        let sequence = self.sequence;
        let closes_frame = ret.last_in_frame;
        let scene = self.scene.fields(sequence, closes_frame);
        let header = GlobalHeader { sequence, ..*header };
        encode_processed(&header, ret, &scene, &mut self.packet);

        let result = self.transport.send_packet(&self.packet);
        if !self.check_send(result)? {
            return Ok(());
        }
        log::trace!("Streamer {} sent sequence {}", self.name, sequence);

        self.sequence = sequence.wrapping_add(1);
        self.scene.commit(sequence, closes_frame);
        self.stats.packet_sent();
        if closes_frame {
            self.frames_closed += 1;
            if self.frame_limit_reached() {
                log::info!(
                    "Streamer {} reached frame limit ({} frames), transmission stopped",
                    self.name,
                    self.frames_closed
                );
            }
        }
        Ok(())
    }

    fn stream_returns(
        &mut self,
        handles: &[ReturnHandle],
        header: &GlobalHeader,
        ctx: &PipelineContext,
    ) -> Result<()> {
        for &handle in handles {
            ctx.pool()
                .with_return(handle, |ret| self.stream_return(ret, header))??;
        }
        Ok(())
    }

    fn stream_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let result = self.transport.send_packet(bytes);
        if self.check_send(result)? {
            self.stats.packet_sent();
        }
        Ok(())
    }
}

impl<T: Transport> ChunkHandler for NetworkStreamer<T> {
    fn handle_chunk(&mut self, chunk: ChunkHandle, ctx: &PipelineContext) -> Result<()> {
        if self.transport.poll_connection() {
            self.on_connect(ctx.output_mode());
        }

        let payload = ctx.pool().with_chunk(chunk, |unit| *unit.payload())?;

        if !self.transport.is_ready() {
            let dropped = self.stats.chunk_dropped();
            if dropped % DROP_LOG_INTERVAL == 1 {
                log::debug!(
                    "Streamer {} has no client, dropping chunks ({} so far)",
                    self.name,
                    dropped
                );
            }
            // Keep the calibration cache current for the next client
            if let ChunkPayload::Returns { handles, used } = payload {
                for &handle in &handles[..used] {
                    ctx.pool().with_return(handle, |ret| {
                        if !ret.suppress_stream {
                            self.refresh_calibration(ret);
                        }
                    })?;
                }
            }
            return Ok(());
        }

        let header = GlobalHeader {
            packet_type: PacketType::Processed,
            device_version: ctx.device_version(),
            sequence: 0,
            device_id: self.settings.device_id(),
        };

        self.transport.begin_burst();
        let result = match payload {
            ChunkPayload::Empty => Ok(()),
            ChunkPayload::Returns { handles, used } => {
                self.stream_returns(&handles[..used], &header, ctx)
            }
            ChunkPayload::Raw(handle) => ctx
                .pool()
                .with_raw(handle, |unit| self.stream_raw(unit.bytes()))
                .and_then(|sent| sent),
        };
        self.transport.end_burst();

        match result {
            Err(Error::Disconnected) => {
                self.on_disconnect();
                Ok(())
            }
            other => other,
        }
    }

    fn on_stop(&mut self, _ctx: &PipelineContext) {
        let stats = self.stats.snapshot();
        log::info!(
            "Streamer {} stopped: {} packets, {} calibration windows, {} chunks dropped, {} connections",
            self.name,
            stats.packets_sent,
            stats.calibration_packets,
            stats.chunks_dropped,
            stats.connections
        );
    }
}
