//! Network streaming: protocol state machine and transports
//!
//! One streamer stage per field-of-view stream, each on its own port:
//!
//! | Mode | Port | Packets |
//! |------|------|---------|
//! | processed | `processed_base_port + head` | Type D, Type C |
//! | raw | `raw_base_port + head` | raw captures, verbatim |

pub mod settings;
pub mod socket_opts;
pub mod streamer;
pub mod tcp;
pub mod udp;

pub use settings::{StatsSnapshot, StreamerSettings, StreamerStats};
pub use streamer::NetworkStreamer;
pub use tcp::TcpTransport;
pub use udp::UdpTransport;

use crate::config::{AppConfig, TransportKind};
use crate::core::types::ChunkHandle;
use crate::core::PipelineContext;
use crate::error::Result;
use crate::pipeline::{ChunkSink, PipelineStage};
use std::net::SocketAddr;
use std::sync::Arc;

/// When the streamer settings become immutable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPolicy {
    /// Locked from connect until disconnect
    WhileConnected,
    /// Locked for good once anything was sent
    AfterFirstPacket,
}

/// Byte pipe underneath a [`NetworkStreamer`]
pub trait Transport: Send + 'static {
    /// Check for a new client without blocking; true if one was attached
    fn poll_connection(&mut self) -> bool;

    /// True if a send would reach somebody
    fn is_ready(&self) -> bool;

    fn lock_policy(&self) -> LockPolicy;

    /// Start of a batch of related packets
    fn begin_burst(&mut self) {}

    /// End of the batch; flush whatever was held back
    fn end_burst(&mut self) {}

    /// Send one packet
    ///
    /// `Error::Disconnected` means the client is gone and the transport is
    /// back to waiting for one. Any other error leaves the connection up.
    fn send_packet(&mut self, packet: &[u8]) -> Result<()>;
}

/// A running streamer stage with its shared handles
pub struct StreamerStage {
    stage: PipelineStage,
    settings: Arc<StreamerSettings>,
    stats: Arc<StreamerStats>,
    local_addr: SocketAddr,
}

impl StreamerStage {
    /// Bind the transport for `head` and start the streamer thread
    pub fn start(ctx: &PipelineContext, config: &AppConfig, head: u16) -> Result<Self> {
        let mode = ctx.output_mode();
        let addr = config.network.stream_addr(mode, head)?;
        let name = format!("{}-{}", mode, head);
        let settings = Arc::new(StreamerSettings::new(config.device.device_id));
        let frame_limit = config.pipeline.frame_limit;

        let mut stage = PipelineStage::new(name.clone(), ctx.clone())?;
        stage.set_buffer_size(config.pipeline.buffer_size)?;

        let (local_addr, stats) = match config.network.transport {
            TransportKind::Tcp => {
                let transport = TcpTransport::bind(addr, config.network.min_send_buffer)?;
                let local_addr = transport.local_addr();
                let streamer = NetworkStreamer::new(name, transport, Arc::clone(&settings), frame_limit);
                let stats = streamer.stats();
                stage.start(streamer)?;
                (local_addr, stats)
            }
            TransportKind::Udp => {
                let target = config.network.udp_target_for(addr.port())?;
                let transport = UdpTransport::bind(SocketAddr::new(addr.ip(), 0), target)?;
                let local_addr = transport.local_addr()?;
                let streamer = NetworkStreamer::new(name, transport, Arc::clone(&settings), frame_limit);
                let stats = streamer.stats();
                stage.start(streamer)?;
                (local_addr, stats)
            }
        };

        Ok(Self {
            stage,
            settings,
            stats,
            local_addr,
        })
    }

    /// Address clients connect to (TCP) or packets are sent from (UDP)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn settings(&self) -> &Arc<StreamerSettings> {
        &self.settings
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn queued(&self) -> usize {
        self.stage.queued()
    }

    /// Drain queued chunks and join the streamer thread
    pub fn stop(&mut self) -> Result<()> {
        self.stage.stop()
    }
}

impl ChunkSink for StreamerStage {
    fn hand_chunk_in(&self, chunk: ChunkHandle) -> Result<()> {
        self.stage.hand_chunk_in(chunk)
    }
}
