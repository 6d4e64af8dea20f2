//! Shared setup: small pipeline config and a blocking test client

use lidar_stream::config::{AppConfig, MockConfig};
use lidar_stream::protocol::{FrameDecoder, FRAME_HEADER_LEN};
use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

/// Upper bound for anything a test waits on
pub const TIMEOUT: Duration = Duration::from_secs(5);

pub const DEVICE_ID: u32 = 0x42;

/// Loopback config with ephemeral ports and a 3 x 64 synthetic image
pub fn test_config(mode: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.device.output_mode = mode.to_string();
    config.device.device_id = DEVICE_ID;
    config.network.bind_address = "127.0.0.1".to_string();
    config.network.processed_base_port = 0;
    config.network.raw_base_port = 0;
    config.pipeline.buffer_size = 16;
    config.pipeline.chunk_pool = 32;
    config.pipeline.return_pool = 256;
    config.pipeline.raw_pool = 16;
    config.pipeline.raw_unit_size = 256;
    config.mock = MockConfig {
        steer_angles: 3,
        stare_extent: 64,
        dropout: 0.0,
        seed: 5,
        captures_per_frame: 3,
        capture_len: 128,
        ..MockConfig::default()
    };
    config
}

/// Poll `f` until it holds or [`TIMEOUT`] expires
pub fn wait_until(mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

/// TCP client reading framed packets
pub struct Client {
    stream: TcpStream,
    decoder: FrameDecoder,
    pending: Vec<u8>,
}

impl Client {
    pub fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        Self {
            stream,
            decoder: FrameDecoder::new(),
            pending: Vec::new(),
        }
    }

    /// Read until at least `count` packets arrived or [`TIMEOUT`] expires
    pub fn packets(&mut self, count: usize) -> Vec<Vec<u8>> {
        self.packets_within(count, TIMEOUT)
    }

    pub fn packets_within(&mut self, count: usize, timeout: Duration) -> Vec<Vec<u8>> {
        let mut packets = Vec::new();
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 4096];
        while packets.len() < count && Instant::now() < deadline {
            match self.read(&mut buf) {
                Some(0) => break,
                Some(n) => self
                    .decoder
                    .feed(&buf[..n], |packet| packets.push(packet.to_vec())),
                None => {}
            }
        }
        packets
    }

    /// Read length-prefixed raw captures
    pub fn raw_captures(&mut self, count: usize) -> Vec<Vec<u8>> {
        let mut captures = Vec::new();
        let deadline = Instant::now() + TIMEOUT;
        let mut buf = [0u8; 4096];
        while captures.len() < count && Instant::now() < deadline {
            match self.read(&mut buf) {
                Some(0) => break,
                Some(n) => self.pending.extend_from_slice(&buf[..n]),
                None => {}
            }
            while self.pending.len() >= FRAME_HEADER_LEN {
                let len = u32::from_be_bytes([
                    self.pending[0],
                    self.pending[1],
                    self.pending[2],
                    self.pending[3],
                ]) as usize;
                if self.pending.len() < FRAME_HEADER_LEN + len {
                    break;
                }
                captures.push(self.pending[FRAME_HEADER_LEN..FRAME_HEADER_LEN + len].to_vec());
                self.pending.drain(..FRAME_HEADER_LEN + len);
            }
        }
        captures
    }

    /// True once the streamer closed this connection
    pub fn wait_closed(&mut self) -> bool {
        let mut buf = [0u8; 4096];
        wait_until(|| matches!(self.read(&mut buf), Some(0)))
    }

    /// `None` on read timeout; errors count as a closed stream
    fn read(&mut self, buf: &mut [u8]) -> Option<usize> {
        match self.stream.read(buf) {
            Ok(n) => Some(n),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => None,
            Err(_) => Some(0),
        }
    }
}
