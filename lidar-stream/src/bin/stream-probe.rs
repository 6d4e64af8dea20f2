//! stream-probe - connects to a lidar-stream port and reports what arrives
//!
//! ```text
//! stream-probe [--raw] [--udp] <addr>
//!
//!   <addr>   TCP: address of the streamer (default 127.0.0.1:12566)
//!            UDP: local address to listen on
//!   --raw    expect raw captures instead of Type-D/Type-C packets
//!   --udp    receive unframed datagrams instead of a TCP stream
//! ```
//!
//! Prints one summary line per second: packet counts per type, sequence gaps,
//! frames closed and bytes skipped while resynchronizing.

use lidar_stream::error::{Error, Result};
use lidar_stream::protocol::{
    CalibrationView, FrameDecoder, GlobalHeader, PacketType, TypeDView, FRAME_HEADER_LEN,
};
use std::env;
use std::io::{ErrorKind, Read};
use std::net::{TcpStream, UdpSocket};
use std::time::{Duration, Instant};

const SUMMARY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct Summary {
    processed: u64,
    calibration: u64,
    raw: u64,
    raw_bytes: u64,
    gaps: u64,
    frames: u64,
    last_sequence: Option<u32>,
}

impl Summary {
    fn on_packet(&mut self, packet: &[u8]) {
        let Some(header) = GlobalHeader::parse(packet) else {
            log::warn!("Packet of {} bytes without a valid header", packet.len());
            return;
        };

        match header.packet_type {
            PacketType::Processed => {
                let Some(view) = TypeDView::new(packet) else {
                    return;
                };
                self.processed += 1;
                if let Some(last) = self.last_sequence {
                    let expected = last.wrapping_add(1);
                    if view.sequence() != expected {
                        self.gaps += 1;
                        log::warn!(
                            "Sequence gap: expected {}, got {}",
                            expected,
                            view.sequence()
                        );
                    }
                }
                self.last_sequence = Some(view.sequence());
                if view.scene().cur_end == Some(view.sequence()) {
                    self.frames += 1;
                }
            }
            PacketType::Calibration => {
                if let Some(view) = CalibrationView::new(packet) {
                    self.calibration += 1;
                    if view.window_index() == 0 {
                        log::info!(
                            "Calibration table {}x{} from device {:#x}",
                            view.end_u(),
                            view.end_v(),
                            view.header().device_id
                        );
                    }
                }
            }
        }
    }

    fn on_raw(&mut self, capture: &[u8]) {
        self.raw += 1;
        self.raw_bytes += capture.len() as u64;
    }

    fn report(&mut self, skipped: u64) {
        log::info!(
            "D {} | C {} | raw {} ({} B) | frames {} | gaps {} | skipped {} B",
            self.processed,
            self.calibration,
            self.raw,
            self.raw_bytes,
            self.frames,
            self.gaps,
            skipped
        );
        let last = self.last_sequence;
        *self = Summary {
            last_sequence: last,
            ..Summary::default()
        };
    }
}

struct Options {
    addr: String,
    raw: bool,
    udp: bool,
}

fn parse_args() -> Options {
    let mut options = Options {
        addr: "127.0.0.1:12566".to_string(),
        raw: false,
        udp: false,
    };
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--raw" => options.raw = true,
            "--udp" => options.udp = true,
            other => options.addr = other.to_string(),
        }
    }
    options
}

fn probe_tcp(options: &Options) -> Result<()> {
    let mut stream = TcpStream::connect(&options.addr)?;
    stream.set_read_timeout(Some(Duration::from_millis(200)))?;
    log::info!("Connected to {}", options.addr);

    let mut summary = Summary::default();
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut raw_frame: Vec<u8> = Vec::new();
    let mut last_report = Instant::now();

    loop {
        match stream.read(&mut buf) {
            Ok(0) => {
                log::info!("Streamer closed the connection");
                return Ok(());
            }
            Ok(n) if options.raw => {
                raw_frame.extend_from_slice(&buf[..n]);
                drain_raw(&mut raw_frame, &mut summary);
            }
            Ok(n) => decoder.feed(&buf[..n], |packet| summary.on_packet(packet)),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => return Err(Error::Io(e)),
        }

        if last_report.elapsed() >= SUMMARY_INTERVAL {
            summary.report(decoder.skipped_bytes());
            last_report = Instant::now();
        }
    }
}

/// Split length-prefixed raw captures off the front of `pending`
fn drain_raw(pending: &mut Vec<u8>, summary: &mut Summary) {
    let mut start = 0;
    while pending.len() - start >= FRAME_HEADER_LEN {
        let header = &pending[start..start + 4];
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let end = start + FRAME_HEADER_LEN + len;
        if pending.len() < end {
            break;
        }
        summary.on_raw(&pending[start + FRAME_HEADER_LEN..end]);
        start = end;
    }
    pending.drain(..start);
}

fn probe_udp(options: &Options) -> Result<()> {
    let socket = UdpSocket::bind(&options.addr)?;
    socket.set_read_timeout(Some(Duration::from_millis(200)))?;
    log::info!("Listening on {}", socket.local_addr()?);

    let mut summary = Summary::default();
    let mut buf = vec![0u8; 64 * 1024];
    let mut last_report = Instant::now();

    loop {
        match socket.recv_from(&mut buf) {
            Ok((n, _)) if options.raw => summary.on_raw(&buf[..n]),
            Ok((n, _)) => summary.on_packet(&buf[..n]),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => return Err(Error::Io(e)),
        }

        if last_report.elapsed() >= SUMMARY_INTERVAL {
            summary.report(0);
            last_report = Instant::now();
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = parse_args();
    if options.udp {
        probe_udp(&options)
    } else {
        probe_tcp(&options)
    }
}
