//! Configuration for lidar-stream
//!
//! Loaded from a TOML file. Every field has a default, so a partial file
//! (or none at all) is valid:
//!
//! ```toml
//! [device]
//! device_id = 1
//! heads = 2
//! output_mode = "processed"
//!
//! [network]
//! bind_address = "0.0.0.0"
//! transport = "tcp"
//!
//! [pipeline]
//! buffer_size = 32
//! ```

use crate::core::types::OutputMode;
use crate::error::{Error, Result};
use crate::pipeline::ring::{MAX_BUFFER_SIZE, MIN_BUFFER_SIZE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

/// Default config file location for the daemon
pub const DEFAULT_CONFIG_PATH: &str = "/etc/lidar-stream.toml";

/// Alias used by the binaries
pub type Config = AppConfig;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub network: NetworkConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
    pub mock: MockConfig,
}

/// Identity and stream layout of the device
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Stamped into every packet header (changeable while no client is attached)
    pub device_id: u32,
    /// Firmware/hardware version stamped into every packet header
    pub device_version: u32,
    /// Number of field-of-view streams, one port each
    pub heads: u16,
    /// "processed" or "raw"
    pub output_mode: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: 1,
            device_version: 0x0001_0000,
            heads: 1,
            output_mode: "processed".to_string(),
        }
    }
}

/// Transport used by every streamer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Tcp,
    /// Experimental broadcast transport
    Udp,
}

/// Socket configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Interface to listen on
    ///
    /// Examples:
    /// - `0.0.0.0` - all interfaces
    /// - `127.0.0.1` - localhost only
    pub bind_address: String,
    /// First processed-data port; head N listens on base + N (0 = ephemeral)
    pub processed_base_port: u16,
    /// First raw-capture port; head N listens on base + N (0 = ephemeral)
    pub raw_base_port: u16,
    pub transport: TransportKind,
    /// UDP destination; defaults to broadcast on the head's port
    pub udp_target: Option<String>,
    /// Minimum socket send buffer in bytes (0 keeps the OS default)
    pub min_send_buffer: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            processed_base_port: 12566,
            raw_base_port: 12345,
            transport: TransportKind::Tcp,
            udp_target: None,
            min_send_buffer: 0,
        }
    }
}

impl NetworkConfig {
    /// Listen address for head `head` in `mode`
    pub fn stream_addr(&self, mode: OutputMode, head: u16) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .bind_address
            .parse()
            .map_err(|_| Error::Config(format!("invalid bind_address '{}'", self.bind_address)))?;
        let base = match mode {
            OutputMode::ProcessedData => self.processed_base_port,
            OutputMode::RawData => self.raw_base_port,
        };
        let port = if base == 0 {
            0
        } else {
            base.checked_add(head)
                .ok_or_else(|| Error::Config(format!("port {} + head {} overflows", base, head)))?
        };
        Ok(SocketAddr::new(ip, port))
    }

    /// UDP destination for a stream whose nominal port is `port`
    pub fn udp_target_for(&self, port: u16) -> Result<SocketAddr> {
        match &self.udp_target {
            Some(target) => target
                .parse()
                .map_err(|_| Error::Config(format!("invalid udp_target '{}'", target))),
            None => Ok(SocketAddr::new(IpAddr::from([255, 255, 255, 255]), port)),
        }
    }
}

/// Pipeline sizing
///
/// Pools are sized once at startup and never grow. Returns and raw units
/// must cover the worst case in flight: everything queued in every
/// streamer ring plus one chunk being filled.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Ring slots per streamer stage (2..=100)
    pub buffer_size: usize,
    /// Work units shared by all streams
    pub chunk_pool: usize,
    /// Processed returns (processed mode)
    pub return_pool: usize,
    /// Raw capture units (raw mode)
    pub raw_pool: usize,
    /// Bytes per raw capture unit
    pub raw_unit_size: usize,
    /// Stop Type D transmission after this many frames (debug)
    pub frame_limit: Option<u32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_size: 32,
            chunk_pool: 128,
            return_pool: 2048,
            raw_pool: 64,
            raw_unit_size: 64 * 1024,
            frame_limit: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Synthetic source used by the daemon when no sensor is attached
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MockConfig {
    /// Steer positions per frame
    pub steer_angles: u16,
    /// Channels per steer position
    pub stare_extent: u16,
    pub frame_rate_hz: f32,
    /// Fraction of pixels with no return (range 0)
    pub dropout: f32,
    /// RNG seed (0 = from entropy)
    pub seed: u64,
    /// Raw mode: captures per frame
    pub captures_per_frame: u16,
    /// Raw mode: bytes per capture, header included
    pub capture_len: usize,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            steer_angles: 40,
            stare_extent: 160,
            frame_rate_hz: 10.0,
            dropout: 0.05,
            seed: 0,
            captures_per_frame: 4,
            capture_len: 4096,
        }
    }
}

impl AppConfig {
    /// Load configuration from TOML file
    ///
    /// # Example
    /// ```no_run
    /// use lidar_stream::config::AppConfig;
    ///
    /// let config = AppConfig::from_file("lidar-stream.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults if the file does not exist
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::warn!("Config {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn output_mode(&self) -> Result<OutputMode> {
        self.device.output_mode.parse()
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        self.output_mode()?;

        if self.device.heads == 0 {
            return Err(Error::Config("device.heads must be at least 1".into()));
        }
        let buffer = self.pipeline.buffer_size;
        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&buffer) {
            return Err(Error::Config(format!(
                "pipeline.buffer_size {} outside {}..={}",
                buffer, MIN_BUFFER_SIZE, MAX_BUFFER_SIZE
            )));
        }
        if self.pipeline.chunk_pool == 0 {
            return Err(Error::Config("pipeline.chunk_pool must be non-zero".into()));
        }
        match self.output_mode()? {
            OutputMode::ProcessedData if self.pipeline.return_pool == 0 => {
                return Err(Error::Config("pipeline.return_pool must be non-zero".into()));
            }
            OutputMode::RawData if self.pipeline.raw_pool == 0 || self.pipeline.raw_unit_size == 0 => {
                return Err(Error::Config(
                    "pipeline.raw_pool and raw_unit_size must be non-zero".into(),
                ));
            }
            OutputMode::RawData
                if self.mock.capture_len < 16 || self.mock.capture_len > self.pipeline.raw_unit_size =>
            {
                return Err(Error::Config(format!(
                    "mock.capture_len {} outside 16..={}",
                    self.mock.capture_len, self.pipeline.raw_unit_size
                )));
            }
            _ => {}
        }
        if !(self.mock.frame_rate_hz > 0.0) {
            return Err(Error::Config("mock.frame_rate_hz must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.mock.dropout) {
            return Err(Error::Config("mock.dropout must be within 0..=1".into()));
        }

        self.network.stream_addr(self.output_mode()?, self.device.heads - 1)?;
        Ok(())
    }
}
