//! lidar-stream - real-time lidar data streaming
//!
//! Moves per-pixel depth results (or unmodified sensor captures) from an
//! upstream processing pipeline to a single network client, using a fixed
//! big-endian packet layout over TCP or UDP.
//!
//! ```text
//! FovResult / raw bytes
//!        |
//!   [adapters]  ProcessedDataAdapter | RawDataAdapter
//!        |          work units from the MemoryPool
//!   [pipeline]  PipelineStage ring + worker thread
//!        |
//!  [streaming]  NetworkStreamer -> TcpTransport | UdpTransport
//!        |
//!    Type-D / Type-C packets, or raw captures
//! ```

pub mod adapters;
pub mod config;
pub mod core;
pub mod devices;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod protocol;
pub mod streaming;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
