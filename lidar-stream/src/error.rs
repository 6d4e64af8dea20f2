//! Error types for lidar-stream

use crate::core::types::EntityKind;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// lidar-stream error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// Configuration value out of range or inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// Socket could not be created, bound or put into listening state
    #[error("Socket setup failed on {addr}: {source}")]
    SocketSetup {
        /// Address the socket was being set up on
        addr: String,
        /// Underlying OS error
        source: std::io::Error,
    },

    /// Pool has no free entity of this kind
    #[error("{0} pool exhausted")]
    PoolExhausted(EntityKind),

    /// Handle refers to a slot that was already disposed and reused
    #[error("Stale {0} handle")]
    StaleHandle(EntityKind),

    /// Producer tried to enqueue into a full stage ring
    #[error("Stage ring overflow (capacity {capacity})")]
    BufferOverflow {
        /// Configured ring capacity
        capacity: usize,
    },

    /// Ring size outside the supported range
    #[error("Invalid stage buffer size: {0}")]
    InvalidBufferSize(usize),

    /// Operation requires a stopped stage
    #[error("Stage already running")]
    AlreadyRunning,

    /// Streamer configuration is locked while a client is attached
    #[error("Configuration locked while streaming")]
    ConfigLocked,

    /// Peer reset or closed the connection
    #[error("Client disconnected")]
    Disconnected,

    /// Output mode string not recognized
    #[error("Unsupported output mode: {0}")]
    UnsupportedOutputMode(String),

    /// Worker thread panicked
    #[error("Thread panic")]
    ThreadPanic,

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Structural failures that the embedding application should treat as
    /// a reason to tear the subsystem down rather than drop one unit of work.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::SocketSetup { .. }
                | Error::PoolExhausted(EntityKind::ProcessedReturn | EntityKind::RawCapture)
                | Error::BufferOverflow { .. }
                | Error::UnsupportedOutputMode(_)
        )
    }
}
