//! Runtime settings and counters shared between a streamer and its owner

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
struct Inner {
    device_id: u32,
    locked: bool,
}

/// Streamer configuration that may change between connections
///
/// Locked while a TCP client is attached (so every packet of a session
/// carries the same device id) and permanently once a UDP streamer has sent
/// its first packet.
#[derive(Debug)]
pub struct StreamerSettings {
    inner: Mutex<Inner>,
}

impl StreamerSettings {
    pub fn new(device_id: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                device_id,
                locked: false,
            }),
        }
    }

    pub fn device_id(&self) -> u32 {
        self.inner.lock().device_id
    }

    /// Change the device id stamped into every packet header
    pub fn set_device_id(&self, device_id: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.locked {
            return Err(Error::ConfigLocked);
        }
        inner.device_id = device_id;
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.inner.lock().locked
    }

    pub(crate) fn lock(&self) {
        self.inner.lock().locked = true;
    }

    pub(crate) fn unlock(&self) {
        self.inner.lock().locked = false;
    }
}

/// Streamer counters, updated by the worker thread
#[derive(Debug, Default)]
pub struct StreamerStats {
    packets_sent: AtomicU64,
    calibration_packets: AtomicU64,
    calibration_bursts: AtomicU64,
    chunks_dropped: AtomicU64,
    connections: AtomicU64,
    send_errors: AtomicU64,
}

/// Point-in-time copy of [`StreamerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Type D packets (or raw captures) transmitted
    pub packets_sent: u64,
    /// Type C packets transmitted
    pub calibration_packets: u64,
    /// Complete calibration tables transmitted
    pub calibration_bursts: u64,
    /// Chunks disposed because no client was attached
    pub chunks_dropped: u64,
    /// Clients accepted
    pub connections: u64,
    /// Non-fatal send failures
    pub send_errors: u64,
}

impl StreamerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            calibration_packets: self.calibration_packets.load(Ordering::Relaxed),
            calibration_bursts: self.calibration_bursts.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn packet_sent(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn calibration_sent(&self, packets: u64) {
        self.calibration_packets.fetch_add(packets, Ordering::Relaxed);
        self.calibration_bursts.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the total drops so far
    pub(crate) fn chunk_dropped(&self) -> u64 {
        self.chunks_dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn connection_accepted(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn send_failed(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_locked_while_streaming() {
        let settings = StreamerSettings::new(7);
        settings.set_device_id(8).unwrap();
        assert_eq!(settings.device_id(), 8);

        settings.lock();
        assert!(matches!(settings.set_device_id(9), Err(Error::ConfigLocked)));
        assert_eq!(settings.device_id(), 8);

        settings.unlock();
        settings.set_device_id(9).unwrap();
        assert_eq!(settings.device_id(), 9);
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = StreamerStats::default();
        stats.packet_sent();
        stats.packet_sent();
        stats.calibration_sent(10);
        assert_eq!(stats.chunk_dropped(), 1);

        let snap = stats.snapshot();
        assert_eq!(snap.packets_sent, 2);
        assert_eq!(snap.calibration_packets, 10);
        assert_eq!(snap.calibration_bursts, 1);
        assert_eq!(snap.chunks_dropped, 1);
    }
}
