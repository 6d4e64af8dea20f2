//! UDP transport (experimental)
//!
//! Connectionless `send_to` toward a fixed target, broadcast by default.
//! Packets go out without the TCP frame header: one packet per datagram.
//! There is no client to detect, so the transport is always ready and the
//! streamer settings lock for good after the first packet.

use super::{LockPolicy, Transport};
use crate::error::{Error, Result};
use std::net::{SocketAddr, UdpSocket};

pub struct UdpTransport {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpTransport {
    pub fn bind(addr: SocketAddr, target: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).map_err(|source| Error::SocketSetup {
            addr: addr.to_string(),
            source,
        })?;
        if let Err(e) = socket.set_broadcast(true) {
            log::warn!("SO_BROADCAST failed on {}: {}", addr, e);
        }

        log::warn!(
            "UDP transport is experimental and unsupported: {} -> {}",
            addr,
            target
        );
        Ok(Self { socket, target })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl Transport for UdpTransport {
    fn poll_connection(&mut self) -> bool {
        false
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn lock_policy(&self) -> LockPolicy {
        LockPolicy::AfterFirstPacket
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.socket.send_to(packet, self.target)?;
        Ok(())
    }
}
