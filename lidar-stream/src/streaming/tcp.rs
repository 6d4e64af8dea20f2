//! TCP transport: single client, framed packets
//!
//! ```text
//! Listening ──accept──▶ Connected ──reset / broken pipe──▶ Listening
//!                           │
//!                           └──accept (new client)──▶ Connected (old one closed)
//! ```
//!
//! Acceptance is polled without blocking at the start of every send cycle, so
//! the streamer thread never waits for a client. Sends block; a slow peer is
//! the only flow control the pipeline has.

use super::socket_opts;
use super::{LockPolicy, Transport};
use crate::error::{Error, Result};
use crate::protocol::framing::{write_frame_header, FRAME_HEADER_LEN};
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};

#[derive(Debug)]
struct Client {
    stream: TcpStream,
    addr: SocketAddr,
}

/// Non-blocking listener with at most one attached client
#[derive(Debug)]
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
    client: Option<Client>,
    min_send_buffer: usize,
    corked: bool,
}

impl TcpTransport {
    /// Bind and listen on `addr`
    ///
    /// Failure here is fatal for the stream: it is reported as
    /// [`Error::SocketSetup`].
    pub fn bind(addr: SocketAddr, min_send_buffer: usize) -> Result<Self> {
        let setup = |source: io::Error| Error::SocketSetup {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).map_err(setup)?;
        listener.set_nonblocking(true).map_err(setup)?;
        let local_addr = listener.local_addr().map_err(setup)?;

        log::info!("TCP transport listening on {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
            client: None,
            min_send_buffer,
            corked: false,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.client.as_ref().map(|c| c.addr)
    }

    fn attach(&mut self, stream: TcpStream, addr: SocketAddr) -> bool {
        if let Err(e) = stream.set_nonblocking(false) {
            log::warn!("Failed to set blocking mode for client {}: {}", addr, e);
            return false;
        }
        socket_opts::configure_client(&stream, self.min_send_buffer);

        if let Some(old) = self.client.take() {
            log::info!("Client {} superseded by {}", old.addr, addr);
            let _ = old.stream.shutdown(Shutdown::Both);
        } else {
            log::info!("Client connected: {}", addr);
        }
        self.client = Some(Client { stream, addr });
        self.corked = false;
        true
    }

    fn detach(&mut self, reason: &io::Error) {
        if let Some(client) = self.client.take() {
            log::info!("Client {} disconnected: {}", client.addr, reason);
            let _ = client.stream.shutdown(Shutdown::Both);
        }
        self.corked = false;
    }

    fn write_framed(stream: &mut TcpStream, packet: &[u8]) -> io::Result<()> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        write_frame_header(&mut header, packet.len());
        stream.write_all(&header)?;
        stream.write_all(packet)
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}

impl Transport for TcpTransport {
    fn poll_connection(&mut self) -> bool {
        // Drain the accept queue; the most recent client wins
        let mut attached = false;
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => attached |= self.attach(stream, addr),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("Error accepting client connection: {}", e);
                    break;
                }
            }
        }
        attached
    }

    fn is_ready(&self) -> bool {
        self.client.is_some()
    }

    fn lock_policy(&self) -> LockPolicy {
        LockPolicy::WhileConnected
    }

    fn begin_burst(&mut self) {
        if let Some(client) = &self.client {
            match socket_opts::set_cork(&client.stream, true) {
                Ok(()) => self.corked = true,
                Err(e) => log::trace!("TCP_CORK on failed: {}", e),
            }
        }
    }

    fn end_burst(&mut self) {
        if !self.corked {
            return;
        }
        self.corked = false;
        if let Some(client) = &self.client {
            if let Err(e) = socket_opts::set_cork(&client.stream, false) {
                log::warn!("TCP_CORK off failed: {}", e);
            }
        }
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        let Some(client) = self.client.as_mut() else {
            return Err(Error::Disconnected);
        };
        match Self::write_framed(&mut client.stream, packet) {
            Ok(()) => Ok(()),
            Err(e) if is_disconnect(&e) => {
                self.detach(&e);
                Err(Error::Disconnected)
            }
            Err(e) => Err(Error::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::time::{Duration, Instant};

    fn bind_loopback() -> TcpTransport {
        TcpTransport::bind("127.0.0.1:0".parse().unwrap(), 0).unwrap()
    }

    fn poll_until_connected(transport: &mut TcpTransport) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if transport.poll_connection() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_not_ready_without_client() {
        let mut transport = bind_loopback();
        assert!(!transport.poll_connection());
        assert!(!transport.is_ready());
        assert!(matches!(transport.send_packet(&[1, 2, 3]), Err(Error::Disconnected)));
    }

    #[test]
    fn test_bind_conflict_is_setup_error() {
        let transport = bind_loopback();
        let err = TcpTransport::bind(transport.local_addr(), 0).unwrap_err();
        assert!(matches!(err, Error::SocketSetup { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_framed_send() {
        let mut transport = bind_loopback();
        let mut client = TcpStream::connect(transport.local_addr()).unwrap();
        assert!(poll_until_connected(&mut transport));

        transport.begin_burst();
        transport.send_packet(&[0xAA; 5]).unwrap();
        transport.end_burst();

        let mut buf = [0u8; FRAME_HEADER_LEN + 5];
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0, 5]);
        assert!(buf[4..16].iter().all(|&b| b == 0));
        assert_eq!(&buf[16..], &[0xAA; 5]);
    }

    #[test]
    fn test_new_client_supersedes_old() {
        let mut transport = bind_loopback();
        let mut first = TcpStream::connect(transport.local_addr()).unwrap();
        assert!(poll_until_connected(&mut transport));
        let first_addr = transport.peer_addr().unwrap();

        let _second = TcpStream::connect(transport.local_addr()).unwrap();
        assert!(poll_until_connected(&mut transport));
        assert_ne!(transport.peer_addr().unwrap(), first_addr);

        // Old client sees EOF
        first.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(first.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_peer_close_reverts_to_listening() {
        let mut transport = bind_loopback();
        let client = TcpStream::connect(transport.local_addr()).unwrap();
        assert!(poll_until_connected(&mut transport));
        drop(client);

        // The first writes after a close may still succeed; a reset follows
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut disconnected = false;
        while Instant::now() < deadline {
            match transport.send_packet(&[0u8; 706]) {
                Err(Error::Disconnected) => {
                    disconnected = true;
                    break;
                }
                _ => std::thread::sleep(Duration::from_millis(5)),
            }
        }
        assert!(disconnected);
        assert!(!transport.is_ready());
    }
}
