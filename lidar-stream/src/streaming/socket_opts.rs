//! TCP socket options not exposed by `std::net`
//!
//! Linux only; other targets get no-ops so the crate still builds and runs
//! with default socket behavior.

use std::io;
use std::net::TcpStream;

/// Keepalive idle time before the first probe
pub const KEEPALIVE_IDLE_SECS: i32 = 1;
/// Interval between keepalive probes
pub const KEEPALIVE_INTERVAL_SECS: i32 = 11;
/// Unanswered probes before the connection is declared dead
pub const KEEPALIVE_PROBES: i32 = 3;
/// Maximum time transmitted data may stay unacknowledged
pub const USER_TIMEOUT_MS: i32 = 30_000;

#[cfg(target_os = "linux")]
mod imp {
    use std::io;
    use std::net::TcpStream;
    use std::os::fd::AsRawFd;

    fn set_int(stream: &TcpStream, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> io::Result<()> {
        let err = unsafe {
            libc::setsockopt(
                stream.as_raw_fd(),
                level,
                name,
                &value as *const _ as *const libc::c_void,
                std::mem::size_of_val(&value) as libc::socklen_t,
            )
        };
        if err != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(super) fn get_int(stream: &TcpStream, level: libc::c_int, name: libc::c_int) -> io::Result<libc::c_int> {
        let mut value: libc::c_int = 0;
        let mut len = std::mem::size_of_val(&value) as libc::socklen_t;
        let err = unsafe {
            libc::getsockopt(
                stream.as_raw_fd(),
                level,
                name,
                &mut value as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        if err != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(value)
    }

    pub fn set_cork(stream: &TcpStream, on: bool) -> io::Result<()> {
        set_int(stream, libc::IPPROTO_TCP, libc::TCP_CORK, on as libc::c_int)
    }

    pub fn set_keepalive(stream: &TcpStream, idle: i32, interval: i32, probes: i32) -> io::Result<()> {
        set_int(stream, libc::SOL_SOCKET, libc::SO_KEEPALIVE, 1)?;
        set_int(stream, libc::IPPROTO_TCP, libc::TCP_KEEPIDLE, idle)?;
        set_int(stream, libc::IPPROTO_TCP, libc::TCP_KEEPINTVL, interval)?;
        set_int(stream, libc::IPPROTO_TCP, libc::TCP_KEEPCNT, probes)
    }

    pub fn set_user_timeout(stream: &TcpStream, millis: i32) -> io::Result<()> {
        set_int(stream, libc::IPPROTO_TCP, libc::TCP_USER_TIMEOUT, millis)
    }

    pub fn send_buffer_size(stream: &TcpStream) -> io::Result<usize> {
        get_int(stream, libc::SOL_SOCKET, libc::SO_SNDBUF).map(|v| v.max(0) as usize)
    }

    pub fn set_send_buffer_size(stream: &TcpStream, size: usize) -> io::Result<()> {
        let size = size.min(libc::c_int::MAX as usize) as libc::c_int;
        set_int(stream, libc::SOL_SOCKET, libc::SO_SNDBUF, size)
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use std::io;
    use std::net::TcpStream;

    pub fn set_cork(_stream: &TcpStream, _on: bool) -> io::Result<()> {
        Ok(())
    }

    pub fn set_keepalive(_stream: &TcpStream, _idle: i32, _interval: i32, _probes: i32) -> io::Result<()> {
        Ok(())
    }

    pub fn set_user_timeout(_stream: &TcpStream, _millis: i32) -> io::Result<()> {
        Ok(())
    }

    pub fn send_buffer_size(_stream: &TcpStream) -> io::Result<usize> {
        Ok(usize::MAX)
    }

    pub fn set_send_buffer_size(_stream: &TcpStream, _size: usize) -> io::Result<()> {
        Ok(())
    }
}

/// Hold back partial segments until uncorked
pub fn set_cork(stream: &TcpStream, on: bool) -> io::Result<()> {
    imp::set_cork(stream, on)
}

/// Apply connection-health options to a freshly accepted client
///
/// Failures are logged and the connection is kept: it still works, only
/// with slower dead-peer detection or smaller buffers.
pub fn configure_client(stream: &TcpStream, min_send_buffer: usize) {
    if let Err(e) = stream.set_nodelay(true) {
        log::warn!("TCP_NODELAY failed: {}", e);
    }

    if min_send_buffer > 0 {
        match imp::send_buffer_size(stream) {
            Ok(current) if current >= min_send_buffer => {}
            Ok(current) => {
                if let Err(e) = imp::set_send_buffer_size(stream, min_send_buffer) {
                    log::warn!(
                        "SO_SNDBUF {} -> {} failed: {}",
                        current,
                        min_send_buffer,
                        e
                    );
                }
            }
            Err(e) => log::warn!("SO_SNDBUF query failed: {}", e),
        }
    }

    if let Err(e) = imp::set_keepalive(
        stream,
        KEEPALIVE_IDLE_SECS,
        KEEPALIVE_INTERVAL_SECS,
        KEEPALIVE_PROBES,
    ) {
        log::warn!("TCP keepalive setup failed: {}", e);
    }

    if let Err(e) = imp::set_user_timeout(stream, USER_TIMEOUT_MS) {
        log::warn!("TCP_USER_TIMEOUT failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_configure_loopback_client() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();

        configure_client(&server, 256 * 1024);
        assert!(server.nodelay().unwrap());
        #[cfg(target_os = "linux")]
        {
            let tcp = |name| imp::get_int(&server, libc::IPPROTO_TCP, name).unwrap();
            assert_eq!(imp::get_int(&server, libc::SOL_SOCKET, libc::SO_KEEPALIVE).unwrap(), 1);
            assert_eq!(tcp(libc::TCP_KEEPIDLE), KEEPALIVE_IDLE_SECS);
            assert_eq!(tcp(libc::TCP_KEEPINTVL), KEEPALIVE_INTERVAL_SECS);
            assert_eq!(tcp(libc::TCP_KEEPCNT), KEEPALIVE_PROBES);
            assert_eq!(tcp(libc::TCP_USER_TIMEOUT), USER_TIMEOUT_MS);
            assert_eq!((KEEPALIVE_IDLE_SECS, KEEPALIVE_INTERVAL_SECS, KEEPALIVE_PROBES), (1, 11, 3));
            assert_eq!(USER_TIMEOUT_MS, 30_000);
        }
        set_cork(&server, true).unwrap();
        set_cork(&server, false).unwrap();
        drop(client);
    }
}
