//! UDP transport
//!
//! Capture streams get an ephemeral local port connected to the remote
//! destination; playback streams bind the endpoint itself. Every socket
//! carries a read timeout so the pump loop never blocks indefinitely.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, ErrorKind};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use crate::constants::SOCKET_BUFFER_BYTES;
use crate::error::NetworkError;
use crate::network::endpoint::NetworkEndpoint;
use crate::streams::Direction;

/// Creates sockets for streams
pub trait NetworkTransport: Send + Sync {
    fn bind_or_connect(
        &self,
        endpoint: &NetworkEndpoint,
        direction: Direction,
    ) -> Result<Box<dyn DatagramSocket>, NetworkError>;
}

/// One stream's socket
pub trait DatagramSocket: Send {
    /// Send one datagram, returning the bytes sent
    fn send(&mut self, datagram: &[u8]) -> Result<usize, NetworkError>;

    /// Receive one datagram into `buf`, or `None` if nothing arrived in time
    fn receive(&mut self, buf: &mut [u8]) -> Result<Option<usize>, NetworkError>;

    fn close(&mut self);
}

/// socket2-backed transport
#[derive(Debug, Clone)]
pub struct UdpTransport {
    io_timeout: Duration,
    max_datagram_size: usize,
}

impl UdpTransport {
    pub fn new(io_timeout: Duration, max_datagram_size: usize) -> Self {
        Self {
            io_timeout,
            max_datagram_size,
        }
    }

    fn open(&self, addr: SocketAddr, direction: Direction) -> io::Result<UdpSocket> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;

        match direction {
            Direction::CaptureToNetwork => {
                let local: SocketAddr = if addr.is_ipv4() {
                    (Ipv4Addr::UNSPECIFIED, 0).into()
                } else {
                    (Ipv6Addr::UNSPECIFIED, 0).into()
                };
                socket.bind(&SockAddr::from(local))?;
                socket.connect(&SockAddr::from(addr))?;
            }
            Direction::NetworkToPlayback => {
                socket.bind(&SockAddr::from(addr))?;
            }
        }

        socket.set_read_timeout(Some(self.io_timeout))?;
        socket.set_write_timeout(Some(self.io_timeout))?;

        // Larger kernel buffers ride out scheduling hiccups
        let _ = socket.set_recv_buffer_size(SOCKET_BUFFER_BYTES);
        let _ = socket.set_send_buffer_size(SOCKET_BUFFER_BYTES);

        Ok(socket.into())
    }
}

impl NetworkTransport for UdpTransport {
    fn bind_or_connect(
        &self,
        endpoint: &NetworkEndpoint,
        direction: Direction,
    ) -> Result<Box<dyn DatagramSocket>, NetworkError> {
        let addr = endpoint.resolve()?;
        let socket = self.open(addr, direction).map_err(|e| match direction {
            Direction::CaptureToNetwork => NetworkError::ConnectionFailed(format!("{}: {}", endpoint, e)),
            Direction::NetworkToPlayback => NetworkError::BindFailed(format!("{}: {}", endpoint, e)),
        })?;

        tracing::debug!(
            "UDP socket for {} ready (local {:?})",
            endpoint,
            socket.local_addr().ok()
        );

        Ok(Box::new(UdpDatagramSocket {
            socket: Some(socket),
            max_datagram_size: self.max_datagram_size,
        }))
    }
}

pub struct UdpDatagramSocket {
    socket: Option<UdpSocket>,
    max_datagram_size: usize,
}

impl UdpDatagramSocket {
    fn socket(&self) -> Result<&UdpSocket, NetworkError> {
        self.socket
            .as_ref()
            .ok_or_else(|| NetworkError::SocketUnusable("socket closed".to_string()))
    }
}

/// A single lost datagram is not worth tearing a stream down for
fn is_transient(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
            | ErrorKind::OutOfMemory
    )
}

impl DatagramSocket for UdpDatagramSocket {
    fn send(&mut self, datagram: &[u8]) -> Result<usize, NetworkError> {
        if datagram.len() > self.max_datagram_size {
            return Err(NetworkError::PacketTooLarge(datagram.len()));
        }
        match self.socket()?.send(datagram) {
            Ok(n) => Ok(n),
            Err(e) if is_transient(e.kind()) => Err(NetworkError::SendFailed(e.to_string())),
            Err(e) => Err(NetworkError::SocketUnusable(e.to_string())),
        }
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<Option<usize>, NetworkError> {
        match self.socket()?.recv_from(buf) {
            Ok((n, _)) => Ok(Some(n)),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
            Err(e) if is_transient(e.kind()) => Err(NetworkError::ReceiveFailed(e.to_string())),
            Err(e) => Err(NetworkError::SocketUnusable(e.to_string())),
        }
    }

    fn close(&mut self) {
        self.socket.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> UdpTransport {
        UdpTransport::new(Duration::from_millis(50), 1472)
    }

    #[test]
    fn test_capture_socket_sends_to_endpoint() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
        let port = receiver.local_addr().unwrap().port();

        let mut socket = transport()
            .bind_or_connect(&NetworkEndpoint::new("127.0.0.1", port), Direction::CaptureToNetwork)
            .unwrap();
        assert_eq!(socket.send(&[1, 2, 3, 4]).unwrap(), 4);

        let mut buf = [0u8; 16];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_playback_socket_receives_and_times_out() {
        let probe = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let mut socket = transport()
            .bind_or_connect(&NetworkEndpoint::new("127.0.0.1", port), Direction::NetworkToPlayback)
            .unwrap();

        let mut buf = [0u8; 64];
        assert_eq!(socket.receive(&mut buf).unwrap(), None);

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(&[9; 10], ("127.0.0.1", port)).unwrap();
        assert_eq!(socket.receive(&mut buf).unwrap(), Some(10));
    }

    #[test]
    fn test_bind_conflict_fails() {
        let taken = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let result = transport()
            .bind_or_connect(&NetworkEndpoint::new("127.0.0.1", port), Direction::NetworkToPlayback);
        assert!(matches!(result, Err(NetworkError::BindFailed(_))));
    }

    #[test]
    fn test_oversized_and_closed() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = receiver.local_addr().unwrap().port();
        let mut socket = transport()
            .bind_or_connect(&NetworkEndpoint::new("127.0.0.1", port), Direction::CaptureToNetwork)
            .unwrap();

        let err = socket.send(&[0; 2000]).unwrap_err();
        assert!(matches!(err, NetworkError::PacketTooLarge(2000)));
        assert!(err.is_transient());

        socket.close();
        let err = socket.send(&[0; 4]).unwrap_err();
        assert!(!err.is_transient());
    }
}
