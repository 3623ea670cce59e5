//! Async UDP socket wrapper for one call's RTP stream.
//!
//! Wraps `socket2::Socket` for send/recv buffer tuning, then hands off
//! to `tokio::net::UdpSocket` for async I/O. Adds symmetric-RTP address
//! learning (bind once, then redirect sends to whatever address the
//! first inbound packet came from) instead of a fixed remote.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// One call's RTP socket: bound locally, talks to whatever remote
/// address last sent it a packet (symmetric RTP / NAT traversal).
///
/// `remote` lives behind its own lock rather than requiring `&mut
/// self`, so one task can `send()` outbound audio while another
/// concurrently `recv()`s inbound packets on the same socket — both
/// need only a shared reference.
pub struct RtpSocket {
    socket: UdpSocket,
    remote: parking_lot::Mutex<Option<SocketAddr>>,
}

impl RtpSocket {
    /// Bind a UDP socket on `local_addr` with 1 MiB send/recv buffers
    /// so bursts of jitter don't trigger kernel-level drops.
    pub fn bind(local_addr: SocketAddr) -> Result<Self, String> {
        let domain = if local_addr.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };

        let raw = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| format!("failed to create RTP socket: {e}"))?;
        raw.set_nonblocking(true)
            .map_err(|e| format!("failed to set RTP socket nonblocking: {e}"))?;
        raw.set_recv_buffer_size(1024 * 1024)
            .map_err(|e| format!("failed to set RTP recv buffer: {e}"))?;
        raw.set_send_buffer_size(1024 * 1024)
            .map_err(|e| format!("failed to set RTP send buffer: {e}"))?;
        raw.bind(&local_addr.into())
            .map_err(|e| format!("failed to bind RTP socket to {local_addr}: {e}"))?;

        let std_socket: std::net::UdpSocket = raw.into();
        let socket = UdpSocket::from_std(std_socket)
            .map_err(|e| format!("failed to adopt RTP socket into tokio: {e}"))?;

        Ok(Self {
            socket,
            remote: parking_lot::Mutex::new(None),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, String> {
        self.socket
            .local_addr()
            .map_err(|e| format!("failed to read local addr: {e}"))
    }

    /// Fix the remote address explicitly, e.g. from SDP before the
    /// first inbound packet arrives.
    pub fn set_remote(&self, addr: SocketAddr) {
        *self.remote.lock() = Some(addr);
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        *self.remote.lock()
    }

    /// Receive one datagram. Learns (or re-learns, on a reconnect) the
    /// remote address from whoever sent it — symmetric RTP.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), String> {
        let (len, from) = self
            .socket
            .recv_from(buf)
            .await
            .map_err(|e| format!("RTP recv failed: {e}"))?;
        *self.remote.lock() = Some(from);
        Ok((len, from))
    }

    /// Send to the learned (or explicitly set) remote address.
    pub async fn send(&self, buf: &[u8]) -> Result<usize, String> {
        let remote = (*self.remote.lock())
            .ok_or_else(|| "RTP send attempted before remote address known".to_string())?;
        self.socket
            .send_to(buf, remote)
            .await
            .map_err(|e| format!("RTP send to {remote} failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_picks_ephemeral_port() {
        let socket = RtpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = socket.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn send_before_remote_known_fails() {
        let socket = RtpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let result = socket.send(&[0u8; 12]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn recv_learns_remote_address() {
        let a = RtpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let b = RtpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let a_addr = a.local_addr().unwrap();

        b.set_remote(a_addr);
        b.send(b"hello").await.unwrap();

        let mut buf = [0u8; 16];
        let (len, from) = a.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"hello");
        assert_eq!(a.remote(), Some(from));
    }
}
