//! Datagram transport used by a transfer session.
//!
//! A session talks to exactly one server through one socket. The socket is
//! never connected: the destination changes from the server's well-known
//! port to its transfer ID after the first reply, and that binding lives in
//! the session rather than in the socket.

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::UdpSocket;
use tracing::debug;

use crate::error::Result;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// Wait for the next datagram. Must be cancel-safe: the retry timer drops
    /// this future when the reply deadline passes.
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

/// UDP transport over an ephemeral local port.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind an ephemeral socket of the same address family as `server`.
    pub fn bind_for(server: SocketAddr, recv_buffer_kb: usize) -> Result<Self> {
        let (domain, local): (Domain, SocketAddr) = match server {
            SocketAddr::V4(_) => (Domain::IPV4, (Ipv4Addr::UNSPECIFIED, 0).into()),
            SocketAddr::V6(_) => (Domain::IPV6, (Ipv6Addr::UNSPECIFIED, 0).into()),
        };

        let socket2_socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        if recv_buffer_kb > 0 {
            socket2_socket.set_recv_buffer_size(recv_buffer_kb * 1024)?;
        }
        socket2_socket.set_nonblocking(true)?;
        socket2_socket.bind(&local.into())?;

        let std_socket: std::net::UdpSocket = socket2_socket.into();
        let socket = UdpSocket::from_std(std_socket)?;

        debug!(
            "Bound to {:?} with {}KB receive buffer",
            socket.local_addr()?,
            recv_buffer_kb
        );
        Ok(Self { socket })
    }

    pub fn from_socket(socket: UdpSocket) -> Self {
        Self { socket }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }
}
