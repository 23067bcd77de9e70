//! Network collaborators: UDP sockets for SSDP and HTTP for descriptions.
//!
//! The discovery engine only talks to the network through [`Transport`] and
//! [`DatagramSocket`], so tests can substitute an in-memory implementation.

pub mod device;
pub mod discovery;
pub mod ssdp;

#[cfg(test)]
pub(crate) mod mock;

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::error::{DiscoveryError, Result};

/// A bound datagram socket
#[async_trait]
pub trait DatagramSocket: Send + Sync {
    async fn send_to(&self, payload: &[u8], target: SocketAddr) -> io::Result<usize>;

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Leave a multicast group joined when the socket was opened
    fn leave_multicast(&self, _group: Ipv4Addr) -> io::Result<()> {
        Ok(())
    }
}

/// Socket and HTTP capabilities the discovery engine needs
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Whether this transport can open UDP sockets at all
    fn supports_sockets(&self) -> bool {
        true
    }

    /// Bind the well-known port and join the multicast group
    async fn open_multicast(&self, group: Ipv4Addr, port: u16) -> io::Result<Arc<dyn DatagramSocket>>;

    /// Bind an ephemeral port for sending searches and receiving replies
    async fn open_unicast(&self) -> io::Result<Arc<dyn DatagramSocket>>;

    /// GET a URL and return the body
    async fn http_get(&self, url: &str) -> Result<String>;
}

#[async_trait]
impl DatagramSocket for UdpSocket {
    async fn send_to(&self, payload: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, payload, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    fn leave_multicast(&self, group: Ipv4Addr) -> io::Result<()> {
        self.leave_multicast_v4(group, Ipv4Addr::UNSPECIFIED)
    }
}

/// Transport backed by tokio UDP sockets and a reqwest client
pub struct NetTransport {
    http: reqwest::Client,
}

impl NetTransport {
    pub fn new(http_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| {
                DiscoveryError::TransportUnavailable(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for NetTransport {
    async fn open_multicast(&self, group: Ipv4Addr, port: u16) -> io::Result<Arc<dyn DatagramSocket>> {
        let socket = socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::DGRAM,
            Some(socket2::Protocol::UDP),
        )?;

        // Other control points on this host listen on the same port
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;

        socket.bind(&SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)).into())?;
        socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        socket.set_nonblocking(true)?;

        let socket = UdpSocket::from_std(socket.into())?;
        log::debug!("Joined multicast group {} on port {}", group, port);
        Ok(Arc::new(socket))
    }

    async fn open_unicast(&self) -> io::Result<Arc<dyn DatagramSocket>> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_multicast_loop_v4(true)?;
        Ok(Arc::new(socket))
    }

    async fn http_get(&self, url: &str) -> Result<String> {
        let response = self.http.get(url).send().await?;

        if !response.status().is_success() {
            return Err(DiscoveryError::Http(format!(
                "GET {} failed with status: {}",
                url,
                response.status()
            )));
        }

        Ok(response.text().await?)
    }
}
