use std::net::SocketAddr;

use ingest_core::IngestError;
use socket2::{Domain, Socket, Type};
use tokio::net::UdpSocket;

/// Socket-level tuning applied before binding, mirroring the builder
/// pattern the teacher uses for its SIP UDP sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpSocketOptions {
    reuse_address: bool,
    recv_buffer_size: Option<usize>,
}

impl UdpSocketOptions {
    pub fn with_reuse_address(mut self, value: bool) -> Self {
        self.reuse_address = value;
        self
    }

    pub fn with_recv_buffer_size(mut self, bytes: usize) -> Self {
        self.recv_buffer_size = Some(bytes);
        self
    }

    fn apply(&self, socket: &Socket) -> std::io::Result<()> {
        socket.set_reuse_address(self.reuse_address)?;
        if let Some(size) = self.recv_buffer_size {
            socket.set_recv_buffer_size(size)?;
        }
        Ok(())
    }
}

/// A bound UDP socket, one per enabled syslog source port.
#[derive(Debug)]
pub struct UdpEndpoint {
    sock: UdpSocket,
    local_addr: SocketAddr,
}

impl UdpEndpoint {
    pub async fn bind(addr: SocketAddr) -> Result<Self, IngestError> {
        Self::bind_with_options(addr, UdpSocketOptions::default()).await
    }

    pub async fn bind_with_options(
        addr: SocketAddr,
        options: UdpSocketOptions,
    ) -> Result<Self, IngestError> {
        let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
        let socket = Socket::new(domain, Type::DGRAM, None)
            .map_err(|err| IngestError::unavailable("udp.bind", err.to_string()))?;
        options.apply(&socket).map_err(|err| IngestError::unavailable("udp.bind", err.to_string()))?;
        socket
            .set_nonblocking(true)
            .map_err(|err| IngestError::unavailable("udp.bind", err.to_string()))?;
        socket
            .bind(&addr.into())
            .map_err(|err| IngestError::unavailable("udp.bind", err.to_string()))?;
        let std_socket: std::net::UdpSocket = socket.into();
        let sock = UdpSocket::from_std(std_socket)
            .map_err(|err| IngestError::unavailable("udp.bind", err.to_string()))?;
        let local_addr = sock
            .local_addr()
            .map_err(|err| IngestError::unavailable("udp.bind", err.to_string()))?;
        Ok(Self { sock, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Reads one datagram into `buf`, returning the number of bytes and the
    /// sender's address. Admission CIDR checks (§4.1) happen on the
    /// returned address one layer up.
    pub async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), IngestError> {
        self.sock
            .recv_from(buf)
            .await
            .map_err(|err| IngestError::unavailable("udp.recv", err.to_string()))
    }

    pub async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, IngestError> {
        self.sock
            .send_to(buf, target)
            .await
            .map_err(|err| IngestError::unavailable("udp.send", err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_and_round_trip_datagram() {
        let server = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let client = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();

        client.send_to(b"hello", server.local_addr()).await.unwrap();

        let mut buf = [0u8; 16];
        let (n, peer) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(peer, client.local_addr());
    }
}
