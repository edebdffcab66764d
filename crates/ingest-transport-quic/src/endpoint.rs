//! Thin `quinn` endpoint wrapper.
//!
//! Generalises the teacher's `QuicEndpoint`/`QuicConnection` pair (a
//! bidirectional-stream-oriented wrapper for a custom framed protocol) to
//! the one shape the HTTP/3 log/metric receivers actually need: bind a
//! server endpoint, accept connections, and hand each accepted connection to
//! `h3` for request/response framing instead of driving raw bidi streams
//! ourselves.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use quinn::{ClientConfig, Endpoint, ServerConfig};
use tokio_util::sync::CancellationToken;

use ingest_core::IngestError;

use crate::error::{self, cancelled_error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointMode {
    Server,
    Client,
}

/// A bound QUIC endpoint in either server or client mode.
pub struct QuicEndpoint {
    inner: Endpoint,
    mode: EndpointMode,
}

impl QuicEndpoint {
    /// Binds a server-mode endpoint on `addr` using `server_config`. The
    /// caller supplies a `quinn::ServerConfig` already carrying a
    /// certificate chain and private key — typically built from a
    /// `rustls::ServerConfig` sourced from `ingest-transport-tls`'s
    /// hot-reload container.
    pub fn bind_server(addr: SocketAddr, server_config: ServerConfig) -> Result<Self, IngestError> {
        let endpoint = Endpoint::server(server_config, addr)
            .map_err(|err| error::map_io_error(error::BIND, err))?;
        Ok(Self { inner: endpoint, mode: EndpointMode::Server })
    }

    /// Binds a client-mode endpoint, used by the adaptive sender (§4.8) for
    /// its HTTP/3 primary client.
    pub fn bind_client(bind_addr: SocketAddr, client_config: ClientConfig) -> Result<Self, IngestError> {
        let mut endpoint =
            Endpoint::client(bind_addr).map_err(|err| error::map_io_error(error::BIND, err))?;
        endpoint.set_default_client_config(client_config);
        Ok(Self { inner: endpoint, mode: EndpointMode::Client })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, IngestError> {
        self.inner.local_addr().map_err(|err| error::map_io_error(error::BIND, err))
    }

    /// Accepts the next inbound connection, honouring `token` for
    /// shutdown. Only valid on a server-mode endpoint.
    pub async fn accept(&self, token: &CancellationToken) -> Result<QuicConnection, IngestError> {
        if self.mode != EndpointMode::Server {
            return Err(error::invalid_endpoint_mode(error::ACCEPT));
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(cancelled_error(error::ACCEPT)),
            accepted = self.inner.accept() => {
                let incoming = accepted.ok_or_else(|| error::closed_error(error::ACCEPT))?;
                let connection = incoming
                    .await
                    .map_err(|err| error::map_connection_error(error::ACCEPT, err))?;
                Ok(QuicConnection::new(connection))
            }
        }
    }

    /// Opens an outbound connection. Only valid on a client-mode endpoint.
    pub async fn connect(
        &self,
        addr: SocketAddr,
        server_name: &str,
    ) -> Result<QuicConnection, IngestError> {
        if self.mode != EndpointMode::Client {
            return Err(error::invalid_endpoint_mode(error::CONNECT));
        }
        let connecting = self
            .inner
            .connect(addr, server_name)
            .map_err(|err| error::map_connect_error(error::CONNECT, err))?;
        let connection = connecting
            .await
            .map_err(|err| error::map_connection_error(error::CONNECT, err))?;
        Ok(QuicConnection::new(connection))
    }

    pub fn close(&self, reason: &[u8]) {
        self.inner.close(0u32.into(), reason);
    }
}

impl fmt::Debug for QuicEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuicEndpoint").field("mode", &self.mode).finish_non_exhaustive()
    }
}

/// An established QUIC connection, handed off to `h3` for HTTP/3 framing.
#[derive(Clone)]
pub struct QuicConnection {
    inner: quinn::Connection,
}

impl QuicConnection {
    fn new(inner: quinn::Connection) -> Self {
        Self { inner }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.remote_address()
    }

    /// The raw `quinn::Connection`, consumed by `h3_quinn::Connection::new`
    /// at the receiver layer.
    pub fn into_inner(self) -> quinn::Connection {
        self.inner
    }

    pub fn as_inner(&self) -> &quinn::Connection {
        &self.inner
    }
}

impl fmt::Debug for QuicConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuicConnection").field("peer", &self.peer_addr()).finish()
    }
}

/// Builds a `quinn::ServerConfig` from a shared, hot-reloadable
/// `rustls::ServerConfig` snapshot.
pub fn server_config_from_rustls(
    tls_config: Arc<rustls::ServerConfig>,
) -> Result<ServerConfig, IngestError> {
    let quic_tls = quinn::crypto::rustls::QuicServerConfig::try_from((*tls_config).clone())
        .map_err(|err| IngestError::internal(format!("building QUIC TLS config: {err}")))?;
    Ok(ServerConfig::with_crypto(Arc::new(quic_tls)))
}
