//! Zero-downtime TLS configuration reload, for `TLS_CERT`/`TLS_KEY`/`TLS_CA`
//! rotation (§6) without rebinding the HTTP/1.1 fallback listener.
//!
//! An `ArcSwap<ServerConfig>` gives readers (in-flight handshakes) a lock-free
//! snapshot while a writer (the file-watch task) swaps in a freshly parsed
//! configuration in constant time — classic RCU. Connections accepted before
//! a swap keep handshaking against the config they already grabbed; only
//! handshakes starting after the swap see the new certificate.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use rustls::ServerConfig;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::{TlsAcceptor, server::TlsStream};

#[derive(Clone)]
pub struct HotReloadingServerConfig {
    inner: Arc<ArcSwap<ServerConfig>>,
}

impl HotReloadingServerConfig {
    pub fn new(initial: Arc<ServerConfig>) -> Self {
        Self { inner: Arc::new(ArcSwap::new(initial)) }
    }

    pub fn from_config(initial: ServerConfig) -> Self {
        Self::new(Arc::new(initial))
    }

    /// A cheap (refcount-only) snapshot of the current configuration, for
    /// handing to `ingest-transport-quic`'s `server_config_from_rustls`.
    #[inline]
    pub fn snapshot(&self) -> Arc<ServerConfig> {
        self.inner.load_full()
    }

    /// Atomically replaces the configuration, returning the previous value.
    #[inline]
    pub fn replace(&self, next: Arc<ServerConfig>) -> Arc<ServerConfig> {
        self.inner.swap(next)
    }

    /// Accepts a TLS handshake against the current snapshot.
    pub async fn accept<IO>(&self, stream: IO) -> Result<TlsStream<IO>, TlsHandshakeError>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let config = self.inner.load_full();
        let acceptor = TlsAcceptor::from(config);
        acceptor.accept(stream).await.map_err(TlsHandshakeError::from)
    }
}

impl fmt::Debug for HotReloadingServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotReloadingServerConfig").finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum TlsHandshakeError {
    #[error("TLS handshake failed: {source}")]
    Handshake {
        #[source]
        source: std::io::Error,
    },
}

impl From<std::io::Error> for TlsHandshakeError {
    fn from(source: std::io::Error) -> Self {
        TlsHandshakeError::Handshake { source }
    }
}
