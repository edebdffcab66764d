//! Client-side TLS configuration for the adaptive sender's HTTP/1.1
//! fallback and HTTP/3 primary transports. Both share one root store
//! built from the platform's webpki roots, since edge collectors talk to
//! operator-controlled receiver endpoints rather than arbitrary hosts.

use std::sync::Arc;

use ingest_core::IngestError;

/// Builds a `rustls::ClientConfig` with ALPN offered for both HTTP/3's
/// underlying QUIC handshake and HTTP/1.1.
pub fn client_config() -> Result<rustls::ClientConfig, IngestError> {
    let roots = root_store();
    let mut config =
        rustls::ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

/// Builds the QUIC-flavoured client config used by [`crate::h3_transport`],
/// with `h3` negotiated via ALPN.
pub fn quic_client_config() -> Result<quinn::ClientConfig, IngestError> {
    let roots = root_store();
    let mut tls_config =
        rustls::ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
    tls_config.alpn_protocols = vec![b"h3".to_vec()];
    let quic_tls = quinn::crypto::rustls::QuicClientConfig::try_from(tls_config)
        .map_err(|err| IngestError::internal(format!("building QUIC client TLS config: {err}")))?;
    Ok(quinn::ClientConfig::new(Arc::new(quic_tls)))
}

fn root_store() -> rustls::RootCertStore {
    let mut store = rustls::RootCertStore::empty();
    store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    store
}
