//! HTTP/1.1 fallback transport (§4.8): used when HTTP/3 is classified
//! protocol-unavailable, and as the initial probe before HTTP/3 has ever
//! been attempted.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::transport::{BatchTransport, SendError};

pub struct Http1Transport {
    addr: SocketAddr,
    host: String,
    connector: TlsConnector,
    credential_header: (String, String),
}

impl Http1Transport {
    pub fn new(
        addr: SocketAddr,
        host: String,
        tls_config: Arc<rustls::ClientConfig>,
        credential_header: (String, String),
    ) -> Self {
        Self { addr, host, connector: TlsConnector::from(tls_config), credential_header }
    }

    async fn send_once(&self, path: &str, content_encoding: Option<&str>, body: Bytes) -> Result<(), SendError> {
        let tcp = TcpStream::connect(self.addr)
            .await
            .map_err(|err| SendError::ProtocolUnavailable(format!("tcp connect: {err}")))?;
        let server_name = rustls_pki_types::ServerName::try_from(self.host.clone())
            .map_err(|err| SendError::ProtocolUnavailable(format!("invalid server name: {err}")))?;
        let tls_stream = self
            .connector
            .connect(server_name, tcp)
            .await
            .map_err(|err| SendError::ProtocolUnavailable(format!("tls handshake: {err}")))?;
        let io = TokioIo::new(tls_stream);

        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|err| SendError::ProtocolUnavailable(format!("http/1.1 handshake: {err}")))?;
        tokio::spawn(async move {
            if let Err(err) = conn.await {
                tracing::debug!(error = %err, "http/1.1 connection driver ended");
            }
        });

        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header("host", &self.host)
            .header("content-type", "application/json")
            .header(&self.credential_header.0, &self.credential_header.1);
        if let Some(encoding) = content_encoding {
            builder = builder.header("content-encoding", encoding);
        }
        let request = builder
            .body(Full::new(body))
            .map_err(|err| SendError::Transient(format!("building request: {err}")))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|err| SendError::Transient(format!("sending request: {err}")))?;
        let status = response.status();
        let _ = response.into_body().collect().await;

        if status.is_success() {
            Ok(())
        } else if status.is_client_error() {
            Err(SendError::Rejected { status: status.as_u16() })
        } else {
            Err(SendError::Transient(format!("unexpected status {status}")))
        }
    }
}

#[async_trait]
impl BatchTransport for Http1Transport {
    async fn send(&self, path: &str, content_encoding: Option<&str>, body: Bytes) -> Result<(), SendError> {
        self.send_once(path, content_encoding, body).await
    }
}
