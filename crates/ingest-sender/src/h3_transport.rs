//! HTTP/3 primary transport (§4.8): `quinn` + `h3`/`h3-quinn`, reusing
//! [`ingest_transport_quic::QuicEndpoint`]'s client mode. A connection is
//! opened lazily and cached; a failed reconnect is classified
//! protocol-unavailable so the caller falls back to HTTP/1.1.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use h3::client::SendRequest;
use http::Request;
use ingest_transport_quic::QuicEndpoint;
use tokio::sync::Mutex;

use crate::transport::{BatchTransport, SendError};

pub struct H3Transport {
    endpoint: QuicEndpoint,
    addr: SocketAddr,
    host: String,
    credential_header: (String, String),
    send_request: Mutex<Option<SendRequest<h3_quinn::OpenStreams, Bytes>>>,
}

impl H3Transport {
    pub fn new(
        endpoint: QuicEndpoint,
        addr: SocketAddr,
        host: String,
        credential_header: (String, String),
    ) -> Self {
        Self { endpoint, addr, host, credential_header, send_request: Mutex::new(None) }
    }

    async fn connection(&self) -> Result<SendRequest<h3_quinn::OpenStreams, Bytes>, SendError> {
        let mut guard = self.send_request.lock().await;
        if let Some(existing) = guard.as_ref() {
            return Ok(existing.clone());
        }

        let quic_conn = self
            .endpoint
            .connect(self.addr, &self.host)
            .await
            .map_err(|err| SendError::ProtocolUnavailable(format!("quic connect: {err}")))?;
        let h3_conn = h3_quinn::Connection::new(quic_conn.into_inner());
        let (mut driver, send_request) = h3::client::new(h3_conn)
            .await
            .map_err(|err| SendError::ProtocolUnavailable(format!("http/3 handshake: {err}")))?;
        tokio::spawn(async move {
            if let Err(err) = std::future::poll_fn(|cx| driver.poll_close(cx)).await {
                tracing::debug!(error = %err, "http/3 connection driver ended");
            }
        });

        *guard = Some(send_request.clone());
        Ok(send_request)
    }

    fn invalidate(&self) {
        if let Ok(mut guard) = self.send_request.try_lock() {
            *guard = None;
        }
    }
}

#[async_trait]
impl BatchTransport for H3Transport {
    async fn send(&self, path: &str, content_encoding: Option<&str>, body: Bytes) -> Result<(), SendError> {
        let mut send_request = self.connection().await?;

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
            .body(())
            .map_err(|err| SendError::Transient(format!("building request: {err}")))?;

        let mut stream = send_request.send_request(request).await.map_err(|err| {
            self.invalidate();
            SendError::ProtocolUnavailable(format!("opening http/3 request stream: {err}"))
        })?;
        stream
            .send_data(body)
            .await
            .map_err(|err| SendError::Transient(format!("sending http/3 body: {err}")))?;
        stream
            .finish()
            .await
            .map_err(|err| SendError::Transient(format!("finishing http/3 stream: {err}")))?;

        let response = stream
            .recv_response()
            .await
            .map_err(|err| SendError::Transient(format!("receiving http/3 response: {err}")))?;
        while stream
            .recv_data()
            .await
            .map_err(|err| SendError::Transient(format!("receiving http/3 body: {err}")))?
            .is_some()
        {}

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_client_error() {
            Err(SendError::Rejected { status: status.as_u16() })
        } else {
            Err(SendError::Transient(format!("unexpected status {status}")))
        }
    }
}
