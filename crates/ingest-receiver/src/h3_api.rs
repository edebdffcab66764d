//! HTTP/3 receiver (§4.4): `quinn` QUIC endpoint plus `h3`/`h3-quinn` for
//! request/response framing, sharing [`PipelineContext`] and the routing
//! logic in [`crate::request`] with the HTTP/1.1 fallback.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, Bytes};
use h3::quic::BidiStream;
use h3::server::RequestStream;
use http::{Method, StatusCode};
use ingest_core::IngestError;
use ingest_gate::{AdmissionVerdict, Protocol};
use ingest_transport_quic::QuicEndpoint;
use tokio_util::sync::CancellationToken;

use crate::health::HealthChecker;
use crate::pipeline::PipelineContext;
use crate::request::{credential_from_headers, is_gzip_encoded, route};

pub struct Http3Receiver {
    endpoint: QuicEndpoint,
    ctx: Arc<PipelineContext>,
    health: Arc<HealthChecker>,
}

impl Http3Receiver {
    pub fn new(endpoint: QuicEndpoint, ctx: Arc<PipelineContext>, health: Arc<HealthChecker>) -> Self {
        Self { endpoint, ctx, health }
    }

    pub async fn serve(self: Arc<Self>, token: CancellationToken) -> Result<(), IngestError> {
        tracing::info!(bind = ?self.endpoint.local_addr(), "http/3 receiver listening");
        loop {
            let connection = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                accepted = self.endpoint.accept(&token) => accepted,
            };
            let quic_conn = match connection {
                Ok(conn) => conn,
                Err(err) => {
                    tracing::warn!(error = %err, "quic accept failed");
                    continue;
                }
            };

            let peer_addr = quic_conn.peer_addr();
            let dest_port = self
                .endpoint
                .local_addr()
                .map(|addr| addr.port())
                .unwrap_or(0);
            if self.ctx.admission.check(Protocol::Udp, peer_addr.ip(), dest_port) == AdmissionVerdict::Block {
                self.ctx.metrics.admission_blocked_total.inc();
                continue;
            }

            let this = self.clone();
            let conn_token = token.clone();
            tokio::spawn(async move {
                if let Err(err) = this.serve_h3_connection(quic_conn, peer_addr, conn_token).await {
                    tracing::warn!(error = %err, %peer_addr, "http/3 connection ended");
                }
            });
        }
    }

    async fn serve_h3_connection(
        &self,
        quic_conn: ingest_transport_quic::QuicConnection,
        peer_addr: SocketAddr,
        token: CancellationToken,
    ) -> Result<(), IngestError> {
        let h3_conn = h3_quinn::Connection::new(quic_conn.into_inner());
        let mut conn = h3::server::Connection::new(h3_conn)
            .await
            .map_err(|err| IngestError::unavailable("http3", format!("establishing control streams: {err}")))?;

        loop {
            let accepted = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                accepted = conn.accept() => accepted,
            };
            match accepted {
                Ok(Some((req, stream))) => {
                    let ctx = self.ctx.clone();
                    let health = self.health.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_request(ctx, health, req, stream, peer_addr).await {
                            tracing::warn!(error = %err, %peer_addr, "http/3 request failed");
                        }
                    });
                }
                Ok(None) => return Ok(()),
                Err(err) => return Err(IngestError::unavailable("http3", err.to_string())),
            }
        }
    }
}

async fn handle_request<S>(
    ctx: Arc<PipelineContext>,
    health: Arc<HealthChecker>,
    req: http::Request<()>,
    mut stream: RequestStream<S, Bytes>,
    peer_addr: SocketAddr,
) -> Result<(), IngestError>
where
    S: BidiStream<Bytes>,
{
    if req.method() == Method::GET && req.uri().path() == "/healthz" {
        let report = health.check().await;
        return send_response(&mut stream, report.http_status(), "application/json", report.to_json().into_bytes())
            .await;
    }
    if req.method() == Method::GET && req.uri().path() == "/metrics" {
        let body = ctx.metrics.render().into_bytes();
        return send_response(&mut stream, 200, "text/plain; version=0.0.4", body).await;
    }

    let credential = match credential_from_headers(req.headers()) {
        Ok(c) => c,
        Err(err) => return send_error(&mut stream, &err).await,
    };
    let gzip = is_gzip_encoded(req.headers());

    let mut body = Vec::new();
    while let Some(mut chunk) = stream
        .recv_data()
        .await
        .map_err(|err| IngestError::invalid_input(format!("reading request body: {err}")))?
    {
        body.extend_from_slice(chunk.chunk());
        chunk.advance(chunk.remaining());
    }

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    match route(&ctx, &method, &path, credential, peer_addr.ip(), &body, gzip).await {
        Ok(response_body) => send_response(&mut stream, 200, "application/json", response_body.into_bytes()).await,
        Err(err) => send_error(&mut stream, &err).await,
    }
}

async fn send_error<S>(stream: &mut RequestStream<S, Bytes>, err: &IngestError) -> Result<(), IngestError>
where
    S: BidiStream<Bytes>,
{
    let body = serde_json::json!({"error": {"code": err.kind().code(), "message": err.to_string()}}).to_string();
    send_response_with_retry_after(stream, err.http_status(), "application/json", body.into_bytes(), err.retry_after())
        .await
}

async fn send_response<S>(
    stream: &mut RequestStream<S, Bytes>,
    status: u16,
    content_type: &str,
    body: Vec<u8>,
) -> Result<(), IngestError>
where
    S: BidiStream<Bytes>,
{
    send_response_with_retry_after(stream, status, content_type, body, None).await
}

/// As [`send_response`], but additionally sets `Retry-After` when
/// `retry_after` is `Some` (the `Throttled` path, §7, §8 scenario S3).
async fn send_response_with_retry_after<S>(
    stream: &mut RequestStream<S, Bytes>,
    status: u16,
    content_type: &str,
    body: Vec<u8>,
    retry_after: Option<std::time::Duration>,
) -> Result<(), IngestError>
where
    S: BidiStream<Bytes>,
{
    let mut builder = http::Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
        .header("content-type", content_type);
    if let Some(retry_after) = retry_after {
        builder = builder.header("retry-after", retry_after.as_secs().max(1).to_string());
    }
    let response = builder
        .body(())
        .map_err(|err| IngestError::internal(format!("building http/3 response: {err}")))?;

    stream
        .send_response(response)
        .await
        .map_err(|err| IngestError::unavailable("http3", format!("sending response headers: {err}")))?;
    stream
        .send_data(Bytes::from(body))
        .await
        .map_err(|err| IngestError::unavailable("http3", format!("sending response body: {err}")))?;
    stream
        .finish()
        .await
        .map_err(|err| IngestError::unavailable("http3", format!("finishing stream: {err}")))?;
    Ok(())
}
