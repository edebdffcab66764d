//! HTTP/1.1 fallback receiver (§4.4): `hyper` over `tokio-rustls`, for
//! clients that cannot negotiate HTTP/3. Shares [`PipelineContext`] and
//! the request-handling logic with the HTTP/3 receiver.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use ingest_core::IngestError;
use ingest_gate::{AdmissionVerdict, Protocol};
use ingest_transport_tls::HotReloadingServerConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::health::HealthChecker;
use crate::request::{credential_from_headers, is_gzip_encoded, respond_error, route};
use crate::pipeline::PipelineContext;

pub struct Http1Receiver {
    ctx: Arc<PipelineContext>,
    tls: HotReloadingServerConfig,
    health: Arc<HealthChecker>,
}

impl Http1Receiver {
    pub fn new(ctx: Arc<PipelineContext>, tls: HotReloadingServerConfig, health: Arc<HealthChecker>) -> Self {
        Self { ctx, tls, health }
    }

    pub async fn serve(
        self: Arc<Self>,
        bind_addr: SocketAddr,
        token: CancellationToken,
    ) -> Result<(), IngestError> {
        let listener = TcpListener::bind(bind_addr).await.map_err(IngestError::from)?;
        tracing::info!(%bind_addr, "http/1.1 receiver listening");

        loop {
            let accepted = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted,
            };
            let (stream, peer_addr) = match accepted {
                Ok(v) => v,
                Err(err) => {
                    tracing::warn!(error = %err, "tcp accept failed");
                    continue;
                }
            };

            if self.ctx.admission.check(Protocol::Tcp, peer_addr.ip(), bind_addr.port()) == AdmissionVerdict::Block {
                self.ctx.metrics.admission_blocked_total.inc();
                continue;
            }

            let this = self.clone();
            let conn_token = token.clone();
            tokio::spawn(async move {
                match this.tls.accept(stream).await {
                    Ok(tls_stream) => this.serve_connection(tls_stream, peer_addr, conn_token).await,
                    Err(err) => tracing::warn!(error = %err, %peer_addr, "tls handshake failed"),
                }
            });
        }
    }

    async fn serve_connection<IO>(&self, io: IO, peer_addr: SocketAddr, token: CancellationToken)
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let io = TokioIo::new(io);
        let ctx = self.ctx.clone();
        let health = self.health.clone();
        let service = service_fn(move |req: Request<Incoming>| {
            let ctx = ctx.clone();
            let health = health.clone();
            async move { Ok::<_, std::convert::Infallible>(handle(ctx, health, req, peer_addr).await) }
        });

        let conn = hyper::server::conn::http1::Builder::new().serve_connection(io, service);
        tokio::select! {
            biased;
            _ = token.cancelled() => {}
            result = conn => {
                if let Err(err) = result {
                    tracing::debug!(error = %err, %peer_addr, "http/1.1 connection ended");
                }
            }
        }
    }
}

async fn handle(
    ctx: Arc<PipelineContext>,
    health: Arc<HealthChecker>,
    req: Request<Incoming>,
    peer_addr: SocketAddr,
) -> Response<Full<Bytes>> {
    if req.method() == Method::GET && req.uri().path() == "/healthz" {
        let report = health.check().await;
        return Response::builder()
            .status(report.http_status())
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from(report.to_json())))
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())));
    }
    if req.method() == Method::GET && req.uri().path() == "/metrics" {
        let body = ctx.metrics.render();
        return Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/plain; version=0.0.4")
            .body(Full::new(Bytes::from(body)))
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())));
    }

    let credential = match credential_from_headers(req.headers()) {
        Ok(c) => c,
        Err(err) => return respond_error(&err),
    };
    let gzip = is_gzip_encoded(req.headers());

    let path = req.uri().path().to_string();
    let method = req.method().clone();
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => return respond_error(&IngestError::invalid_input(format!("reading request body: {err}"))),
    };

    match route(&ctx, &method, &path, credential, peer_addr.ip(), &body, gzip).await {
        Ok(response_body) => Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from(response_body)))
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::new()))),
        Err(err) => respond_error(&err),
    }
}
