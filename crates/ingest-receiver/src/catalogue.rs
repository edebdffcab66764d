//! HTTP client for the external source catalogue (§1 out of scope; §4.2
//! names it only as "the catalogue implements [`SourceResolver`]"). This
//! is the one real implementation in this repo; production deployments
//! may swap in a different client behind the same trait.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::Request;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use ingest_core::{IngestError, Source};
use ingest_gate::SourceResolver;

type HttpClient = Client<HttpConnector, Full<Bytes>>;

pub struct CatalogueClient {
    client: HttpClient,
    base_url: String,
    timeout: std::time::Duration,
}

impl CatalogueClient {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self { client, base_url: base_url.into().trim_end_matches('/').to_string(), timeout }
    }

    async fn get(&self, path: &str) -> Result<Source, IngestError> {
        let uri: hyper::Uri = format!("{}{path}", self.base_url)
            .parse()
            .map_err(|err| IngestError::internal(format!("building catalogue URL: {err}")))?;
        let request = Request::get(uri)
            .body(Full::new(Bytes::new()))
            .map_err(|err| IngestError::internal(format!("building catalogue request: {err}")))?;

        let response = tokio::time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| IngestError::unavailable("catalogue", "request timed out"))?
            .map_err(|err| IngestError::unavailable("catalogue", err.to_string()))?;

        match response.status().as_u16() {
            200 => {
                let body = response
                    .into_body()
                    .collect()
                    .await
                    .map_err(|err| IngestError::unavailable("catalogue", err.to_string()))?
                    .to_bytes();
                serde_json::from_slice(&body)
                    .map_err(|err| IngestError::internal(format!("decoding catalogue response: {err}")))
            }
            404 => Err(IngestError::not_found(path.to_string())),
            status => Err(IngestError::unavailable("catalogue", format!("catalogue returned {status}"))),
        }
    }
}

#[async_trait]
impl SourceResolver for CatalogueClient {
    async fn by_api_key(&self, key: &str) -> Result<Source, IngestError> {
        self.get(&format!("/sources/by-api-key/{key}")).await
    }

    async fn by_bearer(&self, token: &str) -> Result<Source, IngestError> {
        self.get(&format!("/sources/by-bearer/{token}")).await
    }

    async fn by_subject(&self, subject: &str) -> Result<Source, IngestError> {
        self.get(&format!("/sources/by-subject/{subject}")).await
    }

    async fn by_udp_port(&self, port: u16) -> Result<Source, IngestError> {
        self.get(&format!("/sources/by-udp-port/{port}")).await
    }
}

impl CatalogueClient {
    /// Lists the UDP ports of every currently enabled source, used by the
    /// syslog receiver's port-reconciliation loop (§4.5: "on start, the
    /// component reconciles the set of desired bindings with open
    /// sockets"). Not part of [`SourceResolver`] — that trait is scoped
    /// to point lookups only, per §9's cyclic-dependency note — so this
    /// is a capability of the catalogue client specifically.
    pub async fn list_enabled_udp_ports(&self) -> Result<std::collections::BTreeSet<u16>, IngestError> {
        let uri: hyper::Uri = format!("{}/sources/udp-ports", self.base_url)
            .parse()
            .map_err(|err| IngestError::internal(format!("building catalogue URL: {err}")))?;
        let request = Request::get(uri)
            .body(Full::new(Bytes::new()))
            .map_err(|err| IngestError::internal(format!("building catalogue request: {err}")))?;

        let response = tokio::time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| IngestError::unavailable("catalogue", "request timed out"))?
            .map_err(|err| IngestError::unavailable("catalogue", err.to_string()))?;

        if response.status().as_u16() != 200 {
            return Err(IngestError::unavailable(
                "catalogue",
                format!("catalogue returned {}", response.status()),
            ));
        }
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|err| IngestError::unavailable("catalogue", err.to_string()))?
            .to_bytes();
        serde_json::from_slice(&body)
            .map_err(|err| IngestError::internal(format!("decoding udp-ports response: {err}")))
    }
}

/// Periodically polls the catalogue for the full set of enabled sources'
/// UDP ports and publishes it to `tx`, driving [`crate::syslog::SyslogReceiver::run`]'s
/// reconciliation loop. Polling failures are logged and the previous
/// desired set is kept until the next successful poll.
pub async fn poll_desired_ports(
    catalogue: std::sync::Arc<CatalogueClient>,
    interval: std::time::Duration,
    tx: tokio::sync::watch::Sender<std::collections::BTreeSet<u16>>,
    token: tokio_util::sync::CancellationToken,
) {
    loop {
        match catalogue.list_enabled_udp_ports().await {
            Ok(ports) => {
                let _ = tx.send_if_modified(|current| {
                    if *current != ports {
                        *current = ports.clone();
                        true
                    } else {
                        false
                    }
                });
            }
            Err(err) => tracing::warn!(error = %err, "failed to poll catalogue for udp port set"),
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
