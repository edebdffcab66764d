//! Credential extraction, JSON-body routing, and error-response shaping
//! shared by the HTTP/1.1 and HTTP/3 receivers (§4.4, §6).

use std::io::Read;
use std::net::IpAddr;
use std::sync::Arc;

use bytes::Bytes;
use flate2::read::GzDecoder;
use http::{HeaderMap, Method, Response, StatusCode};
use http_body_util::Full;
use ingest_core::IngestError;
use ingest_gate::CredentialKind;
use serde::Serialize;

use crate::pipeline::{LogsRequest, MetricsRequest, PipelineContext};

/// Gzip is the only optional body encoding named in §4.4 ("Decode body
/// (JSON; gzip optional)"). Absence of the header means a plain JSON body.
pub fn is_gzip_encoded(headers: &HeaderMap) -> bool {
    headers
        .get(http::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"))
}

fn maybe_decompress(body: &[u8], gzip: bool) -> Result<Vec<u8>, IngestError> {
    if !gzip {
        return Ok(body.to_vec());
    }
    let mut decoder = GzDecoder::new(body);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|err| IngestError::invalid_input(format!("malformed gzip body: {err}")))?;
    Ok(out)
}

/// Auth headers named in §6: `X-API-Key`, `Authorization: Bearer <token>`.
/// mTLS subject extraction happens at the TLS layer and is passed in
/// separately by callers that terminate client certificates.
pub fn credential_from_headers(headers: &HeaderMap) -> Result<(CredentialKind, String), IngestError> {
    if let Some(key) = headers.get("x-api-key") {
        let value = key.to_str().map_err(|_| IngestError::invalid_input("X-API-Key is not valid UTF-8"))?;
        return Ok((CredentialKind::ApiKey, value.to_string()));
    }
    if let Some(auth) = headers.get(http::header::AUTHORIZATION) {
        let value = auth.to_str().map_err(|_| IngestError::invalid_input("Authorization header is not valid UTF-8"))?;
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Ok((CredentialKind::Bearer, token.to_string()));
        }
    }
    Err(IngestError::Unauthenticated)
}

#[derive(Serialize)]
struct ProcessedResponse {
    processed: u32,
}

/// Decodes and dispatches one ingest request. Returns the JSON response
/// body on success.
pub async fn route(
    ctx: &Arc<PipelineContext>,
    method: &Method,
    path: &str,
    credential: (CredentialKind, String),
    client_addr: IpAddr,
    body: &[u8],
    gzip: bool,
) -> Result<String, IngestError> {
    let (kind, value) = credential;
    let body = maybe_decompress(body, gzip)?;
    match (method, path) {
        (&Method::POST, "/api/v1/logs") => {
            let request: LogsRequest = serde_json::from_slice(&body)
                .map_err(|err| IngestError::invalid_input(format!("malformed logs batch: {err}")))?;
            let processed = ctx.ingest_logs(kind, &value, client_addr, request).await?;
            Ok(serde_json::to_string(&ProcessedResponse { processed }).unwrap_or_default())
        }
        (&Method::POST, "/api/v1/metrics") => {
            let request: MetricsRequest = serde_json::from_slice(&body)
                .map_err(|err| IngestError::invalid_input(format!("malformed metrics batch: {err}")))?;
            let processed = ctx.ingest_metrics(kind, &value, client_addr, request).await?;
            Ok(serde_json::to_string(&ProcessedResponse { processed }).unwrap_or_default())
        }
        _ => Err(IngestError::not_found(path.to_string())),
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: &'a str,
    message: String,
}

/// Maps an [`IngestError`] onto the HTTP status named in §7's kind table
/// with a small JSON error body. A `Throttled` error additionally carries
/// a `Retry-After` header (§7, §8 scenario S3).
pub fn respond_error(err: &IngestError) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorBody { error: ErrorDetail { code: err.kind().code(), message: err.to_string() } };
    let encoded = serde_json::to_vec(&body).unwrap_or_default();
    let mut builder = Response::builder().status(status).header("content-type", "application/json");
    if let Some(retry_after) = err.retry_after() {
        builder = builder.header("retry-after", retry_after.as_secs().max(1).to_string());
    }
    builder
        .body(Full::new(Bytes::from(encoded)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write as _;

    #[test]
    fn gzip_header_detected_case_insensitively() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_ENCODING, "GZIP".parse().unwrap());
        assert!(is_gzip_encoded(&headers));

        let headers = HeaderMap::new();
        assert!(!is_gzip_encoded(&headers));
    }

    #[test]
    fn gzip_body_round_trips_through_decompress() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(br#"{"source":"s","logs":[]}"#).unwrap();
        let compressed = encoder.finish().unwrap();

        let decoded = maybe_decompress(&compressed, true).unwrap();
        assert_eq!(decoded, br#"{"source":"s","logs":[]}"#);
    }

    #[test]
    fn plain_body_is_unchanged_when_gzip_not_set() {
        let decoded = maybe_decompress(b"plain", false).unwrap();
        assert_eq!(decoded, b"plain");
    }

    #[test]
    fn throttled_response_carries_retry_after_header() {
        let err = IngestError::Throttled { retry_after: std::time::Duration::from_secs(5) };
        let response = respond_error(&err);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("retry-after").unwrap(), "5");
    }

    #[test]
    fn non_throttled_response_has_no_retry_after_header() {
        let response = respond_error(&IngestError::not_found("x"));
        assert!(response.headers().get("retry-after").is_none());
    }
}
