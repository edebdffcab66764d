//! Log sink (§4.7): a bulk index HTTP endpoint accepting a
//! newline-delimited sequence of `{action}\n{document}` pairs (§6) and
//! returning per-document status.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::Request;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use ingest_core::{IngestError, LogEvent};

use super::{RecordStatus, Sink, SinkOutcome};
use crate::transform::log_event_to_ecs;

type HttpClient = Client<hyper_util::client::legacy::connect::HttpConnector, Full<Bytes>>;

pub struct LogSink {
    client: HttpClient,
    bulk_url: hyper::Uri,
    timeout: std::time::Duration,
}

impl LogSink {
    pub fn new(bulk_url: &str, timeout: std::time::Duration) -> Result<Self, IngestError> {
        let uri: hyper::Uri = bulk_url
            .parse()
            .map_err(|err| IngestError::internal(format!("invalid SINK_LOG_URL {bulk_url:?}: {err}")))?;
        let client = Client::builder(TokioExecutor::new()).build_http();
        Ok(Self { client, bulk_url: uri, timeout })
    }

    fn build_body(&self, batch: &[(String, LogEvent, Vec<u8>)]) -> (Vec<String>, String) {
        let mut body = String::new();
        let mut record_ids = Vec::with_capacity(batch.len());
        for (record_id, event, raw) in batch {
            let doc = log_event_to_ecs(record_id, raw, event);
            body.push_str(&doc.action_line);
            body.push('\n');
            body.push_str(&doc.document_line);
            body.push('\n');
            record_ids.push(record_id.clone());
        }
        (record_ids, body)
    }
}

#[async_trait]
impl Sink<LogEvent> for LogSink {
    async fn write(&self, batch: &[(String, LogEvent, Vec<u8>)]) -> Result<SinkOutcome, IngestError> {
        if batch.is_empty() {
            return Ok(SinkOutcome::default());
        }
        let (record_ids, body) = self.build_body(batch);

        let request = Request::post(self.bulk_url.clone())
            .header("content-type", "application/x-ndjson")
            .body(Full::new(Bytes::from(body)))
            .map_err(|err| IngestError::internal(format!("building bulk request: {err}")))?;

        let response = tokio::time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| IngestError::unavailable("sink.log", "bulk index request timed out"))?
            .map_err(|err| IngestError::unavailable("sink.log", err.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(IngestError::unavailable("sink.log", format!("bulk index returned {status}")));
        }

        let body_bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|err| IngestError::unavailable("sink.log", err.to_string()))?
            .to_bytes();

        if status.is_client_error() {
            // Whole-batch 4xx: every document in this batch is poison.
            return Ok(SinkOutcome {
                statuses: record_ids
                    .into_iter()
                    .map(|id| (id, RecordStatus::Poison(format!("bulk index rejected batch: {status}"))))
                    .collect(),
            });
        }

        Ok(parse_bulk_response(&record_ids, &body_bytes))
    }
}

/// Parses the Elasticsearch-style `{"items": [{"index": {"status": N, ...}}, ...]}`
/// bulk response shape, mapping each item back onto the record id at the
/// same position.
fn parse_bulk_response(record_ids: &[String], body: &[u8]) -> SinkOutcome {
    let parsed: Option<serde_json::Value> = serde_json::from_slice(body).ok();
    let items = parsed
        .as_ref()
        .and_then(|v| v.get("items"))
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let mut statuses = Vec::with_capacity(record_ids.len());
    for (idx, record_id) in record_ids.iter().enumerate() {
        let item_status = items
            .get(idx)
            .and_then(|item| item.get("index"))
            .and_then(|index| index.get("status"))
            .and_then(|s| s.as_u64())
            .unwrap_or(200);

        if (400..500).contains(&item_status) {
            let reason = items
                .get(idx)
                .and_then(|item| item.get("index"))
                .and_then(|index| index.get("error"))
                .map(|e| e.to_string())
                .unwrap_or_else(|| format!("status {item_status}"));
            statuses.push((record_id.clone(), RecordStatus::Poison(reason)));
        } else {
            statuses.push((record_id.clone(), RecordStatus::Accepted));
        }
    }
    SinkOutcome { statuses }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_document_4xx_is_poison_others_accepted() {
        let ids = vec!["1-0".to_string(), "2-0".to_string()];
        let body = serde_json::json!({
            "items": [
                {"index": {"status": 200}},
                {"index": {"status": 400, "error": "mapper_parsing_exception"}}
            ]
        });
        let outcome = parse_bulk_response(&ids, body.to_string().as_bytes());
        assert_eq!(outcome.statuses[0].1, RecordStatus::Accepted);
        assert!(matches!(outcome.statuses[1].1, RecordStatus::Poison(_)));
    }

    #[test]
    fn missing_items_defaults_to_accepted() {
        let ids = vec!["1-0".to_string()];
        let outcome = parse_bulk_response(&ids, b"{}");
        assert_eq!(outcome.statuses[0].1, RecordStatus::Accepted);
    }
}
