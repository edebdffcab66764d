//! Metric sink (§4.7): groups samples by `(job, instance)` and pushes
//! one exposition-format blob per group to
//! `POST /metrics/job/<job>/instance/<instance>` (§6). All-or-nothing
//! per group.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::Request;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use ingest_core::{IngestError, MetricSample};

use super::{RecordStatus, Sink, SinkOutcome};
use crate::transform::metric_samples_to_exposition;

type HttpClient = Client<hyper_util::client::legacy::connect::HttpConnector, Full<Bytes>>;

pub struct MetricSink {
    client: HttpClient,
    base_url: String,
    timeout: std::time::Duration,
}

impl MetricSink {
    pub fn new(base_url: &str, timeout: std::time::Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self { client, base_url: base_url.trim_end_matches('/').to_string(), timeout }
    }

    fn group_url(&self, job: &str, instance: &str) -> Result<hyper::Uri, IngestError> {
        format!(
            "{}/metrics/job/{}/instance/{}",
            self.base_url,
            urlencode(job),
            urlencode(instance)
        )
        .parse()
        .map_err(|err| IngestError::internal(format!("building pushgateway URL: {err}")))
    }

    async fn push_group(
        &self,
        job: &str,
        instance: &str,
        samples: &[MetricSample],
    ) -> Result<(), IngestError> {
        let body = metric_samples_to_exposition(samples);
        let uri = self.group_url(job, instance)?;
        let request = Request::post(uri)
            .header("content-type", "text/plain; version=0.0.4")
            .body(Full::new(Bytes::from(body)))
            .map_err(|err| IngestError::internal(format!("building pushgateway request: {err}")))?;

        let response = tokio::time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| IngestError::unavailable("sink.metric", "pushgateway request timed out"))?
            .map_err(|err| IngestError::unavailable("sink.metric", err.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(IngestError::unavailable(
                "sink.metric",
                format!("pushgateway returned {}", response.status()),
            ))
        }
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[async_trait]
impl Sink<MetricSample> for MetricSink {
    /// All-or-nothing per `(job, instance)` group (§4.7): one group's
    /// HTTP failure does not affect another group's records, matching
    /// the sink's per-group push semantics rather than the log sink's
    /// per-document status.
    async fn write(&self, batch: &[(String, MetricSample, Vec<u8>)]) -> Result<SinkOutcome, IngestError> {
        if batch.is_empty() {
            return Ok(SinkOutcome::default());
        }

        let mut groups: BTreeMap<(String, String), Vec<(String, MetricSample)>> = BTreeMap::new();
        for (record_id, sample, _raw) in batch {
            groups.entry(sample.job_instance()).or_default().push((record_id.clone(), sample.clone()));
        }

        let mut statuses = Vec::with_capacity(batch.len());
        let mut any_transient = false;
        for ((job, instance), items) in &groups {
            let samples: Vec<MetricSample> = items.iter().map(|(_, s)| s.clone()).collect();
            match self.push_group(job, instance, &samples).await {
                Ok(()) => {
                    statuses.extend(items.iter().map(|(id, _)| (id.clone(), RecordStatus::Accepted)));
                }
                Err(_) => {
                    // Left out of `statuses` entirely: the caller treats
                    // ids with no verdict as "leave unacked, retry" (§4.7).
                    any_transient = true;
                }
            }
        }

        if any_transient && statuses.is_empty() {
            return Err(IngestError::unavailable("sink.metric", "all groups failed"));
        }
        Ok(SinkOutcome { statuses })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencode_escapes_reserved_characters() {
        assert_eq!(urlencode("my job"), "my%20job");
        assert_eq!(urlencode("default"), "default");
    }
}
