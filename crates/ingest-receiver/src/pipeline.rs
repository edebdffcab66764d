//! Transport-neutral request pipeline (§4.4 steps 1-5), shared by the
//! HTTP/3, HTTP/1.1 and UDP syslog receivers: gate, decode, validate,
//! enqueue.

use std::net::IpAddr;
use std::sync::Arc;

use ingest_core::observability::Metrics;
use ingest_core::{IngestError, LogEvent, MetricSample};
use ingest_gate::{authenticate, AdmissionTable, CredentialKind, RateLimiterGate, RecordKind, SourceResolver};
use ingest_queue::QueueBroker;
use serde::Deserialize;
use tokio::sync::Semaphore;

/// `POST /api/v1/logs` body (§6): `{source, application, logs: [LogEvent]}`.
#[derive(Debug, Deserialize)]
pub struct LogsRequest {
    pub source: String,
    #[serde(default)]
    pub application: Option<String>,
    pub logs: Vec<LogEvent>,
}

/// `POST /api/v1/metrics` body (§6): `{source, metrics: [MetricSample]}`.
#[derive(Debug, Deserialize)]
pub struct MetricsRequest {
    pub source: String,
    pub metrics: Vec<MetricSample>,
}

/// Everything a receiver needs to run the gate + enqueue pipeline,
/// independent of which transport terminated the request.
pub struct PipelineContext {
    pub admission: Arc<AdmissionTable>,
    pub resolver: Arc<dyn SourceResolver>,
    pub rate_limiter: Arc<RateLimiterGate>,
    pub broker: Arc<dyn QueueBroker>,
    pub log_stream: String,
    pub metric_stream: String,
    pub stream_maxlen: u64,
    /// Bounds the receiver's internal in-flight enqueue count (§4.4:
    /// "internal enqueue channel is bounded; when full, the receiver
    /// sheds with 503 rather than buffering unbounded").
    pub enqueue_permits: Arc<Semaphore>,
    pub metrics: Arc<Metrics>,
}

impl PipelineContext {
    /// Runs the gate (auth + rate limit) for one request, independent of
    /// payload kind. Admission (CIDR/port) is checked once per
    /// connection/datagram by the transport layer, not here.
    async fn gate(
        &self,
        credential: CredentialKind,
        credential_value: &str,
        client_addr: IpAddr,
        kind: RecordKind,
    ) -> Result<ingest_core::Source, IngestError> {
        self.metrics.requests_total.inc();
        let source = authenticate(self.resolver.as_ref(), credential, credential_value, client_addr)
            .await
            .inspect_err(|_| self.metrics.requests_rejected_total.inc())?;
        let verdict = self.rate_limiter.check(&source.id, source.tier, kind, client_addr);
        if let ingest_gate::RateVerdict::Throttle { retry_after } = verdict {
            self.metrics.rate_limit_throttled_total.inc();
            self.metrics.requests_rejected_total.inc();
            return Err(IngestError::Throttled { retry_after });
        }
        Ok(source)
    }

    /// §4.4 steps 2-5 for a log batch: validate every record, reject the
    /// whole batch on any schema violation, then append the whole batch
    /// to the log stream in a single atomic call so a mid-batch broker
    /// failure cannot leave a subset of it durably enqueued. Returns the
    /// count successfully enqueued.
    pub async fn ingest_logs(
        &self,
        credential: CredentialKind,
        credential_value: &str,
        client_addr: IpAddr,
        request: LogsRequest,
    ) -> Result<u32, IngestError> {
        let source = self.gate(credential, credential_value, client_addr, RecordKind::Log).await?;

        for event in &request.logs {
            event.validate()?;
        }
        if request.logs.is_empty() {
            return Ok(0);
        }

        let permits = u32::try_from(request.logs.len()).unwrap_or(u32::MAX);
        let _permit = self
            .enqueue_permits
            .clone()
            .try_acquire_many_owned(permits)
            .map_err(|_| IngestError::unavailable("receiver.enqueue", "internal enqueue channel is full"))?;

        let payloads = request
            .logs
            .iter()
            .map(|event| {
                serde_json::to_vec(&StreamPayload::Log { source_id: &source.id, event })
                    .map_err(|err| IngestError::internal(format!("encoding log record: {err}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let ids = self.broker.append_batch(&self.log_stream, &payloads, self.stream_maxlen).await?;
        self.metrics.records_enqueued_total.add(ids.len() as u64);
        Ok(ids.len() as u32)
    }

    /// §4.4 steps 2-5 for a metric batch, same atomic-append shape as
    /// [`Self::ingest_logs`].
    pub async fn ingest_metrics(
        &self,
        credential: CredentialKind,
        credential_value: &str,
        client_addr: IpAddr,
        request: MetricsRequest,
    ) -> Result<u32, IngestError> {
        let source = self.gate(credential, credential_value, client_addr, RecordKind::Metric).await?;

        for sample in &request.metrics {
            sample.validate()?;
        }
        if request.metrics.is_empty() {
            return Ok(0);
        }

        let permits = u32::try_from(request.metrics.len()).unwrap_or(u32::MAX);
        let _permit = self
            .enqueue_permits
            .clone()
            .try_acquire_many_owned(permits)
            .map_err(|_| IngestError::unavailable("receiver.enqueue", "internal enqueue channel is full"))?;

        let payloads = request
            .metrics
            .iter()
            .map(|sample| {
                serde_json::to_vec(&StreamPayload::Metric { source_id: &source.id, sample })
                    .map_err(|err| IngestError::internal(format!("encoding metric record: {err}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let ids = self.broker.append_batch(&self.metric_stream, &payloads, self.stream_maxlen).await?;
        self.metrics.records_enqueued_total.add(ids.len() as u64);
        Ok(ids.len() as u32)
    }

    /// Enqueues one already-normalised log event from the syslog path
    /// (§4.5), which has no per-request credential — source identity
    /// comes from the UDP port binding instead (checked by the caller).
    pub async fn ingest_syslog_event(&self, source_id: &str, event: &LogEvent) -> Result<(), IngestError> {
        event.validate()?;
        let _permit = self
            .enqueue_permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| IngestError::unavailable("receiver.enqueue", "internal enqueue channel is full"))?;
        let payload = serde_json::to_vec(&StreamPayload::Log { source_id, event })
            .map_err(|err| IngestError::internal(format!("encoding syslog record: {err}")))?;
        self.broker.append(&self.log_stream, &payload, self.stream_maxlen).await?;
        self.metrics.records_enqueued_total.inc();
        Ok(())
    }
}

/// Wire shape written to the queue: the resolved source id travels with
/// the record so the worker tier doesn't need a second catalogue lookup.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind")]
enum StreamPayload<'a> {
    #[serde(rename = "log")]
    Log { source_id: &'a str, event: &'a LogEvent },
    #[serde(rename = "metric")]
    Metric { source_id: &'a str, sample: &'a MetricSample },
}

/// Decodes one queue record back into a [`LogEvent`], for the log worker.
pub fn decode_log_record(bytes: &[u8]) -> Result<LogEvent, IngestError> {
    #[derive(Deserialize)]
    struct Owned {
        event: LogEvent,
    }
    let owned: Owned = serde_json::from_slice(bytes)
        .map_err(|err| IngestError::invalid_input(format!("decoding log record: {err}")))?;
    Ok(owned.event)
}

/// Decodes one queue record back into a [`MetricSample`], for the metric
/// worker.
pub fn decode_metric_record(bytes: &[u8]) -> Result<MetricSample, IngestError> {
    #[derive(Deserialize)]
    struct Owned {
        sample: MetricSample,
    }
    let owned: Owned = serde_json::from_slice(bytes)
        .map_err(|err| IngestError::invalid_input(format!("decoding metric record: {err}")))?;
    Ok(owned.sample)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use ingest_core::{LogLevel, Tier};
    use ingest_queue::InMemoryQueueBroker;
    use std::collections::BTreeMap;

    struct FixedResolver;

    #[async_trait]
    impl SourceResolver for FixedResolver {
        async fn by_api_key(&self, _key: &str) -> Result<ingest_core::Source, IngestError> {
            Ok(ingest_core::Source {
                id: "web-application".into(),
                name: "web-application".into(),
                api_keys: vec!["K1".into()],
                bearer_subjects: vec![],
                mtls_subject: None,
                allowed_clients: vec![],
                udp_port: None,
                enabled: true,
                tier: Tier::Community,
                created_at: Utc::now(),
                last_seen: None,
                cache_fetched_at: std::time::Instant::now(),
            })
        }
        async fn by_bearer(&self, _token: &str) -> Result<ingest_core::Source, IngestError> {
            Err(IngestError::not_found("bearer"))
        }
        async fn by_subject(&self, _subject: &str) -> Result<ingest_core::Source, IngestError> {
            Err(IngestError::not_found("subject"))
        }
        async fn by_udp_port(&self, _port: u16) -> Result<ingest_core::Source, IngestError> {
            Err(IngestError::not_found("port"))
        }
    }

    fn context() -> PipelineContext {
        let broker: Arc<dyn QueueBroker> = Arc::new(InMemoryQueueBroker::new());
        PipelineContext {
            admission: Arc::new(AdmissionTable::passthrough()),
            resolver: Arc::new(FixedResolver),
            rate_limiter: Arc::new(RateLimiterGate::new(ingest_core::config::RateTiers {
                community: ingest_core::config::RateLimit::Unlimited,
                professional: ingest_core::config::RateLimit::Unlimited,
                enterprise: ingest_core::config::RateLimit::Unlimited,
            })),
            broker,
            log_stream: "logs:raw".into(),
            metric_stream: "metrics:raw".into(),
            stream_maxlen: 1000,
            enqueue_permits: Arc::new(Semaphore::new(16)),
            metrics: Arc::new(Metrics::default()),
        }
    }

    #[tokio::test]
    async fn well_formed_batch_is_fully_enqueued() {
        let ctx = context();
        let request = LogsRequest {
            source: "web-application".into(),
            application: Some("checkout".into()),
            logs: vec![LogEvent {
                timestamp: Utc::now(),
                level: LogLevel::Info,
                message: "hello".into(),
                service_name: "checkout".into(),
                host: None,
                labels: BTreeMap::new(),
                tags: vec![],
                trace_id: None,
                span_id: None,
                transaction_id: None,
                schema_version: "1".into(),
            }],
        };
        let processed = ctx
            .ingest_logs(CredentialKind::ApiKey, "K1", "127.0.0.1".parse().unwrap(), request)
            .await
            .unwrap();
        assert_eq!(processed, 1);
    }

    #[tokio::test]
    async fn multi_record_batch_is_enqueued_in_one_atomic_append() {
        let ctx = context();
        let make_event = |message: &str| LogEvent {
            timestamp: Utc::now(),
            level: LogLevel::Info,
            message: message.into(),
            service_name: "checkout".into(),
            host: None,
            labels: BTreeMap::new(),
            tags: vec![],
            trace_id: None,
            span_id: None,
            transaction_id: None,
            schema_version: "1".into(),
        };
        let request = LogsRequest {
            source: "web-application".into(),
            application: None,
            logs: vec![make_event("one"), make_event("two"), make_event("three")],
        };
        let processed = ctx
            .ingest_logs(CredentialKind::ApiKey, "K1", "127.0.0.1".parse().unwrap(), request)
            .await
            .unwrap();
        assert_eq!(processed, 3);

        ctx.broker.ensure_group(&ctx.log_stream, "readers", "0").await.unwrap();
        let delivered = ctx.broker.read_group(&ctx.log_stream, "readers", "c1", 10, 0, false).await.unwrap();
        assert_eq!(delivered.len(), 3);
    }

    #[tokio::test]
    async fn batch_with_one_invalid_record_is_rejected_whole() {
        let ctx = context();
        let request = LogsRequest {
            source: "web-application".into(),
            application: None,
            logs: vec![LogEvent {
                timestamp: Utc::now(),
                level: LogLevel::Info,
                message: String::new(),
                service_name: "checkout".into(),
                host: None,
                labels: BTreeMap::new(),
                tags: vec![],
                trace_id: None,
                span_id: None,
                transaction_id: None,
                schema_version: "1".into(),
            }],
        };
        let err = ctx
            .ingest_logs(CredentialKind::ApiKey, "K1", "127.0.0.1".parse().unwrap(), request)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ingest_core::ErrorKind::InvalidInput);
    }
}
