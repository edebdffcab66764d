//! Sink abstractions (§4.7 sink semantics, §6 sink wire contracts).
//!
//! A [`Sink`] is handed a batch already in sink shape; it owns the HTTP
//! call and reports, per record, whether the sink accepted it, rejected
//! it permanently (poison), or whether the whole attempt should be
//! retried.

mod log_sink;
mod metric_sink;

pub use log_sink::LogSink;
pub use metric_sink::MetricSink;

use async_trait::async_trait;
use ingest_core::IngestError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordStatus {
    /// The sink durably accepted this record; the worker should ack it.
    Accepted,
    /// The sink permanently rejected this record (HTTP 4xx on the
    /// document). The worker acks it anyway (§4.7: "to avoid infinite
    /// replay") and copies it to the dead-letter stream.
    Poison(String),
}

#[derive(Debug, Default)]
pub struct SinkOutcome {
    /// Per-record verdicts for records the sink actually evaluated.
    pub statuses: Vec<(String, RecordStatus)>,
}

impl SinkOutcome {
    pub fn accept_all(ids: impl IntoIterator<Item = String>) -> Self {
        Self { statuses: ids.into_iter().map(|id| (id, RecordStatus::Accepted)).collect() }
    }
}

/// A downstream sink the worker writes batches to. Each item carries the
/// broker-assigned id, the decoded value, and the raw queue-record bytes
/// (needed for the payload half of [`crate::transform::record_identity`]).
/// `write` either returns an outcome (possibly a mix of accepted/poison
/// records) or an `IngestError` — a 5xx/timeout/connection failure — which
/// the caller treats as
/// [`ErrorKind::SinkTransient`](ingest_core::ErrorKind::SinkTransient) and
/// retries the whole batch.
#[async_trait]
pub trait Sink<T>: Send + Sync {
    async fn write(&self, batch: &[(String, T, Vec<u8>)]) -> Result<SinkOutcome, IngestError>;
}
