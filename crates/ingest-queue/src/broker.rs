//! Queue broker interface (C7, §4.6): the narrow contract every receiver
//! and worker speaks against, regardless of which durable stream
//! implementation backs it.

use async_trait::async_trait;
use ingest_core::IngestError;

#[derive(Debug, Clone)]
pub struct PendingSummary {
    pub count: u64,
    pub min_id: Option<String>,
    pub max_id: Option<String>,
    pub per_consumer: Vec<(String, u64)>,
}

#[derive(Debug, Clone)]
pub struct DeliveredRecord {
    pub id: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ClaimedRecord {
    pub id: String,
    pub payload: Vec<u8>,
    pub delivery_count: u32,
}

/// Stream abstraction named in §4.6: `append`, `ensureGroup`, `readGroup`,
/// `ack`, `pending`, `claimStale`, plus `trim` for MAXLEN enforcement.
///
/// Ordering: within a single stream, ids increase monotonically.
/// Duplication: consumers must be idempotent (§4.6) — retrying a failed
/// `ack` or re-delivering after a crash is expected, not exceptional.
#[async_trait]
pub trait QueueBroker: Send + Sync {
    /// Durably appends `payload` to `stream`, trimming to approximately
    /// `max_len` oldest-first if the stream exceeds it. Returns the
    /// broker-assigned record id.
    async fn append(&self, stream: &str, payload: &[u8], max_len: u64) -> Result<String, IngestError>;

    /// Durably appends every payload in `payloads` to `stream` as a single
    /// atomic operation: either every record gets an id or none do. A
    /// receiver ingesting a batch must use this instead of looping
    /// `append` per record, so that a failure partway through a batch
    /// cannot leave a subset of it durably enqueued (§4.4). Returns one
    /// id per payload, in the same order as `payloads`.
    async fn append_batch(
        &self,
        stream: &str,
        payloads: &[Vec<u8>],
        max_len: u64,
    ) -> Result<Vec<String>, IngestError>;

    /// Idempotent: creating a group that already exists is a no-op success.
    async fn ensure_group(&self, stream: &str, group: &str, start_id: &str) -> Result<(), IngestError>;

    /// Delivers up to `max` records not yet delivered to any group member,
    /// or the caller's own still-pending records if `only_pending` is set
    /// (the `0` form of `readGroup` in §4.6), blocking up to `block_ms` if
    /// nothing is immediately available.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        max: usize,
        block_ms: u64,
        only_pending: bool,
    ) -> Result<Vec<DeliveredRecord>, IngestError>;

    /// Removes `ids` from the group's pending list. The only normal
    /// removal path (§4.6).
    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<(), IngestError>;

    async fn pending(&self, stream: &str, group: &str) -> Result<PendingSummary, IngestError>;

    /// The id of the oldest record still retained by `stream`, or `None`
    /// if the stream is empty. Used by the reclaim loop to detect when
    /// MAXLEN trimming has discarded a record that was still pending
    /// (§9 open question) — compare against [`PendingSummary::min_id`].
    async fn oldest_id(&self, stream: &str) -> Result<Option<String>, IngestError>;

    /// Reassigns records pending for longer than `idle_ms` to `consumer`.
    async fn claim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        idle_ms: u64,
        count: usize,
    ) -> Result<Vec<ClaimedRecord>, IngestError>;

    /// Bounds stream length at approximately `max_len`, discarding oldest
    /// records first. May discard unacked records — accepted data loss at
    /// the cap (§4.6); callers should increment
    /// `records_trimmed_unacked_total` (§9 open question) when they know a
    /// trimmed id was still pending.
    async fn trim(&self, stream: &str, max_len: u64) -> Result<u64, IngestError>;
}
