//! The sender's batch submission loop (§4.8): serialise, compress if
//! enabled, attempt with the current protocol, fall back or promote per
//! [`state::ProtocolState`], retry transient failures with backoff.

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ingest_core::backoff;
use ingest_core::observability::Metrics;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::state::ProtocolState;
use crate::transport::{BatchTransport, SendError};

#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Promotion cooldown after falling back to HTTP/1.1 before the next
    /// HTTP/3 probe is attempted (§4.8, e.g. 5 min).
    pub promotion_cooldown: Duration,
    /// Bounded attempt count per protocol before the batch is dropped.
    pub retry_max: u32,
    pub retry_backoff: Duration,
    /// Capacity of the internal submission channel; excess batches are
    /// dropped rather than buffered (§4.8 "send buffer is bounded").
    pub buffer_capacity: usize,
    pub compress: bool,
}

struct PendingBatch {
    path: &'static str,
    body: Bytes,
}

/// Edge-side transport used by external collectors to push into the
/// log/metric HTTP receivers, preferring HTTP/3 with automatic fallback.
pub struct AdaptiveSender {
    h3: Arc<dyn BatchTransport>,
    http1: Arc<dyn BatchTransport>,
    state: Mutex<ProtocolState>,
    config: SenderConfig,
    metrics: Arc<Metrics>,
    tx: mpsc::Sender<PendingBatch>,
    rx: Mutex<Option<mpsc::Receiver<PendingBatch>>>,
}

impl AdaptiveSender {
    pub fn new(
        h3: Arc<dyn BatchTransport>,
        http1: Arc<dyn BatchTransport>,
        config: SenderConfig,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.buffer_capacity.max(1));
        Arc::new(Self {
            h3,
            http1,
            state: Mutex::new(ProtocolState::new(config.promotion_cooldown)),
            config,
            metrics,
            tx,
            rx: Mutex::new(Some(rx)),
        })
    }

    /// Serialises `logs` (or `metrics`) and enqueues the batch for the send
    /// loop. Returns `false` (and increments the drop counter) if the
    /// bounded buffer is full.
    pub fn submit_logs(&self, payload: &serde_json::Value) -> bool {
        self.submit("/api/v1/logs", payload)
    }

    pub fn submit_metrics(&self, payload: &serde_json::Value) -> bool {
        self.submit("/api/v1/metrics", payload)
    }

    fn submit(&self, path: &'static str, payload: &serde_json::Value) -> bool {
        let serialised = match serde_json::to_vec(payload) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialise batch; dropping");
                return false;
            }
        };
        let body = Bytes::from(serialised);
        match self.tx.try_send(PendingBatch { path, body }) {
            Ok(()) => true,
            Err(_) => {
                self.metrics.sender_dropped_total.inc();
                tracing::warn!(path, "sender buffer full; dropping batch");
                false
            }
        }
    }

    /// Runs the send loop until `token` is cancelled or the channel is
    /// closed (all senders dropped).
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let rx = self.rx.lock().take().expect("AdaptiveSender::spawn called more than once");
        tokio::spawn(async move { self.run(rx, token).await })
    }

    async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<PendingBatch>, token: CancellationToken) {
        loop {
            let batch = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                batch = rx.recv() => batch,
            };
            let Some(batch) = batch else { return };
            self.send_with_retry(batch).await;
        }
    }

    async fn send_with_retry(&self, batch: PendingBatch) {
        let (body, encoding) = self.maybe_compress(batch.body);

        for attempt in 0..=self.config.retry_max {
            let use_h3 = self.state.lock().use_h3();
            let transport: &Arc<dyn BatchTransport> = if use_h3 { &self.h3 } else { &self.http1 };

            match transport.send(batch.path, encoding, body.clone()).await {
                Ok(()) => {
                    if !use_h3 {
                        self.state.lock().on_http1_success();
                    }
                    return;
                }
                Err(SendError::ProtocolUnavailable(reason)) if use_h3 => {
                    tracing::warn!(reason, "http/3 unavailable; falling back to http/1.1");
                    self.metrics.sender_protocol_fallbacks_total.inc();
                    self.state.lock().on_h3_unavailable();
                    // Retry immediately on the fallback protocol (§4.8), not
                    // counted against this attempt's backoff.
                    match self.http1.send(batch.path, encoding, body.clone()).await {
                        Ok(()) => return,
                        Err(SendError::Rejected { status }) => {
                            tracing::warn!(status, "batch rejected by http/1.1 fallback; dropping");
                            return;
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "http/1.1 fallback also failed");
                        }
                    }
                }
                Err(SendError::Rejected { status }) => {
                    tracing::warn!(status, path = batch.path, "batch rejected; dropping (non-retryable)");
                    return;
                }
                Err(err) => {
                    tracing::warn!(error = %err, attempt, path = batch.path, "batch send failed");
                }
            }

            if attempt == self.config.retry_max {
                tracing::warn!(path = batch.path, "exhausted retries; dropping batch");
                self.metrics.sender_dropped_total.inc();
                return;
            }
            let wait = backoff::compute_for_attempt(attempt + 1, self.config.retry_backoff, attempt as u64 + 1);
            tokio::time::sleep(wait).await;
        }
    }

    fn maybe_compress(&self, body: Bytes) -> (Bytes, Option<&'static str>) {
        if !self.config.compress {
            return (body, None);
        }
        use flate2::Compression;
        use flate2::write::GzEncoder;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        if encoder.write_all(&body).is_err() {
            return (body, None);
        }
        match encoder.finish() {
            Ok(compressed) => (Bytes::from(compressed), Some("gzip")),
            Err(_) => (body, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AlwaysUnavailable;
    #[async_trait]
    impl BatchTransport for AlwaysUnavailable {
        async fn send(&self, _path: &str, _enc: Option<&str>, _body: Bytes) -> Result<(), SendError> {
            Err(SendError::ProtocolUnavailable("refused".into()))
        }
    }

    struct CountingSuccess {
        calls: AtomicUsize,
    }
    #[async_trait]
    impl BatchTransport for CountingSuccess {
        async fn send(&self, _path: &str, _enc: Option<&str>, _body: Bytes) -> Result<(), SendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config() -> SenderConfig {
        SenderConfig {
            promotion_cooldown: Duration::from_secs(300),
            retry_max: 2,
            retry_backoff: Duration::from_millis(1),
            buffer_capacity: 8,
            compress: false,
        }
    }

    #[tokio::test]
    async fn falls_back_to_http1_when_h3_unavailable() {
        let h3 = Arc::new(AlwaysUnavailable);
        let http1 = Arc::new(CountingSuccess { calls: AtomicUsize::new(0) });
        let sender = AdaptiveSender::new(h3, http1.clone(), config(), Arc::new(Metrics::default()));

        sender.send_with_retry(PendingBatch { path: "/api/v1/logs", body: Bytes::from_static(b"{}") }).await;

        assert_eq!(http1.calls.load(Ordering::SeqCst), 1);
        assert!(!sender.state.lock().use_h3());
    }

    #[tokio::test]
    async fn submit_drops_when_buffer_full() {
        let h3 = Arc::new(AlwaysUnavailable);
        let http1 = Arc::new(AlwaysUnavailable);
        let mut cfg = config();
        cfg.buffer_capacity = 1;
        let metrics = Arc::new(Metrics::default());
        let sender = AdaptiveSender::new(h3, http1, cfg, metrics.clone());

        assert!(sender.submit_logs(&serde_json::json!({"a": 1})));
        assert!(!sender.submit_logs(&serde_json::json!({"a": 2})));
        assert_eq!(metrics.sender_dropped_total.get(), 1);
    }
}
