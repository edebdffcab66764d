//! Generic batch driver shared by the log and metric workers (§4.7).
//!
//! Both workers are an instantiation of [`BatchWorker<T>`]: the only
//! differences are the decoded record type `T`, how raw queue bytes
//! decode into it, and which [`Sink`] receives the finished batch.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use ingest_core::backoff;
use ingest_core::observability::Metrics;
use ingest_queue::{ClaimedRecord, QueueBroker};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dead_letter::DeadLetterWriter;
use crate::reclaim;
use crate::sinks::{RecordStatus, Sink};
use crate::state::WorkerState;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub stream: String,
    pub group: String,
    pub consumer: String,
    pub batch_size: usize,
    pub batch_max_age: Duration,
    pub read_block: Duration,
    pub sink_retry_max: u32,
    pub sink_retry_backoff: Duration,
    pub reclaim_idle: Duration,
    pub reclaim_interval: Duration,
    pub shutdown_deadline: Duration,
}

pub struct WorkerHandles {
    pub batch_loop: JoinHandle<()>,
    pub reclaim_loop: JoinHandle<()>,
}

/// One queue record carried through the batch pipeline: its broker id,
/// the decoded value, and the raw bytes (needed for dead-lettering and
/// the identity fingerprint).
type PendingItem<T> = (String, T, Vec<u8>);

pub struct BatchWorker<T> {
    broker: Arc<dyn QueueBroker>,
    dead_letter: Arc<DeadLetterWriter>,
    config: WorkerConfig,
    state: AtomicU8,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> BatchWorker<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(broker: Arc<dyn QueueBroker>, dead_letter: Arc<DeadLetterWriter>, config: WorkerConfig) -> Arc<Self> {
        Arc::new(Self {
            broker,
            dead_letter,
            config,
            state: AtomicU8::new(WorkerState::Starting.into()),
            _marker: std::marker::PhantomData,
        })
    }

    pub fn state(&self) -> WorkerState {
        self.state.load(Ordering::Relaxed).into()
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state.into(), Ordering::Relaxed);
    }

    /// Spawns the batch-consume task and the periodic stale-claim task,
    /// wiring reclaimed records back into the same batch path (§4.7).
    pub fn spawn<D>(
        self: Arc<Self>,
        sink: Arc<dyn Sink<T>>,
        decode: D,
        metrics: Arc<Metrics>,
        token: CancellationToken,
    ) -> WorkerHandles
    where
        D: Fn(&[u8]) -> Result<T, ingest_core::IngestError> + Send + Sync + 'static,
    {
        let (reclaimed_tx, reclaimed_rx) = mpsc::channel::<ClaimedRecord>(self.config.batch_size.max(1));

        let reclaim_consumer = format!("{}-reclaim", self.config.consumer);
        let reclaim_loop = tokio::spawn(reclaim::run(
            self.broker.clone(),
            self.config.stream.clone(),
            self.config.group.clone(),
            reclaim_consumer,
            self.config.reclaim_idle,
            self.config.reclaim_interval,
            self.config.batch_size,
            reclaimed_tx,
            metrics,
            token.clone(),
        ));

        let worker = self.clone();
        let batch_loop =
            tokio::spawn(async move { worker.run(sink, decode, reclaimed_rx, token).await });

        WorkerHandles { batch_loop, reclaim_loop }
    }

    async fn run<D>(
        self: Arc<Self>,
        sink: Arc<dyn Sink<T>>,
        decode: D,
        mut reclaimed_rx: mpsc::Receiver<ClaimedRecord>,
        token: CancellationToken,
    ) where
        D: Fn(&[u8]) -> Result<T, ingest_core::IngestError> + Send + Sync,
    {
        self.set_state(WorkerState::Consuming);
        let mut batch: Vec<PendingItem<T>> = Vec::new();
        let mut batch_started = Instant::now();

        loop {
            if token.is_cancelled() {
                break;
            }

            while let Ok(claimed) = reclaimed_rx.try_recv() {
                match decode(&claimed.payload) {
                    Ok(value) => batch.push((claimed.id, value, claimed.payload)),
                    Err(err) => tracing::warn!(error = %err, id = %claimed.id, "reclaimed record failed to decode"),
                }
            }

            let remaining = self.config.batch_size.saturating_sub(batch.len());
            if remaining > 0 {
                let read = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    read = self.broker.read_group(
                        &self.config.stream,
                        &self.config.group,
                        &self.config.consumer,
                        remaining,
                        self.config.read_block.as_millis() as u64,
                        false,
                    ) => read,
                };
                match read {
                    Ok(records) => {
                        for record in records {
                            match decode(&record.payload) {
                                Ok(value) => batch.push((record.id, value, record.payload)),
                                Err(err) => {
                                    tracing::warn!(error = %err, id = %record.id, "record failed to decode; acking to avoid replay loop");
                                    let _ = self.broker.ack(&self.config.stream, &self.config.group, &[record.id]).await;
                                }
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, stream = %self.config.stream, "read_group failed");
                        tokio::time::sleep(Duration::from_millis(250)).await;
                    }
                }
            }

            let should_flush = !batch.is_empty()
                && (batch.len() >= self.config.batch_size || batch_started.elapsed() >= self.config.batch_max_age);
            if should_flush {
                self.set_state(WorkerState::Flushing);
                self.flush(&sink, &mut batch).await;
                batch_started = Instant::now();
                self.set_state(WorkerState::Consuming);
            }
        }

        self.set_state(WorkerState::Draining);
        let _ = tokio::time::timeout(self.config.shutdown_deadline, self.flush(&sink, &mut batch)).await;
        self.set_state(WorkerState::Stopped);
    }

    /// Writes `batch` to `sink`, acking accepted/poison records and
    /// retrying the remainder with backoff up to `sink_retry_max`
    /// attempts; anything still outstanding after that is left unacked
    /// for reclaim (§4.7).
    async fn flush(&self, sink: &Arc<dyn Sink<T>>, batch: &mut Vec<PendingItem<T>>) {
        if batch.is_empty() {
            return;
        }
        let mut pending = std::mem::take(batch);

        for attempt in 0..=self.config.sink_retry_max {
            let items: Vec<(String, T, Vec<u8>)> =
                pending.iter().map(|(id, value, raw)| (id.clone(), value.clone(), raw.clone())).collect();

            match sink.write(&items).await {
                Ok(outcome) => {
                    let statuses: HashMap<String, RecordStatus> = outcome.statuses.into_iter().collect();
                    let mut acked = Vec::new();
                    let mut retry_next = Vec::new();

                    for (id, value, raw) in pending {
                        match statuses.get(&id) {
                            Some(RecordStatus::Accepted) => acked.push(id),
                            Some(RecordStatus::Poison(reason)) => {
                                if let Err(err) =
                                    self.dead_letter.write(&id, &self.config.stream, reason, &raw).await
                                {
                                    tracing::warn!(error = %err, id, "failed to write dead-letter entry");
                                }
                                acked.push(id);
                            }
                            None => retry_next.push((id, value, raw)),
                        }
                    }

                    if !acked.is_empty() {
                        if let Err(err) = self.broker.ack(&self.config.stream, &self.config.group, &acked).await {
                            tracing::warn!(error = %err, count = acked.len(), "ack failed");
                        }
                    }

                    if retry_next.is_empty() {
                        return;
                    }
                    pending = retry_next;
                }
                Err(err) => {
                    tracing::warn!(error = %err, attempt, stream = %self.config.stream, "sink write failed");
                }
            }

            if attempt == self.config.sink_retry_max {
                tracing::warn!(
                    count = pending.len(),
                    stream = %self.config.stream,
                    "records left unacked after exhausting sink retries; will be reclaimed"
                );
                return;
            }
            let wait = backoff::compute_for_attempt(attempt + 1, self.config.sink_retry_backoff, attempt as u64 + 1);
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ingest_queue::InMemoryQueueBroker;
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone)]
    struct Counted(u32);

    struct FlakySink {
        calls: AtomicUsize,
        fail_first_n: usize,
    }

    #[async_trait]
    impl Sink<Counted> for FlakySink {
        async fn write(
            &self,
            batch: &[(String, Counted, Vec<u8>)],
        ) -> Result<crate::sinks::SinkOutcome, ingest_core::IngestError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first_n {
                return Err(ingest_core::IngestError::unavailable("test-sink", "simulated outage"));
            }
            Ok(crate::sinks::SinkOutcome::accept_all(batch.iter().map(|(id, _, _)| id.clone())))
        }
    }

    #[tokio::test]
    async fn s5_sink_outage_then_recovery_eventually_acks_everything() {
        let broker: Arc<dyn QueueBroker> = Arc::new(InMemoryQueueBroker::new());
        broker.ensure_group("logs:raw", "log-workers", "0").await.unwrap();
        for i in 0..10 {
            broker.append("logs:raw", format!("{i}").as_bytes(), 1000).await.unwrap();
        }

        let config = WorkerConfig {
            stream: "logs:raw".into(),
            group: "log-workers".into(),
            consumer: "w1".into(),
            batch_size: 10,
            batch_max_age: Duration::from_millis(10),
            read_block: Duration::from_millis(0),
            sink_retry_max: 3,
            sink_retry_backoff: Duration::from_millis(1),
            reclaim_idle: Duration::from_secs(60),
            reclaim_interval: Duration::from_secs(60),
            shutdown_deadline: Duration::from_secs(5),
        };
        broker.ensure_group("dead-letter", "x", "0").await.unwrap();
        let dead_letter = Arc::new(DeadLetterWriter::new(broker.clone(), "dead-letter", 1000));
        let worker = BatchWorker::<Counted>::new(broker.clone(), dead_letter, config);

        let sink: Arc<dyn Sink<Counted>> = Arc::new(FlakySink { calls: AtomicUsize::new(0), fail_first_n: 2 });
        let decode = |bytes: &[u8]| -> Result<Counted, ingest_core::IngestError> {
            Ok(Counted(std::str::from_utf8(bytes).unwrap().parse().unwrap()))
        };

        let records = broker.read_group("logs:raw", "log-workers", &worker.config.consumer, 10, 0, false).await.unwrap();
        let batch: Vec<_> = records
            .into_iter()
            .map(|r| {
                let v = decode(&r.payload).unwrap();
                (r.id, v, r.payload)
            })
            .collect();
        let mut batch = batch;
        worker.flush(&sink, &mut batch).await;

        let pending = broker.pending("logs:raw", "log-workers").await.unwrap();
        assert_eq!(pending.count, 0);
    }
}
