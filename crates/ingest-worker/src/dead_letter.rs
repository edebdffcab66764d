//! Dead-letter stream (§4.7, §6, GLOSSARY): where poison records are
//! copied before being acked off the main stream, so the sink's
//! rejection reason is not lost.

use std::sync::Arc;

use ingest_core::IngestError;
use ingest_queue::QueueBroker;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct DeadLetterEntry<'a> {
    record_id: &'a str,
    source_stream: &'a str,
    error: &'a str,
    payload: &'a [u8],
}

pub struct DeadLetterWriter {
    broker: Arc<dyn QueueBroker>,
    stream: String,
    max_len: u64,
}

impl DeadLetterWriter {
    pub fn new(broker: Arc<dyn QueueBroker>, stream: impl Into<String>, max_len: u64) -> Self {
        Self { broker, stream: stream.into(), max_len }
    }

    pub async fn write(
        &self,
        record_id: &str,
        source_stream: &str,
        error: &str,
        payload: &[u8],
    ) -> Result<(), IngestError> {
        let entry = DeadLetterEntry { record_id, source_stream, error, payload };
        let body = serde_json::to_vec(&entry)
            .map_err(|err| IngestError::internal(format!("encoding dead-letter entry: {err}")))?;
        self.broker.append(&self.stream, &body, self.max_len).await?;
        tracing::warn!(record_id, source_stream, error, "record copied to dead-letter stream");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_queue::InMemoryQueueBroker;

    #[tokio::test]
    async fn poison_record_lands_in_dead_letter_stream() {
        let broker: Arc<dyn QueueBroker> = Arc::new(InMemoryQueueBroker::new());
        let writer = DeadLetterWriter::new(broker.clone(), "dead-letter", 1000);
        writer.write("1-0", "logs:raw", "mapper_parsing_exception", b"{}").await.unwrap();

        broker.ensure_group("dead-letter", "inspector", "0").await.unwrap();
        let delivered = broker.read_group("dead-letter", "inspector", "c1", 10, 0, false).await.unwrap();
        assert_eq!(delivered.len(), 1);
    }
}
