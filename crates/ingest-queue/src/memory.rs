//! In-memory fake implementing [`QueueBroker`], used by the contract tests
//! that exercise both implementations and by fast, deterministic
//! `tokio::test`s for the scenarios in §8.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ingest_core::IngestError;
use parking_lot::Mutex;

use crate::broker::{ClaimedRecord, DeliveredRecord, PendingSummary, QueueBroker};

struct Entry {
    id: u64,
    payload: Vec<u8>,
}

struct PendingEntry {
    id: u64,
    consumer: String,
    delivered_at: Instant,
    delivery_count: u32,
}

struct GroupState {
    /// Next id not yet delivered to any member (the `>` cursor).
    next_id: u64,
    pending: Vec<PendingEntry>,
}

struct StreamState {
    entries: VecDeque<Entry>,
    next_id: u64,
    groups: std::collections::HashMap<String, GroupState>,
}

impl Default for StreamState {
    fn default() -> Self {
        Self { entries: VecDeque::new(), next_id: 1, groups: std::collections::HashMap::new() }
    }
}

#[derive(Default)]
pub struct InMemoryQueueBroker {
    streams: Mutex<std::collections::HashMap<String, StreamState>>,
    pub trimmed_unacked_total: std::sync::atomic::AtomicU64,
}

impl InMemoryQueueBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn format_id(id: u64) -> String {
        format!("{id}-0")
    }

    fn parse_id(id: &str) -> u64 {
        id.split('-').next().and_then(|s| s.parse().ok()).unwrap_or(0)
    }
}

#[async_trait]
impl QueueBroker for InMemoryQueueBroker {
    async fn append(&self, stream: &str, payload: &[u8], max_len: u64) -> Result<String, IngestError> {
        let mut streams = self.streams.lock();
        let state = streams.entry(stream.to_string()).or_default();
        let id = state.next_id;
        state.next_id += 1;
        state.entries.push_back(Entry { id, payload: payload.to_vec() });

        while state.entries.len() as u64 > max_len {
            let dropped = state.entries.pop_front().expect("checked non-empty by loop condition");
            let still_pending = state
                .groups
                .values()
                .any(|g| g.pending.iter().any(|p| p.id == dropped.id));
            if still_pending {
                self.trimmed_unacked_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                for group in state.groups.values_mut() {
                    group.pending.retain(|p| p.id != dropped.id);
                }
            }
        }

        Ok(Self::format_id(id))
    }

    async fn append_batch(
        &self,
        stream: &str,
        payloads: &[Vec<u8>],
        max_len: u64,
    ) -> Result<Vec<String>, IngestError> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }
        // One lock acquisition for the whole batch: no other task can
        // observe a partially-appended batch between individual pushes.
        let mut streams = self.streams.lock();
        let state = streams.entry(stream.to_string()).or_default();

        let mut ids = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let id = state.next_id;
            state.next_id += 1;
            state.entries.push_back(Entry { id, payload: payload.clone() });
            ids.push(Self::format_id(id));
        }

        while state.entries.len() as u64 > max_len {
            let dropped = state.entries.pop_front().expect("checked non-empty by loop condition");
            let still_pending = state
                .groups
                .values()
                .any(|g| g.pending.iter().any(|p| p.id == dropped.id));
            if still_pending {
                self.trimmed_unacked_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                for group in state.groups.values_mut() {
                    group.pending.retain(|p| p.id != dropped.id);
                }
            }
        }

        Ok(ids)
    }

    async fn ensure_group(&self, stream: &str, group: &str, start_id: &str) -> Result<(), IngestError> {
        let mut streams = self.streams.lock();
        let state = streams.entry(stream.to_string()).or_default();
        let next_id = if start_id == "$" { state.next_id } else { Self::parse_id(start_id) };
        state.groups.entry(group.to_string()).or_insert_with(|| GroupState { next_id, pending: Vec::new() });
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        max: usize,
        _block_ms: u64,
        only_pending: bool,
    ) -> Result<Vec<DeliveredRecord>, IngestError> {
        let mut streams = self.streams.lock();
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| IngestError::internal(format!("stream {stream} has no state")))?;
        let group_state = state
            .groups
            .get_mut(group)
            .ok_or_else(|| IngestError::internal(format!("group {group} does not exist on {stream}")))?;

        let mut out = Vec::new();

        if only_pending {
            for p in group_state.pending.iter().filter(|p| p.consumer == consumer).take(max) {
                if let Some(entry) = state.entries.iter().find(|e| e.id == p.id) {
                    out.push(DeliveredRecord { id: Self::format_id(p.id), payload: entry.payload.clone() });
                }
            }
            return Ok(out);
        }

        let available: Vec<u64> = state
            .entries
            .iter()
            .map(|e| e.id)
            .filter(|id| *id >= group_state.next_id)
            .take(max)
            .collect();

        for id in available {
            if let Some(entry) = state.entries.iter().find(|e| e.id == id) {
                out.push(DeliveredRecord { id: Self::format_id(id), payload: entry.payload.clone() });
                group_state.pending.push(PendingEntry {
                    id,
                    consumer: consumer.to_string(),
                    delivered_at: Instant::now(),
                    delivery_count: 1,
                });
                group_state.next_id = id + 1;
            }
        }

        Ok(out)
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<(), IngestError> {
        let mut streams = self.streams.lock();
        let Some(state) = streams.get_mut(stream) else { return Ok(()) };
        let Some(group_state) = state.groups.get_mut(group) else { return Ok(()) };
        let ids: Vec<u64> = ids.iter().map(|s| Self::parse_id(s)).collect();
        group_state.pending.retain(|p| !ids.contains(&p.id));
        Ok(())
    }

    async fn oldest_id(&self, stream: &str) -> Result<Option<String>, IngestError> {
        let streams = self.streams.lock();
        Ok(streams.get(stream).and_then(|state| state.entries.front()).map(|entry| Self::format_id(entry.id)))
    }

    async fn pending(&self, stream: &str, group: &str) -> Result<PendingSummary, IngestError> {
        let streams = self.streams.lock();
        let Some(state) = streams.get(stream) else {
            return Ok(PendingSummary { count: 0, min_id: None, max_id: None, per_consumer: Vec::new() });
        };
        let Some(group_state) = state.groups.get(group) else {
            return Ok(PendingSummary { count: 0, min_id: None, max_id: None, per_consumer: Vec::new() });
        };

        let ids: Vec<u64> = group_state.pending.iter().map(|p| p.id).collect();
        let mut per_consumer: std::collections::HashMap<String, u64> = std::collections::HashMap::new();
        for p in &group_state.pending {
            *per_consumer.entry(p.consumer.clone()).or_insert(0) += 1;
        }

        Ok(PendingSummary {
            count: ids.len() as u64,
            min_id: ids.iter().min().copied().map(Self::format_id),
            max_id: ids.iter().max().copied().map(Self::format_id),
            per_consumer: per_consumer.into_iter().collect(),
        })
    }

    async fn claim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        idle_ms: u64,
        count: usize,
    ) -> Result<Vec<ClaimedRecord>, IngestError> {
        let mut streams = self.streams.lock();
        let Some(state) = streams.get_mut(stream) else { return Ok(Vec::new()) };
        let Some(group_state) = state.groups.get_mut(group) else { return Ok(Vec::new()) };

        let idle_threshold = Duration::from_millis(idle_ms);
        let mut claimed_ids = Vec::new();
        for p in group_state.pending.iter_mut() {
            if claimed_ids.len() >= count {
                break;
            }
            if p.delivered_at.elapsed() >= idle_threshold {
                p.consumer = consumer.to_string();
                p.delivered_at = Instant::now();
                p.delivery_count += 1;
                claimed_ids.push((p.id, p.delivery_count));
            }
        }

        let mut out = Vec::new();
        for (id, delivery_count) in claimed_ids {
            if let Some(entry) = state.entries.iter().find(|e| e.id == id) {
                out.push(ClaimedRecord { id: Self::format_id(id), payload: entry.payload.clone(), delivery_count });
            }
        }
        Ok(out)
    }

    async fn trim(&self, stream: &str, max_len: u64) -> Result<u64, IngestError> {
        let mut streams = self.streams.lock();
        let Some(state) = streams.get_mut(stream) else { return Ok(0) };
        let mut trimmed = 0u64;
        while state.entries.len() as u64 > max_len {
            let dropped = state.entries.pop_front().expect("checked non-empty by loop condition");
            let still_pending = state.groups.values().any(|g| g.pending.iter().any(|p| p.id == dropped.id));
            if still_pending {
                self.trimmed_unacked_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                for group in state.groups.values_mut() {
                    group.pending.retain(|p| p.id != dropped.id);
                }
            }
            trimmed += 1;
        }
        Ok(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_then_read_group_delivers_in_id_order() {
        let broker = InMemoryQueueBroker::new();
        broker.ensure_group("s", "g", "0").await.unwrap();
        broker.append("s", b"one", 100).await.unwrap();
        broker.append("s", b"two", 100).await.unwrap();

        let delivered = broker.read_group("s", "g", "c1", 10, 0, false).await.unwrap();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].payload, b"one");
        assert_eq!(delivered[1].payload, b"two");
    }

    #[tokio::test]
    async fn append_batch_assigns_one_id_per_payload_in_order() {
        let broker = InMemoryQueueBroker::new();
        broker.ensure_group("s", "g", "0").await.unwrap();
        let ids = broker
            .append_batch("s", &[b"one".to_vec(), b"two".to_vec(), b"three".to_vec()], 100)
            .await
            .unwrap();
        assert_eq!(ids, vec!["1-0", "2-0", "3-0"]);

        let delivered = broker.read_group("s", "g", "c1", 10, 0, false).await.unwrap();
        assert_eq!(delivered.len(), 3);
        assert_eq!(delivered[0].payload, b"one");
        assert_eq!(delivered[2].payload, b"three");
    }

    #[tokio::test]
    async fn ack_removes_from_pending() {
        let broker = InMemoryQueueBroker::new();
        broker.ensure_group("s", "g", "0").await.unwrap();
        let id = broker.append("s", b"one", 100).await.unwrap();
        broker.read_group("s", "g", "c1", 10, 0, false).await.unwrap();
        broker.ack("s", "g", &[id]).await.unwrap();
        let summary = broker.pending("s", "g").await.unwrap();
        assert_eq!(summary.count, 0);
    }

    #[tokio::test]
    async fn s6_claim_stale_reassigns_after_idle_threshold() {
        let broker = InMemoryQueueBroker::new();
        broker.ensure_group("s", "g", "0").await.unwrap();
        broker.append("s", b"one", 100).await.unwrap();
        broker.read_group("s", "g", "dead-consumer", 10, 0, false).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        let claimed = broker.claim_stale("s", "g", "rescuer", 10, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
    }

    #[tokio::test]
    async fn oldest_id_reflects_front_of_stream_after_trim() {
        let broker = InMemoryQueueBroker::new();
        broker.append("s", b"one", 100).await.unwrap();
        let second = broker.append("s", b"two", 100).await.unwrap();

        assert_eq!(broker.oldest_id("s").await.unwrap(), Some("1-0".to_string()));

        broker.trim("s", 1).await.unwrap();
        assert_eq!(broker.oldest_id("s").await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn trim_past_maxlen_discards_oldest_and_counts_unacked_trims() {
        let broker = InMemoryQueueBroker::new();
        broker.ensure_group("s", "g", "0").await.unwrap();
        broker.append("s", b"one", 100).await.unwrap();
        broker.read_group("s", "g", "c1", 10, 0, false).await.unwrap();
        broker.append("s", b"two", 1).await.unwrap();

        assert_eq!(
            broker.trimmed_unacked_total.load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }
}
