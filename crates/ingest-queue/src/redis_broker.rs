//! Redis Streams implementation of [`QueueBroker`].
//!
//! Maps each trait operation onto the matching Redis command named in the
//! expanded specification: `XADD`/`XGROUP CREATE`/`XREADGROUP`/`XACK`/
//! `XPENDING`/`XCLAIM`/`XTRIM`.

use async_trait::async_trait;
use ingest_core::IngestError;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult};

use crate::broker::{ClaimedRecord, DeliveredRecord, PendingSummary, QueueBroker};

const FIELD: &str = "payload";

pub struct RedisStreamBroker {
    conn: ConnectionManager,
}

impl RedisStreamBroker {
    pub async fn connect(url: &str) -> Result<Self, IngestError> {
        let client = redis::Client::open(url)
            .map_err(|err| IngestError::unavailable("redis.connect", err.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|err| IngestError::unavailable("redis.connect", err.to_string()))?;
        Ok(Self { conn })
    }

    fn map_err(operation: &str, err: redis::RedisError) -> IngestError {
        IngestError::unavailable(operation, err.to_string())
    }
}

#[async_trait]
impl QueueBroker for RedisStreamBroker {
    async fn append(&self, stream: &str, payload: &[u8], max_len: u64) -> Result<String, IngestError> {
        let mut conn = self.conn.clone();
        let id: String = redis::cmd("XADD")
            .arg(stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(max_len)
            .arg("*")
            .arg(FIELD)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|err| Self::map_err("queue.append", err))?;
        Ok(id)
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
        // One round trip, one Lua execution: Redis runs the whole script
        // atomically, so either every XADD lands or (on a script-level
        // error) none of this batch's ids are ever returned to the caller.
        const SCRIPT: &str = r"
            local stream = KEYS[1]
            local maxlen = ARGV[#ARGV]
            local ids = {}
            for i = 1, #ARGV - 1 do
                local id = redis.call('XADD', stream, 'MAXLEN', '~', maxlen, '*', 'payload', ARGV[i])
                table.insert(ids, id)
            end
            return ids
        ";
        let mut conn = self.conn.clone();
        let script = redis::Script::new(SCRIPT);
        let mut invocation = script.key(stream);
        for payload in payloads {
            invocation = invocation.arg(payload.as_slice());
        }
        invocation = invocation.arg(max_len);
        let ids: Vec<String> = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|err| Self::map_err("queue.append_batch", err))?;
        Ok(ids)
    }

    async fn ensure_group(&self, stream: &str, group: &str, start_id: &str) -> Result<(), IngestError> {
        let mut conn = self.conn.clone();
        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg(start_id)
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match result {
            Ok(()) => Ok(()),
            // BUSYGROUP: the group already exists — idempotent no-op (§4.6).
            Err(err) if err.to_string().contains("BUSYGROUP") => Ok(()),
            Err(err) => Err(Self::map_err("queue.ensure_group", err)),
        }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        max: usize,
        block_ms: u64,
        only_pending: bool,
    ) -> Result<Vec<DeliveredRecord>, IngestError> {
        let mut conn = self.conn.clone();
        let cursor = if only_pending { "0" } else { ">" };
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer).arg("COUNT").arg(max);
        if !only_pending {
            cmd.arg("BLOCK").arg(block_ms);
        }
        cmd.arg("STREAMS").arg(stream).arg(cursor);

        let reply: redis::streams::StreamReadReply =
            cmd.query_async(&mut conn).await.map_err(|err| Self::map_err("queue.read_group", err))?;

        let mut out = Vec::new();
        for stream_key in reply.keys {
            for id in stream_key.ids {
                if let Some(value) = id.map.get(FIELD) {
                    if let redis::Value::BulkString(bytes) = value {
                        out.push(DeliveredRecord { id: id.id.clone(), payload: bytes.clone() });
                    }
                }
            }
        }
        Ok(out)
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<(), IngestError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("XACK");
        cmd.arg(stream).arg(group);
        for id in ids {
            cmd.arg(id);
        }
        let _: i64 = cmd.query_async(&mut conn).await.map_err(|err| Self::map_err("queue.ack", err))?;
        Ok(())
    }

    async fn oldest_id(&self, stream: &str) -> Result<Option<String>, IngestError> {
        let mut conn = self.conn.clone();
        let reply: Vec<(String, std::collections::HashMap<String, redis::Value>)> = redis::cmd("XRANGE")
            .arg(stream)
            .arg("-")
            .arg("+")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(|err| Self::map_err("queue.oldest_id", err))?;
        Ok(reply.into_iter().next().map(|(id, _)| id))
    }

    async fn pending(&self, stream: &str, group: &str) -> Result<PendingSummary, IngestError> {
        let mut conn = self.conn.clone();
        let reply: redis::streams::StreamPendingReply = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .query_async(&mut conn)
            .await
            .map_err(|err| Self::map_err("queue.pending", err))?;

        match reply {
            redis::streams::StreamPendingReply::Empty => Ok(PendingSummary {
                count: 0,
                min_id: None,
                max_id: None,
                per_consumer: Vec::new(),
            }),
            redis::streams::StreamPendingReply::Data(data) => Ok(PendingSummary {
                count: data.count as u64,
                min_id: Some(data.start),
                max_id: Some(data.end),
                per_consumer: data
                    .consumers
                    .into_iter()
                    .map(|c| (c.name, c.pending as u64))
                    .collect(),
            }),
        }
    }

    async fn claim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        idle_ms: u64,
        count: usize,
    ) -> Result<Vec<ClaimedRecord>, IngestError> {
        let mut conn = self.conn.clone();
        let ids_result: Vec<(String, i64)> = {
            let summary: redis::streams::StreamPendingCountReply = redis::cmd("XPENDING")
                .arg(stream)
                .arg(group)
                .arg("IDLE")
                .arg(idle_ms)
                .arg("-")
                .arg("+")
                .arg(count)
                .query_async(&mut conn)
                .await
                .map_err(|err| Self::map_err("queue.claim_stale", err))?;
            summary
                .ids
                .into_iter()
                .map(|id| (id.id, id.times_delivered as i64))
                .collect()
        };

        if ids_result.is_empty() {
            return Ok(Vec::new());
        }

        let mut claim_cmd = redis::cmd("XCLAIM");
        claim_cmd.arg(stream).arg(group).arg(consumer).arg(idle_ms);
        for (id, _) in &ids_result {
            claim_cmd.arg(id);
        }
        let reply: redis::streams::StreamClaimReply = claim_cmd
            .query_async(&mut conn)
            .await
            .map_err(|err| Self::map_err("queue.claim_stale", err))?;

        let delivery_counts: std::collections::HashMap<String, i64> = ids_result.into_iter().collect();
        let mut out = Vec::new();
        for id in reply.ids {
            if let Some(value) = id.map.get(FIELD) {
                if let redis::Value::BulkString(bytes) = value {
                    let delivery_count = delivery_counts.get(&id.id).copied().unwrap_or(1).max(1) as u32;
                    out.push(ClaimedRecord { id: id.id.clone(), payload: bytes.clone(), delivery_count });
                }
            }
        }
        Ok(out)
    }

    async fn trim(&self, stream: &str, max_len: u64) -> Result<u64, IngestError> {
        let mut conn = self.conn.clone();
        let trimmed: u64 = conn
            .xtrim(stream, redis::streams::StreamMaxlen::Approx(max_len as usize))
            .await
            .map_err(|err| Self::map_err("queue.trim", err))?;
        Ok(trimmed)
    }
}
