//! Durable event queue over Redis Streams consumer groups.
//!
//! Maps the lease/ack/nack contract directly onto `XREADGROUP`/`XACK`:
//! leasing an entry is reading it into a consumer's pending-entries list,
//! acking is `XACK`, and crash recovery is `XAUTOCLAIM` sweeping entries
//! whose idle time exceeds the lease timeout back to any live consumer.
//!
//! Deliberately does not deduplicate — a segment redelivered after a crash
//! is expected, and idempotency is enforced downstream by the result
//! store's unique key, not here.

use redis::aio::MultiplexedConnection;
use redis::streams::{StreamClaimReply, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client, RedisResult};
use std::sync::Arc;
use std::time::Duration;
use vpipe_core::metrics::Metrics;
use vpipe_core::models::SegmentEvent;

const PAYLOAD_FIELD: &str = "payload";

#[derive(Debug, Clone)]
pub struct LeaseToken {
    pub entry_id: String,
}

pub struct Queue {
    client: Client,
    stream_key: String,
    group: String,
    metrics: Arc<Metrics>,
}

impl Queue {
    /// Opens a connection and ensures the consumer group exists
    /// (`XGROUP CREATE ... MKSTREAM`, ignoring `BUSYGROUP` if it already
    /// does).
    pub async fn connect(
        redis_url: &str,
        stream_key: &str,
        group: &str,
        metrics: Arc<Metrics>,
    ) -> redis::RedisResult<Self> {
        let client = Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;

        let created: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream_key)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        if let Err(e) = created {
            if !e.to_string().contains("BUSYGROUP") {
                return Err(e);
            }
        }

        Ok(Self {
            client,
            stream_key: stream_key.to_string(),
            group: group.to_string(),
            metrics,
        })
    }

    async fn conn(&self) -> redis::RedisResult<MultiplexedConnection> {
        self.client.get_multiplexed_async_connection().await
    }

    /// `XADD <stream> * payload <json>`. Returns the new stream length.
    pub async fn enqueue(&self, event: &SegmentEvent) -> redis::RedisResult<u64> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(event)
            .map_err(|e| redis::RedisError::from((redis::ErrorKind::TypeError, "serialize", e.to_string())))?;

        let _: String = conn
            .xadd(&self.stream_key, "*", &[(PAYLOAD_FIELD, payload)])
            .await?;
        let depth: u64 = conn.xlen(&self.stream_key).await?;
        self.metrics.queue_depth.set(depth as i64);
        Ok(depth)
    }

    /// Blocks up to `block` waiting for a new entry, reading it into
    /// `consumer`'s pending-entries list. Returns `None` on timeout.
    pub async fn lease(
        &self,
        consumer: &str,
        block: Duration,
    ) -> redis::RedisResult<Option<(SegmentEvent, LeaseToken)>> {
        let mut conn = self.conn().await?;
        let opts = StreamReadOptions::default()
            .group(&self.group, consumer)
            .count(1)
            .block(block.as_millis() as usize);

        let reply: StreamReadReply = conn
            .xread_options(&[&self.stream_key], &[">"], &opts)
            .await?;

        for stream in reply.keys {
            for id in stream.ids {
                let Some(raw) = id.map.get(PAYLOAD_FIELD) else {
                    continue;
                };
                let redis::Value::BulkString(bytes) = raw else {
                    continue;
                };
                let event: SegmentEvent = serde_json::from_slice(bytes).map_err(|e| {
                    redis::RedisError::from((redis::ErrorKind::TypeError, "deserialize", e.to_string()))
                })?;
                self.metrics.leases_active.inc();
                return Ok(Some((event, LeaseToken { entry_id: id.id })));
            }
        }
        Ok(None)
    }

    /// Idempotent: acking an already-acked or unknown entry id is not an error.
    pub async fn ack(&self, token: &LeaseToken) -> redis::RedisResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.xack(&self.stream_key, &self.group, &[&token.entry_id]).await?;
        self.metrics.leases_active.dec();
        Ok(())
    }

    /// Acks the original entry then re-enqueues `event` (with `attempts`
    /// incremented by the caller) as a fresh entry, the coarse-grained
    /// equivalent of "return to the queue after `retry_after`" that Redis
    /// Streams affords — the caller is responsible for sleeping
    /// `retry_after` before calling this, or scheduling the nack from a
    /// delayed task.
    pub async fn nack(&self, token: &LeaseToken, event: &SegmentEvent) -> redis::RedisResult<u64> {
        self.ack(token).await?;
        self.enqueue(event).await
    }

    pub async fn length(&self) -> redis::RedisResult<u64> {
        let mut conn = self.conn().await?;
        conn.xlen(&self.stream_key).await
    }

    /// Peek at the oldest entry in the stream without leasing it.
    pub async fn peek(&self) -> redis::RedisResult<Option<SegmentEvent>> {
        let mut conn = self.conn().await?;
        let ids: Vec<redis::streams::StreamId> = redis::cmd("XRANGE")
            .arg(&self.stream_key)
            .arg("-")
            .arg("+")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await?;

        for id in ids {
            if let Some(redis::Value::BulkString(bytes)) = id.map.get(PAYLOAD_FIELD) {
                let event: SegmentEvent = serde_json::from_slice(bytes).map_err(|e| {
                    redis::RedisError::from((redis::ErrorKind::TypeError, "deserialize", e.to_string()))
                })?;
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    /// Claims back entries idle for longer than `min_idle` to `consumer`,
    /// the only mechanism by which a crashed worker's leased-but-unacked
    /// events become claimable again. Returns the reclaimed events.
    pub async fn reclaim_expired(
        &self,
        consumer: &str,
        min_idle: Duration,
    ) -> redis::RedisResult<Vec<(SegmentEvent, LeaseToken)>> {
        let mut conn = self.conn().await?;
        let reply: StreamClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(consumer)
            .arg(min_idle.as_millis() as usize)
            .arg("0-0")
            .arg("COUNT")
            .arg(100)
            .query_async(&mut conn)
            .await?;

        let mut claimed = Vec::with_capacity(reply.ids.len());
        for id in reply.ids {
            if let Some(redis::Value::BulkString(bytes)) = id.map.get(PAYLOAD_FIELD) {
                if let Ok(event) = serde_json::from_slice::<SegmentEvent>(bytes) {
                    claimed.push((event, LeaseToken { entry_id: id.id }));
                }
            }
        }
        Ok(claimed)
    }
}

#[cfg(test)]
mod tests {
    //! These tests require a reachable Redis instance (`REDIS_TEST_URL`,
    //! defaulting to `redis://localhost:6379`) and are skipped otherwise —
    //! matching how the cluster sync tests in the wider workspace are
    //! gated on real infrastructure rather than faked.
    use super::*;

    async fn test_queue(stream_key: &str) -> Option<Queue> {
        let url = std::env::var("REDIS_TEST_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        Queue::connect(&url, stream_key, "vpipe-test-group", Arc::new(Metrics::new()))
            .await
            .ok()
    }

    #[tokio::test]
    async fn lease_ack_round_trip() {
        let Some(queue) = test_queue("vpipe:test:lease-ack").await else {
            eprintln!("skipping: no redis reachable");
            return;
        };

        let event = SegmentEvent {
            stream_key: vpipe_core::ids::StreamKey::from_string("stream-1".into()),
            segment_path: "/media/seg-1.ts".into(),
            source_tag: "directory".into(),
            attempts: 0,
            session_id: None,
        };
        queue.enqueue(&event).await.unwrap();

        let (leased, token) = queue
            .lease("consumer-a", Duration::from_secs(2))
            .await
            .unwrap()
            .expect("entry should be leasable");
        assert_eq!(leased.segment_path, event.segment_path);

        queue.ack(&token).await.unwrap();
    }

    #[tokio::test]
    async fn nack_redelivers_with_incremented_attempts() {
        let Some(queue) = test_queue("vpipe:test:nack").await else {
            eprintln!("skipping: no redis reachable");
            return;
        };

        let event = SegmentEvent {
            stream_key: vpipe_core::ids::StreamKey::from_string("stream-1".into()),
            segment_path: "/media/seg-2.ts".into(),
            source_tag: "directory".into(),
            attempts: 0,
            session_id: None,
        };
        queue.enqueue(&event).await.unwrap();

        let (leased, token) = queue
            .lease("consumer-a", Duration::from_secs(2))
            .await
            .unwrap()
            .expect("entry should be leasable");

        let mut retried = leased.clone();
        retried.attempts += 1;
        queue.nack(&token, &retried).await.unwrap();

        let (redelivered, _) = queue
            .lease("consumer-a", Duration::from_secs(2))
            .await
            .unwrap()
            .expect("redelivered entry should be leasable");
        assert_eq!(redelivered.attempts, 1);
    }
}
