//! Caching primitives shared by the provider registry (snapshot mirroring)
//! and the analysis engine (per-segment single-flight).

use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

/// Mirrors a process-local snapshot value into Redis with a TTL, so a
/// cold-started node (or a node whose reload failed) can recover the last
/// known-good snapshot instead of running with nothing configured.
///
/// L1 is a single-entry Moka cache rather than a bare field so the same
/// expiry semantics as a multi-key cache apply; it exists mainly to avoid
/// a Redis round trip on every read within the TTL window.
#[derive(Clone)]
pub struct SnapshotMirror<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    redis_client: Option<redis::Client>,
    l1: Arc<moka::sync::Cache<(), V>>,
    ttl_seconds: u64,
    redis_key: String,
}

impl<V> SnapshotMirror<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(redis_client: Option<redis::Client>, redis_key: String, ttl_seconds: u64) -> Self {
        let l1 = moka::sync::CacheBuilder::new(1)
            .time_to_live(std::time::Duration::from_secs(ttl_seconds))
            .build();
        Self {
            redis_client,
            l1: Arc::new(l1),
            ttl_seconds,
            redis_key,
        }
    }

    /// Store a freshly-reloaded snapshot in L1 and mirror it to Redis.
    /// Mirroring failure is logged but never fails the reload itself —
    /// the in-process snapshot is already live.
    pub async fn store(&self, value: &V) {
        self.l1.insert((), value.clone());

        let Some(client) = &self.redis_client else {
            return;
        };
        let Ok(serialized) = serde_json::to_string(value) else {
            tracing::warn!("failed to serialize snapshot for cache mirror");
            return;
        };
        match client.get_multiplexed_async_connection().await {
            Ok(mut conn) => {
                if let Err(e) = conn
                    .set_ex::<_, _, ()>(&self.redis_key, serialized, self.ttl_seconds)
                    .await
                {
                    tracing::warn!(error = %e, "failed to mirror snapshot to redis");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to connect to redis for cache mirror"),
        }
    }

    /// Used when a reload fails and no in-memory snapshot exists yet:
    /// fall back to whatever was last mirrored, if anything.
    pub async fn fallback(&self) -> Option<V> {
        if let Some(v) = self.l1.get(&()) {
            return Some(v);
        }

        let client = self.redis_client.as_ref()?;
        let mut conn = client.get_multiplexed_async_connection().await.ok()?;
        let raw: Option<String> = conn.get(&self.redis_key).await.ok()?;
        let raw = raw?;
        match serde_json::from_str::<V>(&raw) {
            Ok(v) => {
                self.l1.insert((), v.clone());
                Some(v)
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to deserialize mirrored snapshot");
                None
            }
        }
    }
}

/// Error type for `SingleFlight` operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SingleFlightError<E> {
    #[error("singleflight worker failed: leader dropped or panicked")]
    WorkerFailed,
    #[error("{0}")]
    Inner(E),
}

/// Collapses concurrent calls for the same key into one execution, so a
/// segment redelivered by the queue while the first delivery is still being
/// analyzed doesn't spend inference twice.
#[derive(Clone)]
pub struct SingleFlight<K, V, E>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    group: Arc<async_singleflight::Group<K, V, E>>,
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            group: Arc::new(async_singleflight::Group::new()),
        }
    }

    pub async fn do_work<Fut>(&self, key: K, f: Fut) -> Result<V, SingleFlightError<E>>
    where
        Fut: std::future::Future<Output = Result<V, E>> + Send,
    {
        self.group.work(&key, f).await.map_err(|opt_err| match opt_err {
            Some(inner) => SingleFlightError::Inner(inner),
            None => SingleFlightError::WorkerFailed,
        })
    }
}

impl<K, V, E> Default for SingleFlight<K, V, E>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn singleflight_deduplicates_concurrent_same_key_calls() {
        let sf: SingleFlight<String, i32, String> = SingleFlight::new();
        let counter = Arc::new(AtomicU32::new(0));

        let mut handles = vec![];
        for _ in 0..8 {
            let sf = sf.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                sf.do_work("stream-1/seg-3.ts/object_detection".to_string(), async move {
                    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), 7);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn snapshot_mirror_falls_back_to_l1_without_redis() {
        let mirror: SnapshotMirror<Vec<String>> =
            SnapshotMirror::new(None, "vpipe:test:snapshot".to_string(), 60);
        mirror.store(&vec!["object_detection".to_string()]).await;
        let fallback = mirror.fallback().await;
        assert_eq!(fallback, Some(vec!["object_detection".to_string()]));
    }
}
