use sqlx::PgPool;

use vpipe_core::error::Result;
use vpipe_core::ids::StreamKey;
use vpipe_core::models::Capability;

/// Mirrors queue state into Postgres for operator visibility. Redis remains
/// the authoritative source for leasing and crash recovery — a row here
/// going stale (e.g. the process crashes between `lease` and the next
/// upsert) never blocks the real queue, it only makes an operator dashboard
/// briefly wrong.
#[derive(Clone)]
pub struct QueueItemRepository {
    pool: PgPool,
}

impl QueueItemRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn mark_leased(
        &self,
        id: &str,
        stream_key: &StreamKey,
        segment_path: &str,
        capability: Capability,
        attempts: u32,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO queue_items (id, stream_key, segment_path, capability, state, attempts)
            VALUES ($1, $2, $3, $4, 'leased', $5)
            ON CONFLICT (id) DO UPDATE SET
                state = 'leased', attempts = $5, updated_at = now()
            ",
        )
        .bind(id)
        .bind(stream_key.as_str())
        .bind(segment_path)
        .bind(capability.as_str())
        .bind(i32::try_from(attempts).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_done(&self, id: &str) -> Result<()> {
        sqlx::query(
            r"UPDATE queue_items SET state = 'done', updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: &str, last_error: &str) -> Result<()> {
        sqlx::query(
            r"UPDATE queue_items SET state = 'failed', last_error = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
