use sqlx::{PgPool, Row};

use vpipe_core::error::Result;
use vpipe_core::ids::{SessionId, StreamKey};
use vpipe_core::models::{SourceType, Stream, StreamStatus};

/// Tracks the single authoritative active stream the directory watcher
/// resolves segment events against.
#[derive(Clone)]
pub struct StreamRepository {
    pool: PgPool,
}

impl StreamRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn active(&self) -> Result<Option<Stream>> {
        let row = sqlx::query(
            r"
            SELECT stream_key, source_type, status, session_id
            FROM streams
            WHERE status = 'active'
            ",
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Stream {
                stream_key: StreamKey::from_string(row.try_get::<String, _>("stream_key")?),
                source_type: parse_source_type(&row.try_get::<String, _>("source_type")?)?,
                status: parse_status(&row.try_get::<String, _>("status")?)?,
                session_id: row
                    .try_get::<Option<String>, _>("session_id")?
                    .map(SessionId::from_string),
            })),
            None => Ok(None),
        }
    }

    pub async fn get(&self, stream_key: &StreamKey) -> Result<Option<Stream>> {
        let row = sqlx::query(
            r"
            SELECT stream_key, source_type, status, session_id
            FROM streams
            WHERE stream_key = $1
            ",
        )
        .bind(stream_key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Stream {
                stream_key: StreamKey::from_string(row.try_get::<String, _>("stream_key")?),
                source_type: parse_source_type(&row.try_get::<String, _>("source_type")?)?,
                status: parse_status(&row.try_get::<String, _>("status")?)?,
                session_id: row
                    .try_get::<Option<String>, _>("session_id")?
                    .map(SessionId::from_string),
            })),
            None => Ok(None),
        }
    }

    /// Clears the `session_id` filter boundary forward by assigning a new
    /// one — called by the stream-lifecycle component on restart so stale
    /// analyses from the previous activation drop out of replay.
    pub async fn reset_session(
        &self,
        stream_key: &StreamKey,
        session_id: &SessionId,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE streams SET session_id = $2, updated_at = now()
            WHERE stream_key = $1
            ",
        )
        .bind(stream_key.as_str())
        .bind(session_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn parse_source_type(raw: &str) -> Result<SourceType> {
    match raw {
        "rtmp" => Ok(SourceType::Rtmp),
        "file" => Ok(SourceType::File),
        "url" => Ok(SourceType::Url),
        "webcam" => Ok(SourceType::Webcam),
        other => Err(vpipe_core::error::Error::Internal(format!(
            "unknown source_type in database: {other}"
        ))),
    }
}

fn parse_status(raw: &str) -> Result<StreamStatus> {
    match raw {
        "inactive" => Ok(StreamStatus::Inactive),
        "starting" => Ok(StreamStatus::Starting),
        "active" => Ok(StreamStatus::Active),
        "stopping" => Ok(StreamStatus::Stopping),
        "error" => Ok(StreamStatus::Error),
        other => Err(vpipe_core::error::Error::Internal(format!(
            "unknown stream status in database: {other}"
        ))),
    }
}
