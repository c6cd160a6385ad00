use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use std::str::FromStr;

use vpipe_core::error::{Error, Result};
use vpipe_core::ids::{AnalysisId, DetectionId, ProviderId, SessionId, StreamKey};
use vpipe_core::models::{Analysis, BoundingBox, Capability, Detection, VisualSummary};

/// Persists analyses and their child detections/visual summaries, and
/// serves the "recent analyses for a stream" read path used both by the
/// subscription bus's replay-on-subscribe and by operator tooling.
#[derive(Clone)]
pub struct AnalysisRepository {
    pool: PgPool,
}

impl AnalysisRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert an analysis with its detections/visual summary in one
    /// transaction. A unique-key violation on
    /// `(stream_key, segment_path, capability)` surfaces as
    /// `Error::DuplicateSegmentAnalysis`, which the worker pool treats as a
    /// successful no-op rather than a failure.
    pub async fn put_analysis(&self, analysis: &Analysis) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            INSERT INTO analyses
                (id, stream_key, segment_path, capability, provider_id, session_id, captured_at,
                 frame_timestamp, confidence_threshold, processing_time_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(analysis.id.as_str())
        .bind(analysis.stream_key.as_str())
        .bind(&analysis.segment_path)
        .bind(analysis.capability.as_str())
        .bind(analysis.provider_id.as_ref().map(ProviderId::as_str))
        .bind(analysis.session_id.as_ref().map(SessionId::as_str))
        .bind(analysis.captured_at)
        .bind(analysis.frame_timestamp)
        .bind(analysis.confidence_threshold)
        .bind(analysis.processing_time_ms)
        .execute(&mut *tx)
        .await
        .map_err(Error::from)?;

        for detection in &analysis.detections {
            sqlx::query(
                r"
                INSERT INTO detections
                    (id, analysis_id, detection_type, label, confidence, bbox_x, bbox_y, bbox_width, bbox_height)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ",
            )
            .bind(detection.id.as_str())
            .bind(analysis.id.as_str())
            .bind(detection.detection_type.as_str())
            .bind(&detection.label)
            .bind(detection.confidence)
            .bind(detection.bbox.map(|b| b.x))
            .bind(detection.bbox.map(|b| b.y))
            .bind(detection.bbox.map(|b| b.width))
            .bind(detection.bbox.map(|b| b.height))
            .execute(&mut *tx)
            .await?;
        }

        if let Some(summary) = &analysis.visual_summary {
            let colors = serde_json::to_value(&summary.dominant_colors)
                .map_err(Error::Serialization)?;
            sqlx::query(
                r"
                INSERT INTO visual_summaries
                    (analysis_id, dominant_colors, brightness_level, contrast_level, saturation_level)
                VALUES ($1, $2, $3, $4, $5)
                ",
            )
            .bind(analysis.id.as_str())
            .bind(colors)
            .bind(summary.brightness_level)
            .bind(summary.contrast_level)
            .bind(summary.saturation_level)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// The most recent `limit` analyses for a stream, newest first. When
    /// `session_id` is set, analyses recorded under a prior activation of
    /// the stream are excluded.
    pub async fn recent_for_stream(
        &self,
        stream_key: &StreamKey,
        session_id: Option<&SessionId>,
        limit: i64,
    ) -> Result<Vec<Analysis>> {
        let rows = match session_id {
            Some(session_id) => {
                sqlx::query(
                    r"
                    SELECT id, stream_key, segment_path, capability, provider_id, session_id,
                           captured_at, frame_timestamp, confidence_threshold, processing_time_ms
                    FROM analyses
                    WHERE stream_key = $1 AND (session_id = $2 OR session_id IS NULL)
                    ORDER BY captured_at DESC
                    LIMIT $3
                    ",
                )
                .bind(stream_key.as_str())
                .bind(session_id.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r"
                    SELECT id, stream_key, segment_path, capability, provider_id, session_id,
                           captured_at, frame_timestamp, confidence_threshold, processing_time_ms
                    FROM analyses
                    WHERE stream_key = $1
                    ORDER BY captured_at DESC
                    LIMIT $2
                    ",
                )
                .bind(stream_key.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut analyses = Vec::with_capacity(rows.len());
        for row in rows {
            analyses.push(self.hydrate(row).await?);
        }
        Ok(analyses)
    }

    pub async fn get(&self, analysis_id: &AnalysisId) -> Result<Option<Analysis>> {
        let row = sqlx::query(
            r"
            SELECT id, stream_key, segment_path, capability, provider_id, session_id,
                   captured_at, frame_timestamp, confidence_threshold, processing_time_ms
            FROM analyses
            WHERE id = $1
            ",
        )
        .bind(analysis_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn hydrate(&self, row: PgRow) -> Result<Analysis> {
        let id = AnalysisId::from_string(row.try_get::<String, _>("id")?);
        let stream_key = StreamKey::from_string(row.try_get::<String, _>("stream_key")?);
        let segment_path: String = row.try_get("segment_path")?;
        let capability = Capability::from_str(&row.try_get::<String, _>("capability")?)?;
        let provider_id = row
            .try_get::<Option<String>, _>("provider_id")?
            .map(ProviderId::from_string);
        let session_id = row
            .try_get::<Option<String>, _>("session_id")?
            .map(SessionId::from_string);
        let captured_at: DateTime<Utc> = row.try_get("captured_at")?;
        let frame_timestamp: DateTime<Utc> = row.try_get("frame_timestamp")?;
        let confidence_threshold: f32 = row.try_get("confidence_threshold")?;
        let processing_time_ms: i64 = row.try_get("processing_time_ms")?;

        let detections = self.detections_for(&id).await?;
        let visual_summary = self.visual_summary_for(&id).await?;

        Ok(Analysis {
            id,
            stream_key,
            segment_path,
            capability,
            provider_id,
            session_id,
            captured_at,
            frame_timestamp,
            confidence_threshold,
            processing_time_ms,
            detections,
            visual_summary,
        })
    }

    async fn detections_for(&self, analysis_id: &AnalysisId) -> Result<Vec<Detection>> {
        let rows = sqlx::query(
            r"
            SELECT id, analysis_id, detection_type, label, confidence, bbox_x, bbox_y, bbox_width, bbox_height
            FROM detections
            WHERE analysis_id = $1
            ",
        )
        .bind(analysis_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<Detection> {
                let bbox = match (
                    row.try_get::<Option<f32>, _>("bbox_x")?,
                    row.try_get::<Option<f32>, _>("bbox_y")?,
                    row.try_get::<Option<f32>, _>("bbox_width")?,
                    row.try_get::<Option<f32>, _>("bbox_height")?,
                ) {
                    (Some(x), Some(y), Some(w), Some(h)) => Some(BoundingBox::new(x, y, w, h)),
                    _ => None,
                };

                Ok(Detection {
                    id: DetectionId::from_string(row.try_get::<String, _>("id")?),
                    analysis_id: AnalysisId::from_string(row.try_get::<String, _>("analysis_id")?),
                    detection_type: Capability::from_str(&row.try_get::<String, _>("detection_type")?)?,
                    label: row.try_get("label")?,
                    confidence: row.try_get("confidence")?,
                    bbox,
                })
            })
            .collect()
    }

    async fn visual_summary_for(&self, analysis_id: &AnalysisId) -> Result<Option<VisualSummary>> {
        let row = sqlx::query(
            r"
            SELECT analysis_id, dominant_colors, brightness_level, contrast_level, saturation_level
            FROM visual_summaries
            WHERE analysis_id = $1
            ",
        )
        .bind(analysis_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw_colors: serde_json::Value = row.try_get("dominant_colors")?;
        let dominant_colors: Vec<(u8, u8, u8)> =
            serde_json::from_value(raw_colors).map_err(Error::Serialization)?;

        Ok(Some(VisualSummary {
            analysis_id: AnalysisId::from_string(row.try_get::<String, _>("analysis_id")?),
            dominant_colors,
            brightness_level: row.try_get("brightness_level")?,
            contrast_level: row.try_get("contrast_level")?,
            saturation_level: row.try_get("saturation_level")?,
        }))
    }
}

