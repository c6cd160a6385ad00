//! Shared domain model types for the segment analysis pipeline.

use crate::ids::{AnalysisId, BrandId, DetectionId, ProviderId, SessionId, StreamKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ObjectDetection,
    LogoDetection,
    TextDetection,
    MotionAnalysis,
    VisualAnalysis,
}

impl std::str::FromStr for Capability {
    type Err = crate::error::Error;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw {
            "object_detection" => Ok(Capability::ObjectDetection),
            "logo_detection" => Ok(Capability::LogoDetection),
            "text_detection" => Ok(Capability::TextDetection),
            "motion_analysis" => Ok(Capability::MotionAnalysis),
            "visual_analysis" => Ok(Capability::VisualAnalysis),
            other => Err(crate::error::Error::Internal(format!(
                "unknown capability: {other}"
            ))),
        }
    }
}

impl Capability {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::ObjectDetection => "object_detection",
            Capability::LogoDetection => "logo_detection",
            Capability::TextDetection => "text_detection",
            Capability::MotionAnalysis => "motion_analysis",
            Capability::VisualAnalysis => "visual_analysis",
        }
    }

    /// Capabilities whose detections come from a single decoded frame
    /// (everything except motion, which needs the whole segment).
    #[must_use]
    pub fn is_frame_based(&self) -> bool {
        !matches!(self, Capability::MotionAnalysis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Rtmp,
    File,
    Url,
    Webcam,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Inactive,
    Starting,
    Active,
    Stopping,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QueueItemState {
    Pending,
    Leased,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub stream_key: StreamKey,
    pub source_type: SourceType,
    pub status: StreamStatus,
    pub session_id: Option<SessionId>,
}

/// A detection's bounding box, normalized to `[0, 1]` relative to the
/// decoded frame. Clamped only at construction — never adjusted after the
/// fact, so a caller can't accidentally widen a box past the frame by
/// mutating fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    #[must_use]
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        let clamp01 = |v: f32| v.clamp(0.0, 1.0);
        Self {
            x: clamp01(x),
            y: clamp01(y),
            width: clamp01(width),
            height: clamp01(height),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: DetectionId,
    pub analysis_id: AnalysisId,
    pub detection_type: Capability,
    pub label: String,
    pub confidence: f32,
    pub bbox: Option<BoundingBox>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualSummary {
    pub analysis_id: AnalysisId,
    pub dominant_colors: Vec<(u8, u8, u8)>,
    pub brightness_level: f32,
    pub contrast_level: f32,
    pub saturation_level: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub id: AnalysisId,
    pub stream_key: StreamKey,
    pub segment_path: String,
    pub capability: Capability,
    /// The active provider that produced this analysis. `None` for
    /// capabilities with no backing provider row (`visual_analysis`,
    /// `motion_analysis`).
    pub provider_id: Option<ProviderId>,
    pub session_id: Option<SessionId>,
    pub captured_at: DateTime<Utc>,
    /// When the analyzed frame (or, for motion, the segment) was decoded.
    pub frame_timestamp: DateTime<Utc>,
    /// The confidence threshold in effect when this analysis ran.
    pub confidence_threshold: f32,
    pub processing_time_ms: i64,
    pub detections: Vec<Detection>,
    pub visual_summary: Option<VisualSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: ProviderId,
    pub name: String,
    pub capability: Capability,
    pub provider_type: String,
    pub config: serde_json::Value,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Brand {
    pub id: BrandId,
    pub name: String,
    pub search_terms: Vec<String>,
}

/// An event describing a newly finalized segment, as emitted by an
/// `EventSource` and carried through the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentEvent {
    pub stream_key: StreamKey,
    pub segment_path: String,
    pub source_tag: String,
    pub attempts: u32,
    /// The stream's session id at the time this event was raised, used to
    /// filter out analyses from a prior activation of the same stream key.
    pub session_id: Option<SessionId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounding_box_clamps_out_of_range_inputs() {
        let bbox = BoundingBox::new(-0.2, 1.4, 0.5, 0.5);
        assert_eq!(bbox.x, 0.0);
        assert_eq!(bbox.y, 1.0);
    }

    #[test]
    fn capability_as_str_round_trips_serde_rename() {
        assert_eq!(Capability::ObjectDetection.as_str(), "object_detection");
        assert!(!Capability::MotionAnalysis.is_frame_based());
    }
}
