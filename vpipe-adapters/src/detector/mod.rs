//! Detection adapters: given a decoded frame (or, for motion, a whole
//! segment), produce detections. Each concrete adapter is grounded on one
//! provider integration from the original detection pipeline; a provider
//! row's `provider_type` selects which one backs a given capability.

pub mod hosted_vision;
pub mod local_object;
pub mod local_ocr;
pub mod logo_classifier;
pub mod motion;

pub use hosted_vision::HostedVisionAdapter;
pub use local_object::LocalObjectDetector;
pub use local_ocr::LocalOcrAdapter;
pub use logo_classifier::PromptedLogoClassifier;
pub use motion::LocalMotionAnalyzer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vpipe_core::error::Result;
use vpipe_core::models::{BoundingBox, Capability};

/// A decoded RGB8 frame, the unit of work every `ImageDetector` operates on.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub rgb8: Vec<u8>,
}

impl Frame {
    #[must_use]
    pub fn new(width: u32, height: u32, rgb8: Vec<u8>) -> Self {
        Self { width, height, rgb8 }
    }

    /// Encodes this frame as a JPEG byte buffer, for adapters that hand the
    /// frame to a remote endpoint rather than an in-process model.
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let image_buffer =
            image::RgbImage::from_raw(self.width, self.height, self.rgb8.clone()).ok_or_else(
                || vpipe_core::error::Error::DecodeFailed("frame buffer size mismatch".to_string()),
            )?;
        let mut out = Vec::new();
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
        encoder
            .write_image(
                image_buffer.as_raw(),
                self.width,
                self.height,
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|e| vpipe_core::error::Error::DecodeFailed(e.to_string()))?;
        Ok(out)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDetection {
    pub label: String,
    pub confidence: f32,
    pub bbox: Option<BoundingBox>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MotionSummary {
    pub average_motion: f32,
    pub max_motion: f32,
    pub activity_score: f32,
    pub frame_count: u32,
}

/// Frame-based detection: object/logo/text all implement this. Detection
/// failures (network errors, malformed responses) are not the caller's
/// concern — an adapter logs its own failure and reports no detections for
/// that frame rather than aborting every other capability in the batch.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageDetector: Send + Sync {
    async fn detect(&self, frame: &Frame, confidence_threshold: f32) -> Vec<RawDetection>;

    fn capability(&self) -> Capability;

    /// Identifies the backing model/service, surfaced in remote-execution
    /// payloads and logs.
    fn model_identifier(&self) -> &str;

    /// Releases any lazily-loaded heavyweight resource (an in-process
    /// model, a pooled client) this adapter is holding. Called on the
    /// previous snapshot's adapters when the provider registry rebuilds
    /// after a reload. Default no-op for adapters with nothing to release.
    fn release(&self) {}
}

/// Segment-based (temporal) analysis: motion is the only one so far.
#[async_trait]
pub trait VideoAnalyzer: Send + Sync {
    async fn analyze(&self, segment_path: &str) -> Result<MotionSummary>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_jpeg_rejects_mismatched_buffer_size() {
        let frame = Frame::new(4, 4, vec![0u8; 10]);
        assert!(frame.to_jpeg(85).is_err());
    }

    #[test]
    fn to_jpeg_encodes_solid_frame() {
        let frame = Frame::new(2, 2, vec![128u8; 2 * 2 * 3]);
        let jpeg = frame.to_jpeg(85).unwrap();
        assert!(!jpeg.is_empty());
        assert_eq!(&jpeg[0..2], &[0xFF, 0xD8]);
    }
}
