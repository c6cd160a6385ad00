//! A single adapter generalizing the hosted computer-vision integrations
//! (object localization, logo recognition, OCR all live behind the same
//! provider API and only differ by endpoint and response shape).

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;
use vpipe_core::error::{Error, Result};
use vpipe_core::models::{BoundingBox, Capability};

use crate::detector::{Frame, ImageDetector, RawDetection};

#[derive(Debug, Deserialize)]
struct VisionResponse {
    #[serde(default)]
    annotations: Vec<VisionAnnotation>,
}

#[derive(Debug, Deserialize)]
struct VisionAnnotation {
    label: String,
    score: f32,
    /// Already normalized to `[0, 1]` by the provider.
    #[serde(default)]
    bbox: Option<[f32; 4]>,
}

pub struct HostedVisionAdapter {
    client: reqwest::Client,
    api_base_url: String,
    api_key: String,
    capability: Capability,
    model_identifier: String,
}

impl HostedVisionAdapter {
    #[must_use]
    pub fn new(
        api_base_url: impl Into<String>,
        api_key: impl Into<String>,
        capability: Capability,
        model_identifier: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(vpipe_core::resilience::timeout::HTTP_REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_base_url: api_base_url.into(),
            api_key: api_key.into(),
            capability,
            model_identifier: model_identifier.into(),
        }
    }

    fn endpoint(&self) -> &'static str {
        match self.capability {
            Capability::ObjectDetection => "object_localization",
            Capability::LogoDetection => "logo_detection",
            Capability::TextDetection => "text_detection",
            Capability::MotionAnalysis | Capability::VisualAnalysis => "annotate",
        }
    }
}

impl HostedVisionAdapter {
    async fn try_detect(&self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<RawDetection>> {
        let jpeg = frame.to_jpeg(90)?;

        let response = self
            .client
            .post(format!("{}/{}", self.api_base_url, self.endpoint()))
            .bearer_auth(&self.api_key)
            .body(jpeg)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::RemoteTimeout(format!("hosted vision {}: {e}", self.endpoint()))
                } else {
                    Error::RemoteUnreachable(format!("hosted vision {}: {e}", self.endpoint()))
                }
            })?;

        if !response.status().is_success() {
            return Err(Error::AdapterTransient(format!(
                "hosted vision returned {}",
                response.status()
            )));
        }

        let parsed: VisionResponse = response.json().await.map_err(|e| {
            Error::DecodeFailed(format!("hosted vision response: {e}"))
        })?;

        Ok(parsed
            .annotations
            .into_iter()
            .filter(|a| a.score >= confidence_threshold)
            .map(|a| RawDetection {
                label: a.label,
                confidence: a.score,
                bbox: a
                    .bbox
                    .map(|[x, y, w, h]| BoundingBox::new(x, y, w, h)),
            })
            .collect())
    }
}

#[async_trait]
impl ImageDetector for HostedVisionAdapter {
    async fn detect(&self, frame: &Frame, confidence_threshold: f32) -> Vec<RawDetection> {
        match self.try_detect(frame, confidence_threshold).await {
            Ok(detections) => detections,
            Err(e) => {
                warn!(error = %e, capability = self.capability.as_str(), "hosted vision adapter: detection failed");
                Vec::new()
            }
        }
    }

    fn capability(&self) -> Capability {
        self.capability
    }

    fn model_identifier(&self) -> &str {
        &self.model_identifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn detect_filters_below_threshold_and_normalizes_bbox() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/object_localization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "annotations": [
                    {"label": "car", "score": 0.9, "bbox": [0.1, 0.1, 0.2, 0.2]},
                    {"label": "bird", "score": 0.2, "bbox": [0.0, 0.0, 0.1, 0.1]}
                ]
            })))
            .mount(&server)
            .await;

        let adapter = HostedVisionAdapter::new(
            server.uri(),
            "test-key",
            Capability::ObjectDetection,
            "gcp-vision",
        );
        let frame = Frame::new(2, 2, vec![128u8; 12]);
        let results = adapter.detect(&frame, 0.5).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].label, "car");
    }
}
