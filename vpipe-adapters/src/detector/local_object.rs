//! Calls a local inference sidecar (an ONNX/Triton-style detector process
//! running on the same host) rather than loading a model in-process —
//! the Rust side of the pipeline never links against a model runtime.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::warn;
use vpipe_core::error::{Error, Result};
use vpipe_core::models::{BoundingBox, Capability};
use vpipe_core::resilience::circuit_breaker::{self, CircuitBreaker};

use crate::detector::{Frame, ImageDetector, RawDetection};

/// Stands in for the loaded model/session handle — this adapter delegates
/// inference to a local sidecar rather than linking a model runtime
/// in-process, but still pays the lazy-init/release cost a real one would,
/// since warming the sidecar connection up front is the point.
struct LoadedModel {
    model_identifier: String,
}

#[derive(Debug, Deserialize)]
struct SidecarResponse {
    #[serde(default)]
    detections: Vec<SidecarDetection>,
}

#[derive(Debug, Deserialize)]
struct SidecarDetection {
    label: String,
    confidence: f32,
    /// `[x1, y1, x2, y2]`, already normalized to `[0, 1]`.
    bbox_xyxyn: [f32; 4],
}

pub struct LocalObjectDetector {
    client: reqwest::Client,
    endpoint_url: String,
    model_identifier: String,
    breaker: failsafe::StateMachine<
        failsafe::failure_policy::ConsecutiveFailures<failsafe::backoff::Exponential>,
        (),
    >,
    init: OnceCell<()>,
    model: Mutex<Option<LoadedModel>>,
}

impl LocalObjectDetector {
    #[must_use]
    pub fn new(endpoint_url: impl Into<String>, model_identifier: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(vpipe_core::resilience::timeout::HTTP_REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            endpoint_url: endpoint_url.into(),
            model_identifier: model_identifier.into(),
            breaker: circuit_breaker::create_default(),
            init: OnceCell::new(),
            model: Mutex::new(None),
        }
    }

    fn load_model(&self) {
        *self.model.lock() = Some(LoadedModel {
            model_identifier: self.model_identifier.clone(),
        });
    }

    /// Loads the model on first call; reloads it if a prior `release()`
    /// cleared it, without re-running the `OnceCell` machinery a second
    /// time.
    async fn ensure_loaded(&self) {
        self.init.get_or_init(|| async { self.load_model() }).await;
        if self.model.lock().is_none() {
            self.load_model();
        }
    }
}

impl LocalObjectDetector {
    async fn try_detect(&self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<RawDetection>> {
        self.ensure_loaded().await;

        if !self.breaker.is_call_permitted() {
            return Err(Error::RemoteUnreachable(
                "local object detector circuit open".to_string(),
            ));
        }

        let jpeg = frame.to_jpeg(90)?;
        let result = self
            .client
            .post(&self.endpoint_url)
            .query(&[("model", self.model_identifier.as_str())])
            .body(jpeg)
            .send()
            .await;

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                self.breaker.on_error();
                return Err(Error::RemoteUnreachable(format!(
                    "local object detector at {}: {e}",
                    self.endpoint_url
                )));
            }
        };

        if !response.status().is_success() {
            self.breaker.on_error();
            return Err(Error::AdapterTransient(format!(
                "local object detector returned {}",
                response.status()
            )));
        }

        let parsed: SidecarResponse = response
            .json()
            .await
            .map_err(|e| Error::DecodeFailed(format!("local object detector response: {e}")))?;
        self.breaker.on_success();

        Ok(parsed
            .detections
            .into_iter()
            .filter(|d| d.confidence >= confidence_threshold)
            .map(|d| {
                let [x1, y1, x2, y2] = d.bbox_xyxyn;
                RawDetection {
                    label: d.label,
                    confidence: d.confidence,
                    bbox: Some(BoundingBox::new(x1, y1, x2 - x1, y2 - y1)),
                }
            })
            .collect())
    }
}

#[async_trait]
impl ImageDetector for LocalObjectDetector {
    async fn detect(&self, frame: &Frame, confidence_threshold: f32) -> Vec<RawDetection> {
        match self.try_detect(frame, confidence_threshold).await {
            Ok(detections) => detections,
            Err(e) => {
                warn!(error = %e, "local object detector: detection failed");
                Vec::new()
            }
        }
    }

    fn capability(&self) -> Capability {
        Capability::ObjectDetection
    }

    fn model_identifier(&self) -> &str {
        &self.model_identifier
    }

    fn release(&self) {
        *self.model.lock() = None;
    }
}
