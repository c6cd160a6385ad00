//! Sends detection requests to a LAN worker over HTTP: JPEG-encodes the
//! frame, base64s it into a JSON payload, and posts it to the worker's
//! `/ai/analyze` endpoint. A circuit breaker guards `is_available` probes
//! so a dead worker doesn't get hammered with health checks every tick.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use vpipe_core::error::{Error, Result};
use vpipe_core::models::BoundingBox;
use vpipe_core::resilience::circuit_breaker::{self, CircuitBreaker};

use crate::detector::{Frame, ImageDetector, RawDetection};
use crate::strategy::{ExecutionStrategy, StrategyInfo};

#[derive(Debug, Serialize)]
struct AnalyzeRequest {
    image: String,
    analysis_types: Vec<String>,
    confidence_threshold: f32,
    adapter_config: AdapterConfig,
}

#[derive(Debug, Serialize)]
struct AdapterConfig {
    model_identifier: String,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    detections: Vec<WireDetection>,
}

#[derive(Debug, Deserialize)]
struct WireDetection {
    label: String,
    confidence: f32,
    bbox: Option<[f32; 4]>,
}

pub struct RemoteWorkerStrategy {
    client: reqwest::Client,
    base_url: String,
    breaker: failsafe::StateMachine<
        failsafe::failure_policy::ConsecutiveFailures<failsafe::backoff::Exponential>,
        (),
    >,
}

impl RemoteWorkerStrategy {
    #[must_use]
    pub fn new(worker_host: impl AsRef<str>, timeout: Duration) -> Self {
        let mut base_url = format!("http://{}", worker_host.as_ref());
        if !base_url.ends_with("/ai") {
            base_url.push_str("/ai");
        }
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url,
            breaker: circuit_breaker::create_default(),
        }
    }
}

#[async_trait]
impl ExecutionStrategy for RemoteWorkerStrategy {
    async fn execute_detection(
        &self,
        adapter: &dyn ImageDetector,
        frame: &Frame,
        confidence_threshold: f32,
    ) -> Result<Vec<RawDetection>> {
        if !self.breaker.is_call_permitted() {
            return Err(Error::RemoteUnreachable(format!(
                "remote worker circuit open: {}",
                self.base_url
            )));
        }

        let jpeg = frame.to_jpeg(85)?;
        let payload = AnalyzeRequest {
            image: base64::engine::general_purpose::STANDARD.encode(jpeg),
            analysis_types: vec![adapter.capability().as_str().to_string()],
            confidence_threshold,
            adapter_config: AdapterConfig {
                model_identifier: adapter.model_identifier().to_string(),
            },
        };

        let result = self
            .client
            .post(format!("{}/analyze", self.base_url))
            .json(&payload)
            .send()
            .await;

        let response = match result {
            Ok(r) if r.status().is_success() => {
                self.breaker.on_success();
                r
            }
            Ok(r) => {
                self.breaker.on_error();
                return Err(Error::AdapterTransient(format!(
                    "remote worker returned {}",
                    r.status()
                )));
            }
            Err(e) => {
                self.breaker.on_error();
                return Err(if e.is_timeout() {
                    Error::RemoteTimeout(format!("remote worker at {}: {e}", self.base_url))
                } else {
                    Error::RemoteUnreachable(format!("remote worker at {}: {e}", self.base_url))
                });
            }
        };

        let parsed: AnalyzeResponse = response
            .json()
            .await
            .map_err(|e| Error::DecodeFailed(format!("remote worker response: {e}")))?;

        Ok(parsed
            .detections
            .into_iter()
            .map(|d| RawDetection {
                label: d.label,
                confidence: d.confidence,
                bbox: d.bbox.map(|[x, y, w, h]| BoundingBox::new(x, y, w, h)),
            })
            .collect())
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn info(&self) -> StrategyInfo {
        let available = self.is_available().await;
        StrategyInfo {
            strategy: "remote_lan",
            status: if available { "available" } else { "unavailable" },
            detail: Some(self.base_url.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::MockImageDetector;
    use vpipe_core::models::Capability;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn mock_adapter(capability: Capability) -> MockImageDetector {
        let mut adapter = MockImageDetector::new();
        adapter.expect_capability().returning(move || capability);
        adapter
            .expect_model_identifier()
            .returning(|| "gcp-vision");
        adapter
    }

    #[tokio::test]
    async fn execute_detection_parses_successful_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ai/analyze"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "detections": [
                    {"label": "car", "confidence": 0.9, "bbox": [0.1, 0.1, 0.2, 0.2]}
                ]
            })))
            .mount(&server)
            .await;

        let strategy = RemoteWorkerStrategy::new(
            server.address().to_string(),
            Duration::from_secs(5),
        );
        let adapter = mock_adapter(Capability::ObjectDetection);
        let frame = Frame::new(2, 2, vec![128u8; 12]);

        let results = strategy
            .execute_detection(&adapter, &frame, 0.5)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].label, "car");
    }

    #[tokio::test]
    async fn execute_detection_fails_on_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ai/analyze"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let strategy = RemoteWorkerStrategy::new(
            server.address().to_string(),
            Duration::from_secs(5),
        );
        let adapter = mock_adapter(Capability::ObjectDetection);
        let frame = Frame::new(2, 2, vec![128u8; 12]);

        let err = strategy
            .execute_detection(&adapter, &frame, 0.5)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AdapterTransient(_)));
    }

    #[tokio::test]
    async fn execute_detection_times_out_against_a_non_responding_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ai/analyze"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
            .mount(&server)
            .await;

        let strategy = RemoteWorkerStrategy::new(
            server.address().to_string(),
            Duration::from_millis(20),
        );
        let adapter = mock_adapter(Capability::ObjectDetection);
        let frame = Frame::new(2, 2, vec![128u8; 12]);

        let err = strategy
            .execute_detection(&adapter, &frame, 0.5)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteTimeout(_)));
    }

    #[tokio::test]
    async fn is_available_reflects_health_endpoint_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ai/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let strategy = RemoteWorkerStrategy::new(
            server.address().to_string(),
            Duration::from_secs(5),
        );
        assert!(strategy.is_available().await);
    }
}
