//! Zero-shot logo/brand detection: builds one text prompt per brand search
//! term, asks a hosted prompted-classification endpoint for a similarity
//! score per prompt, and maps the highest-scoring prompts back to brands.
//! The whole frame is reported as the bounding box, matching the original
//! CLIP-based adapter's full-frame detections.

use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::warn;
use vpipe_core::error::{Error, Result};
use vpipe_core::models::{BoundingBox, Capability};
use vpipe_store::BrandRepository;

use crate::detector::{Frame, ImageDetector, RawDetection};

const MAX_RESULTS: usize = 5;
const NO_BRAND_PROMPT: &str = "a photo with no brands or logos";

/// Stands in for the loaded classification model/session handle.
struct LoadedModel {
    model_identifier: String,
}

#[derive(Debug, Serialize)]
struct ClassifyRequest {
    image_base64: String,
    prompts: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    /// Softmax-normalized score per prompt, same order as the request.
    scores: Vec<f32>,
}

pub struct PromptedLogoClassifier {
    client: reqwest::Client,
    api_base_url: String,
    model_identifier: String,
    brands: BrandRepository,
    init: OnceCell<()>,
    model: Mutex<Option<LoadedModel>>,
}

impl PromptedLogoClassifier {
    #[must_use]
    pub fn new(
        api_base_url: impl Into<String>,
        model_identifier: impl Into<String>,
        brands: BrandRepository,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(vpipe_core::resilience::timeout::HTTP_REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_base_url: api_base_url.into(),
            model_identifier: model_identifier.into(),
            brands,
            init: OnceCell::new(),
            model: Mutex::new(None),
        }
    }

    fn load_model(&self) {
        *self.model.lock() = Some(LoadedModel {
            model_identifier: self.model_identifier.clone(),
        });
    }

    async fn ensure_loaded(&self) {
        self.init.get_or_init(|| async { self.load_model() }).await;
        if self.model.lock().is_none() {
            self.load_model();
        }
    }

    async fn try_detect(&self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<RawDetection>> {
        self.ensure_loaded().await;
        let active_brands = self.brands.active_brands().await?;
        if active_brands.is_empty() {
            return Ok(Vec::new());
        }

        let mut prompts = Vec::new();
        let mut prompt_to_brand = Vec::new();
        for brand in &active_brands {
            for term in &brand.search_terms {
                prompts.push(format!("a photo containing {term}"));
                prompt_to_brand.push(brand.name.clone());
            }
        }
        prompts.push(NO_BRAND_PROMPT.to_string());

        let jpeg = frame.to_jpeg(90)?;
        let request = ClassifyRequest {
            image_base64: base64::engine::general_purpose::STANDARD.encode(jpeg),
            prompts,
        };

        let response = self
            .client
            .post(format!("{}/classify", self.api_base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::RemoteUnreachable(format!("logo classifier: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::AdapterTransient(format!(
                "logo classifier returned {}",
                response.status()
            )));
        }

        let parsed: ClassifyResponse = response
            .json()
            .await
            .map_err(|e| Error::DecodeFailed(format!("logo classifier response: {e}")))?;

        // Last score is the "no brand" sink prompt and never reported.
        let mut results: Vec<RawDetection> = parsed
            .scores
            .iter()
            .take(prompt_to_brand.len())
            .zip(prompt_to_brand.iter())
            .filter(|(score, _)| **score >= confidence_threshold)
            .map(|(score, brand_name)| RawDetection {
                label: brand_name.clone(),
                confidence: *score,
                bbox: Some(BoundingBox::new(0.0, 0.0, 1.0, 1.0)),
            })
            .collect();

        results.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(MAX_RESULTS);
        Ok(results)
    }
}

#[async_trait]
impl ImageDetector for PromptedLogoClassifier {
    async fn detect(&self, frame: &Frame, confidence_threshold: f32) -> Vec<RawDetection> {
        match self.try_detect(frame, confidence_threshold).await {
            Ok(detections) => detections,
            Err(e) => {
                warn!(error = %e, "logo classifier: detection failed");
                Vec::new()
            }
        }
    }

    fn capability(&self) -> Capability {
        Capability::LogoDetection
    }

    fn model_identifier(&self) -> &str {
        &self.model_identifier
    }

    fn release(&self) {
        *self.model.lock() = None;
    }
}
