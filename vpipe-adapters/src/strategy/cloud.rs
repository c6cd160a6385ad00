//! Delegates to the adapter's own cloud API call (e.g. `HostedVisionAdapter`
//! talking to a hosted vision endpoint) rather than routing through a
//! worker — the "location" is wherever the adapter's credentials point.
//! Availability is gated on the hosted-credentials env var being set.

use async_trait::async_trait;
use vpipe_core::error::{Error, Result};

use crate::detector::{Frame, ImageDetector, RawDetection};
use crate::strategy::{ExecutionStrategy, StrategyInfo};

const CREDENTIALS_ENV_VAR: &str = "VPIPE_CLOUD_VISION_CREDENTIALS";

pub struct CloudStrategy;

impl CloudStrategy {
    fn credentials_configured() -> bool {
        std::env::var(CREDENTIALS_ENV_VAR)
            .map(|v| !v.is_empty())
            .unwrap_or(false)
    }
}

#[async_trait]
impl ExecutionStrategy for CloudStrategy {
    async fn execute_detection(
        &self,
        adapter: &dyn ImageDetector,
        frame: &Frame,
        confidence_threshold: f32,
    ) -> Result<Vec<RawDetection>> {
        if !Self::credentials_configured() {
            return Err(Error::InvalidInput(format!(
                "cloud execution unavailable: {CREDENTIALS_ENV_VAR} not set"
            )));
        }
        Ok(adapter.detect(frame, confidence_threshold).await)
    }

    async fn is_available(&self) -> bool {
        Self::credentials_configured()
    }

    async fn info(&self) -> StrategyInfo {
        let available = Self::credentials_configured();
        StrategyInfo {
            strategy: "cloud",
            status: if available { "available" } else { "unavailable" },
            detail: if available {
                None
            } else {
                Some("credentials_not_configured".to_string())
            },
        }
    }
}
