//! Runs the adapter directly in this process. Always available — this is
//! the default for single-container deployments.

use async_trait::async_trait;
use vpipe_core::error::Result;

use crate::detector::{Frame, ImageDetector, RawDetection};
use crate::strategy::{ExecutionStrategy, StrategyInfo};

pub struct InProcessStrategy;

#[async_trait]
impl ExecutionStrategy for InProcessStrategy {
    async fn execute_detection(
        &self,
        adapter: &dyn ImageDetector,
        frame: &Frame,
        confidence_threshold: f32,
    ) -> Result<Vec<RawDetection>> {
        Ok(adapter.detect(frame, confidence_threshold).await)
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn info(&self) -> StrategyInfo {
        StrategyInfo {
            strategy: "local",
            status: "available",
            detail: Some("same_container".to_string()),
        }
    }
}
