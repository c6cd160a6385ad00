//! Execution strategies: WHERE a detector's work actually runs. Orthogonal
//! to `detector` — the same `ImageDetector` can be driven in-process, on a
//! LAN worker, or delegated to a cloud-backed adapter that does its own
//! networking, depending on deployment.

pub mod cloud;
pub mod in_process;
pub mod remote_worker;

pub use cloud::CloudStrategy;
pub use in_process::InProcessStrategy;
pub use remote_worker::RemoteWorkerStrategy;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use vpipe_core::error::{Error, Result};

use crate::detector::{Frame, ImageDetector, RawDetection};

#[derive(Debug, Clone, Serialize)]
pub struct StrategyInfo {
    pub strategy: &'static str,
    pub status: &'static str,
    pub detail: Option<String>,
}

#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    async fn execute_detection(
        &self,
        adapter: &dyn ImageDetector,
        frame: &Frame,
        confidence_threshold: f32,
    ) -> Result<Vec<RawDetection>>;

    async fn is_available(&self) -> bool;

    async fn info(&self) -> StrategyInfo;
}

/// Builds the configured execution strategy. `processing_mode` is one of
/// `"local"`, `"remote_lan"`, `"cloud"`.
pub fn build_strategy(
    processing_mode: &str,
    worker_host: Option<String>,
    worker_timeout: Duration,
) -> Result<Arc<dyn ExecutionStrategy>> {
    match processing_mode {
        "local" => Ok(Arc::new(InProcessStrategy)),
        "remote_lan" => {
            let worker_host = worker_host.ok_or_else(|| {
                Error::InvalidInput("worker_host is required for remote_lan processing mode".to_string())
            })?;
            Ok(Arc::new(RemoteWorkerStrategy::new(worker_host, worker_timeout)))
        }
        "cloud" => Ok(Arc::new(CloudStrategy)),
        other => Err(Error::InvalidInput(format!("unknown processing mode: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_lan_requires_worker_host() {
        let result = build_strategy("remote_lan", None, Duration::from_secs(30));
        assert!(result.is_err());
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let result = build_strategy("quantum", None, Duration::from_secs(30));
        assert!(result.is_err());
    }

    #[test]
    fn local_mode_always_builds() {
        assert!(build_strategy("local", None, Duration::from_secs(30)).is_ok());
    }
}
