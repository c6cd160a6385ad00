//! Holds the active set of detection adapters, one per capability, rebuilt
//! from the `providers` table on demand and swapped in atomically so an
//! in-flight analysis never sees half of an old, half of a new snapshot.
//!
//! Grounded on the copy-on-reload registry pattern: readers always get a
//! consistent `Arc<Snapshot>`, writers publish a whole new one.

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use vpipe_adapters::detector::{HostedVisionAdapter, LocalObjectDetector, LocalOcrAdapter, PromptedLogoClassifier};
use vpipe_adapters::ImageDetector;
use vpipe_core::cache::SnapshotMirror;
use vpipe_core::error::{Error, Result};
use vpipe_core::models::{Capability, Provider};
use vpipe_store::{BrandRepository, ProviderRepository};

/// An immutable, fully-built set of detectors, one per capability that has
/// an active provider row.
#[derive(Clone)]
pub struct Snapshot {
    detectors: HashMap<Capability, Arc<dyn ImageDetector>>,
    providers: HashMap<Capability, Provider>,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            detectors: HashMap::new(),
            providers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn get(&self, capability: Capability) -> Option<Arc<dyn ImageDetector>> {
        self.detectors.get(&capability).cloned()
    }

    #[must_use]
    pub fn has(&self, capability: Capability) -> bool {
        self.detectors.contains_key(&capability)
    }

    #[must_use]
    pub fn active_capabilities(&self) -> Vec<Capability> {
        self.detectors.keys().copied().collect()
    }

    #[must_use]
    pub fn provider_for(&self, capability: Capability) -> Option<&Provider> {
        self.providers.get(&capability)
    }
}

/// Mirror-friendly summary of a snapshot — `ImageDetector` trait objects
/// aren't `Serialize`, so the Redis-mirrored fallback value is just the
/// provider rows, which `reload` uses to rebuild detectors on recovery.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct ProviderSetSnapshot {
    providers: Vec<Provider>,
}

pub struct ProviderRegistry {
    providers_repo: ProviderRepository,
    brands_repo: BrandRepository,
    snapshot: ArcSwap<Snapshot>,
    mirror: SnapshotMirror<ProviderSetSnapshot>,
    hosted_vision_base_url: String,
    hosted_vision_api_key: String,
    local_object_endpoint: String,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new(
        providers_repo: ProviderRepository,
        brands_repo: BrandRepository,
        redis_client: Option<redis::Client>,
        cache_ttl_seconds: u64,
        hosted_vision_base_url: impl Into<String>,
        hosted_vision_api_key: impl Into<String>,
        local_object_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            providers_repo,
            brands_repo,
            snapshot: ArcSwap::from_pointee(Snapshot::empty()),
            mirror: SnapshotMirror::new(
                redis_client,
                "vpipe:registry:providers".to_string(),
                cache_ttl_seconds,
            ),
            hosted_vision_base_url: hosted_vision_base_url.into(),
            hosted_vision_api_key: hosted_vision_api_key.into(),
            local_object_endpoint: local_object_endpoint.into(),
        }
    }

    #[must_use]
    pub fn current(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    /// Rebuilds detectors from the `providers` table and swaps them in. On
    /// failure, falls back to the last mirrored provider set (if any)
    /// rather than leaving the previous in-memory snapshot silently stale
    /// forever — the caller is told which happened via the returned bool
    /// (`true` = rebuilt live, `false` = served from the mirror fallback).
    pub async fn reload(&self) -> Result<bool> {
        match self.providers_repo.active_providers().await {
            Ok(providers) => {
                self.publish(&providers).await?;
                Ok(true)
            }
            Err(e) => {
                error!(error = %e, "provider registry: live reload failed, trying mirror fallback");
                match self.mirror.fallback().await {
                    Some(snapshot) => {
                        warn!("provider registry: recovered providers from cache mirror");
                        self.publish(&snapshot.providers).await?;
                        Ok(false)
                    }
                    None => Err(e),
                }
            }
        }
    }

    /// Rejects the reload, keeping the previous snapshot in place, if two
    /// active providers claim the same capability — ambiguity here is a
    /// configuration error, not something "last wins" should paper over.
    async fn publish(&self, providers: &[Provider]) -> Result<()> {
        let mut by_capability: HashMap<Capability, Provider> = HashMap::new();
        for provider in providers {
            if let Some(existing) = by_capability.insert(provider.capability, provider.clone()) {
                return Err(Error::AmbiguousCapability(format!(
                    "multiple active providers for capability {}: {} and {}",
                    provider.capability.as_str(),
                    existing.name,
                    provider.name
                )));
            }
        }

        let mut detectors = HashMap::new();
        for (capability, provider) in &by_capability {
            match self.build_detector(provider) {
                Ok(detector) => {
                    detectors.insert(*capability, detector);
                }
                Err(e) => {
                    error!(error = %e, provider = %provider.name, "provider registry: failed to build detector, dropping capability");
                }
            }
        }

        let previous = self.snapshot.load_full();
        for (capability, old_detector) in &previous.detectors {
            let still_current = detectors
                .get(capability)
                .is_some_and(|new_detector| Arc::ptr_eq(old_detector, new_detector));
            if !still_current {
                old_detector.release();
            }
        }

        self.snapshot.store(Arc::new(Snapshot {
            detectors,
            providers: by_capability,
        }));
        self.mirror
            .store(&ProviderSetSnapshot {
                providers: providers.to_vec(),
            })
            .await;
        info!(capabilities = self.current().active_capabilities().len(), "provider registry: reload complete");
        Ok(())
    }

    fn build_detector(&self, provider: &Provider) -> Result<Arc<dyn ImageDetector>> {
        let model_identifier = provider
            .config
            .get("model_identifier")
            .and_then(|v| v.as_str())
            .unwrap_or("default")
            .to_string();

        match (provider.capability, provider.provider_type.as_str()) {
            (Capability::ObjectDetection, "gcp_vision") => Ok(Arc::new(HostedVisionAdapter::new(
                self.hosted_vision_base_url.clone(),
                self.hosted_vision_api_key.clone(),
                Capability::ObjectDetection,
                model_identifier,
            ))),
            (Capability::ObjectDetection, "local_yolo") => Ok(Arc::new(LocalObjectDetector::new(
                self.local_object_endpoint.clone(),
                model_identifier,
            ))),
            (Capability::LogoDetection, "gcp_vision") => Ok(Arc::new(HostedVisionAdapter::new(
                self.hosted_vision_base_url.clone(),
                self.hosted_vision_api_key.clone(),
                Capability::LogoDetection,
                model_identifier,
            ))),
            (Capability::LogoDetection, "local_clip") => Ok(Arc::new(PromptedLogoClassifier::new(
                self.hosted_vision_base_url.clone(),
                model_identifier,
                self.brands_repo.clone(),
            ))),
            (Capability::TextDetection, "gcp_vision") => Ok(Arc::new(HostedVisionAdapter::new(
                self.hosted_vision_base_url.clone(),
                self.hosted_vision_api_key.clone(),
                Capability::TextDetection,
                model_identifier,
            ))),
            (Capability::TextDetection, "local_tesseract") => Ok(Arc::new(LocalOcrAdapter::default())),
            (capability, provider_type) => Err(Error::AmbiguousCapability(format!(
                "no detector for capability {} with provider_type {provider_type}",
                capability.as_str()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot_has_no_capabilities() {
        let snapshot = Snapshot::empty();
        assert!(snapshot.active_capabilities().is_empty());
        assert!(!snapshot.has(Capability::ObjectDetection));
    }
}
