//! Turns leased segment events into persisted, broadcast analyses.
//!
//! `Pool::run()` spawns a fixed number of consumer tasks, each blocking on
//! `Queue::lease` (parked on Redis's own `BLOCK`, not a spin loop) and
//! handing the leased event off to a per-capability-group sub-queue so a
//! slow adapter on one capability never backs up another. Every path out
//! of `process_event` ends in exactly one of: ack, nack, or a terminal
//! failure mark — never more than one, never none.

mod dispatch;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use chrono::{DateTime, Utc};
use vpipe_core::broadcast::AnalysisBroadcaster;
use vpipe_core::error::Disposition;
use vpipe_core::ids::{AnalysisId, ProviderId};
use vpipe_core::metrics::Metrics;
use vpipe_core::models::{Analysis, Capability, SegmentEvent};
use vpipe_core::resilience::backoff::worker_delay;
use vpipe_engine::AnalysisEngine;
use vpipe_queue::Queue;
use vpipe_store::{AnalysisRepository, QueueItemRepository};

pub const MAX_RETRIES: u32 = 3;
const MAX_BACKOFF_SECONDS: u64 = 60;
const CAPABILITY_QUEUES: [Capability; 5] = [
    Capability::ObjectDetection,
    Capability::LogoDetection,
    Capability::TextDetection,
    Capability::MotionAnalysis,
    Capability::VisualAnalysis,
];

/// Per-capability concurrency limits. `ConfigManagement` has no adapter of
/// its own (providers/brands CRUD is out of scope here) and is not leased
/// from this queue, so it isn't listed.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub concurrency: usize,
    pub lease_timeout: Duration,
    pub confidence_threshold: f32,
    pub capability_concurrency: HashMap<Capability, usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let mut capability_concurrency = HashMap::new();
        for capability in CAPABILITY_QUEUES {
            capability_concurrency.insert(capability, 4);
        }
        Self {
            concurrency: 4,
            lease_timeout: Duration::from_secs(5),
            confidence_threshold: 0.5,
            capability_concurrency,
        }
    }
}

pub struct Pool {
    queue: Arc<Queue>,
    engine: Arc<AnalysisEngine>,
    store: AnalysisRepository,
    queue_items: QueueItemRepository,
    broadcaster: Arc<dyn AnalysisBroadcaster>,
    config: PoolConfig,
    semaphores: HashMap<Capability, Arc<Semaphore>>,
    metrics: Arc<Metrics>,
}

impl Pool {
    #[must_use]
    pub fn new(
        queue: Arc<Queue>,
        engine: Arc<AnalysisEngine>,
        store: AnalysisRepository,
        queue_items: QueueItemRepository,
        broadcaster: Arc<dyn AnalysisBroadcaster>,
        config: PoolConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        let semaphores = CAPABILITY_QUEUES
            .into_iter()
            .map(|capability| {
                let permits = *config.capability_concurrency.get(&capability).unwrap_or(&4);
                (capability, Arc::new(Semaphore::new(permits)))
            })
            .collect();

        Self {
            queue,
            engine,
            store,
            queue_items,
            broadcaster,
            config,
            semaphores,
            metrics,
        }
    }

    /// Spawns `concurrency` consumer tasks and blocks until `cancel` fires,
    /// then waits for in-flight leases to drain.
    pub async fn run(self: Arc<Self>, consumer_prefix: &str, cancel: CancellationToken) {
        let mut handles = Vec::with_capacity(self.config.concurrency);
        for worker_index in 0..self.config.concurrency {
            let pool = Arc::clone(&self);
            let consumer = format!("{consumer_prefix}-{worker_index}");
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                pool.consumer_loop(&consumer, cancel).await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker pool: consumer task panicked");
            }
        }
    }

    /// Periodically reclaims entries idle longer than `min_idle` (an
    /// un-acked lease from a consumer that crashed or was killed) and
    /// redispatches them through the same path a fresh lease takes. The
    /// reclaiming consumer name is distinct from the regular pool consumers
    /// so `XAUTOCLAIM`'s idle-time bookkeeping attributes the claim to the
    /// sweep itself.
    pub async fn run_sweep(self: Arc<Self>, consumer: &str, min_idle: Duration, interval: Duration, cancel: CancellationToken) {
        info!(consumer, idle_secs = min_idle.as_secs(), "worker pool: reclaim sweep started");
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let reclaimed = match self.queue.reclaim_expired(consumer, min_idle).await {
                Ok(reclaimed) => reclaimed,
                Err(e) => {
                    warn!(error = %e, "worker pool: reclaim sweep failed, will retry next tick");
                    continue;
                }
            };

            for (event, token) in reclaimed {
                warn!(segment = %event.segment_path, "worker pool: reclaimed expired lease");
                self.dispatch_leased(&event, &token).await;
            }
        }
        info!(consumer, "worker pool: reclaim sweep stopped");
    }

    /// Splits the requested capabilities into their sub-queues, acquires
    /// each sub-queue's concurrency permit, and processes the event once
    /// per sub-queue. Shared by the regular lease path and the reclaim
    /// sweep so a redelivered event is handled identically either way.
    async fn dispatch_leased(&self, event: &SegmentEvent, token: &vpipe_queue::LeaseToken) {
        let capability_requests = self.engine.requested_capabilities();
        let mut by_capability: HashMap<Capability, Vec<Capability>> = HashMap::new();
        for capability in capability_requests {
            by_capability
                .entry(dispatch::sub_queue_for(capability))
                .or_default()
                .push(capability);
        }

        for (sub_queue, capabilities) in by_capability {
            let semaphore = Arc::clone(
                self.semaphores
                    .get(&sub_queue)
                    .expect("every capability maps to a known sub-queue"),
            );
            let Ok(_permit) = semaphore.acquire_owned().await else {
                continue;
            };
            self.process_event(event, token, &capabilities).await;
        }
    }

    async fn consumer_loop(&self, consumer: &str, cancel: CancellationToken) {
        info!(consumer, "worker pool: consumer started");
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let leased = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                leased = self.queue.lease(consumer, self.config.lease_timeout) => leased,
            };

            let (event, token) = match leased {
                Ok(Some(pair)) => pair,
                Ok(None) => continue,
                Err(e) => {
                    warn!(consumer, error = %e, "worker pool: lease failed, backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            self.dispatch_leased(&event, &token).await;
        }
        info!(consumer, "worker pool: consumer stopped");
    }

    /// Runs one sub-queue's worth of capabilities for one event, then acks,
    /// nacks, or marks it terminally failed.
    async fn process_event(&self, event: &SegmentEvent, token: &vpipe_queue::LeaseToken, capabilities: &[Capability]) {
        let item_id = format!("{}:{}:{}", event.stream_key, event.segment_path, capabilities[0].as_str());
        let _ = self
            .queue_items
            .mark_leased(&item_id, &event.stream_key, &event.segment_path, capabilities[0], event.attempts)
            .await;

        match self.run_analysis(event, capabilities).await {
            Ok(()) => {
                if let Err(e) = self.queue.ack(token).await {
                    error!(error = %e, "worker pool: ack failed after successful analysis");
                }
                let _ = self.queue_items.mark_done(&item_id).await;
            }
            Err(e) => self.handle_failure(event, token, &item_id, e).await,
        }
    }

    async fn handle_failure(
        &self,
        event: &SegmentEvent,
        token: &vpipe_queue::LeaseToken,
        item_id: &str,
        error: vpipe_core::error::Error,
    ) {
        match error.disposition() {
            Disposition::Success => {
                // A redelivered event raced another worker to the same
                // analysis; the row already exists. Ack and move on, no
                // broadcast — there's nothing new to publish.
                if let Err(e) = self.queue.ack(token).await {
                    error!(error = %e, "worker pool: ack failed on duplicate-analysis success");
                }
                let _ = self.queue_items.mark_done(item_id).await;
            }
            Disposition::Drop => {
                warn!(segment = %event.segment_path, error = %error, "worker pool: dropping event");
                if let Err(e) = self.queue.ack(token).await {
                    error!(error = %e, "worker pool: ack failed while dropping event");
                }
                let _ = self.queue_items.mark_failed(item_id, &error.to_string()).await;
            }
            Disposition::Retry if event.attempts < MAX_RETRIES => {
                let delay = worker_delay(event.attempts, MAX_BACKOFF_SECONDS);
                warn!(
                    segment = %event.segment_path,
                    attempts = event.attempts,
                    delay_secs = delay.as_secs(),
                    error = %error,
                    "worker pool: transient failure, nacking for retry"
                );
                let mut retried = event.clone();
                retried.attempts += 1;
                tokio::time::sleep(delay).await;
                if let Err(e) = self.queue.nack(token, &retried).await {
                    error!(error = %e, "worker pool: nack failed");
                }
            }
            Disposition::Retry => {
                error!(
                    segment = %event.segment_path,
                    attempts = event.attempts,
                    error = %error,
                    "worker pool: retry budget exhausted, marking failed"
                );
                if let Err(e) = self.queue.ack(token).await {
                    error!(error = %e, "worker pool: ack failed while exhausting retries");
                }
                let _ = self.queue_items.mark_failed(item_id, &error.to_string()).await;
            }
            Disposition::Fail => {
                error!(segment = %event.segment_path, error = %error, "worker pool: terminal failure");
                if let Err(e) = self.queue.ack(token).await {
                    error!(error = %e, "worker pool: ack failed on terminal failure");
                }
                let _ = self.queue_items.mark_failed(item_id, &error.to_string()).await;
            }
        }
    }

    /// Decodes a frame (if any requested capability needs one), runs every
    /// requested capability through the engine, persists the result, and
    /// broadcasts it — always, even when no detections came back.
    async fn run_analysis(&self, event: &SegmentEvent, capabilities: &[Capability]) -> vpipe_core::error::Result<()> {
        let mut analyses = Vec::new();
        let mut unconfigured_error: Option<vpipe_core::error::Error> = None;

        let frame_capabilities: Vec<Capability> = capabilities
            .iter()
            .copied()
            .filter(|c| c.is_frame_based())
            .collect();

        if !frame_capabilities.is_empty() {
            let frame_timestamp = Utc::now();
            let started = std::time::Instant::now();
            let frame = self.engine.decode_frame(&event.segment_path).await?;
            let results = self
                .engine
                .analyze_frame(
                    &event.stream_key,
                    &event.segment_path,
                    &frame,
                    &frame_capabilities,
                    self.config.confidence_threshold,
                )
                .await;
            let processing_time_ms = started.elapsed().as_millis() as i64;

            if !results.unconfigured.is_empty() {
                let capabilities = results
                    .unconfigured
                    .iter()
                    .map(Capability::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                unconfigured_error = Some(vpipe_core::error::Error::UnconfiguredCapability(capabilities));
            }

            if let Some(summary) = results.visual_summary {
                analyses.push(build_analysis(
                    event,
                    Capability::VisualAnalysis,
                    Vec::new(),
                    Some(summary),
                    None,
                    frame_timestamp,
                    self.config.confidence_threshold,
                    processing_time_ms,
                ));
            }
            for capability in &frame_capabilities {
                if *capability == Capability::VisualAnalysis {
                    continue;
                }
                if let Some(detections) = results.detections.get(capability) {
                    let provider_id = self.engine.provider_for(*capability).map(|p| p.id);
                    analyses.push(build_analysis(
                        event,
                        *capability,
                        detections.clone(),
                        None,
                        provider_id,
                        frame_timestamp,
                        self.config.confidence_threshold,
                        processing_time_ms,
                    ));
                }
            }
        }

        if capabilities.contains(&Capability::MotionAnalysis) {
            let frame_timestamp = Utc::now();
            let started = std::time::Instant::now();
            let results = self
                .engine
                .analyze_segment(&event.segment_path, &[Capability::MotionAnalysis])
                .await;
            let processing_time_ms = started.elapsed().as_millis() as i64;
            if let Some(motion) = results.motion_summary {
                let label = format!("activity_score={:.3}", motion.activity_score);
                let detection = vpipe_core::models::Detection {
                    id: vpipe_core::ids::DetectionId::new(),
                    analysis_id: AnalysisId::new(),
                    detection_type: Capability::MotionAnalysis,
                    label,
                    confidence: motion.activity_score.clamp(0.0, 1.0),
                    bbox: None,
                };
                let provider_id = self.engine.provider_for(Capability::MotionAnalysis).map(|p| p.id);
                analyses.push(build_analysis(
                    event,
                    Capability::MotionAnalysis,
                    vec![detection],
                    None,
                    provider_id,
                    frame_timestamp,
                    self.config.confidence_threshold,
                    processing_time_ms,
                ));
            }
        }

        for analysis in analyses {
            let stream_key = analysis.stream_key.clone();
            match self.store.put_analysis(&analysis).await {
                Ok(()) => {
                    self.metrics.analyses_persisted.inc();
                    self.broadcaster.broadcast(&stream_key, &analysis).await;
                }
                Err(e) if e.disposition() == Disposition::Success => {
                    // Already persisted by a racing redelivery; nothing new
                    // to broadcast.
                    self.metrics.analyses_duplicate.inc();
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(e) = unconfigured_error {
            return Err(e);
        }

        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn build_analysis(
    event: &SegmentEvent,
    capability: Capability,
    mut detections: Vec<vpipe_core::models::Detection>,
    visual_summary: Option<vpipe_core::models::VisualSummary>,
    provider_id: Option<ProviderId>,
    frame_timestamp: DateTime<Utc>,
    confidence_threshold: f32,
    processing_time_ms: i64,
) -> Analysis {
    let analysis_id = AnalysisId::new();
    for detection in &mut detections {
        detection.analysis_id = analysis_id.clone();
    }
    Analysis {
        id: analysis_id,
        stream_key: event.stream_key.clone(),
        segment_path: event.segment_path.clone(),
        capability,
        provider_id,
        session_id: event.session_id.clone(),
        captured_at: Utc::now(),
        frame_timestamp,
        confidence_threshold,
        processing_time_ms,
        detections,
        visual_summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_covers_every_capability_queue() {
        let config = PoolConfig::default();
        for capability in CAPABILITY_QUEUES {
            assert!(config.capability_concurrency.contains_key(&capability));
        }
    }
}
