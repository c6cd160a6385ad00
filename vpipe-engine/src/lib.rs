//! Turns a segment path into typed results: decodes a representative frame,
//! dispatches it through the configured execution strategy per requested
//! capability, and always computes the local-only visual summary.

pub mod visual;

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use vpipe_adapters::strategy::ExecutionStrategy;
use vpipe_adapters::{Frame, MotionSummary, RawDetection, VideoAnalyzer};
use vpipe_core::cache::{SingleFlight, SingleFlightError};
use vpipe_core::error::{Error, Result};
use vpipe_core::ids::StreamKey;
use vpipe_core::models::{Capability, VisualSummary};
use vpipe_registry::ProviderRegistry;

/// Results for every capability requested from one `analyze_frame` or
/// `analyze_segment` call.
#[derive(Debug, Clone, Default)]
pub struct CapabilityResults {
    pub detections: HashMap<Capability, Vec<RawDetection>>,
    pub visual_summary: Option<VisualSummary>,
    pub motion_summary: Option<MotionSummary>,
    /// Requested capabilities with no active provider, so the caller can
    /// still persist whatever did resolve and surface the gap afterward.
    pub unconfigured: Vec<Capability>,
}

/// Key for the per-segment single-flight group: duplicate concurrent
/// deliveries of the same `(stream, segment, capability)` collapse to one
/// underlying analysis call.
type InflightKey = (StreamKey, String, Capability);

#[derive(Clone)]
struct InflightResult(Vec<RawDetection>);

#[derive(Clone, Debug)]
struct InflightError(String);

pub struct AnalysisEngine {
    registry: Arc<ProviderRegistry>,
    strategy: Arc<dyn ExecutionStrategy>,
    video_adapters: DashMap<Capability, Arc<dyn VideoAnalyzer>>,
    inflight: SingleFlight<InflightKey, InflightResult, InflightError>,
}

impl AnalysisEngine {
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>, strategy: Arc<dyn ExecutionStrategy>) -> Self {
        Self {
            registry,
            strategy,
            video_adapters: DashMap::new(),
            inflight: SingleFlight::new(),
        }
    }

    pub fn register_video_adapter(&self, capability: Capability, adapter: Arc<dyn VideoAnalyzer>) {
        self.video_adapters.insert(capability, adapter);
    }

    /// The provider currently active for `capability`, if any — used to
    /// stamp provenance onto the analyses the worker pool persists.
    #[must_use]
    pub fn provider_for(&self, capability: Capability) -> Option<vpipe_core::models::Provider> {
        self.registry.current().provider_for(capability).cloned()
    }

    /// The capabilities a segment should be analyzed for right now: every
    /// capability with an active provider, `VisualAnalysis` (always
    /// computed locally, no provider needed), and `MotionAnalysis` if a
    /// video adapter has been registered. The worker pool calls this once
    /// per leased event rather than threading a requested-capability set
    /// through the queue, so a provider activated after a segment event
    /// was enqueued is still picked up by the time it's leased.
    #[must_use]
    pub fn requested_capabilities(&self) -> Vec<Capability> {
        let mut capabilities = self.registry.current().active_capabilities();
        if !capabilities.contains(&Capability::VisualAnalysis) {
            capabilities.push(Capability::VisualAnalysis);
        }
        if self.video_adapters.contains_key(&Capability::MotionAnalysis)
            && !capabilities.contains(&Capability::MotionAnalysis)
        {
            capabilities.push(Capability::MotionAnalysis);
        }
        capabilities
    }

    /// Opens the segment with `ffmpeg-next` and decodes the first readable
    /// video frame to RGB8. Seeking within a still-being-written segment is
    /// unreliable, so this deliberately never seeks past the start.
    pub async fn decode_frame(&self, segment_path: &str) -> Result<Frame> {
        let segment_path = segment_path.to_string();
        tokio::task::spawn_blocking(move || decode_first_frame(&segment_path))
            .await
            .map_err(|e| Error::Internal(format!("decode task panicked: {e}")))?
    }

    /// Runs every requested frame-based capability through the configured
    /// strategy, deduplicating concurrent identical deliveries, and always
    /// computes the visual summary locally.
    pub async fn analyze_frame(
        &self,
        stream_key: &StreamKey,
        segment_path: &str,
        frame: &Frame,
        capabilities: &[Capability],
        confidence_threshold: f32,
    ) -> CapabilityResults {
        let mut results = CapabilityResults {
            visual_summary: Some(visual::compute_visual_summary(frame)),
            ..Default::default()
        };

        let snapshot = self.registry.current();
        for capability in capabilities {
            if !capability.is_frame_based() || *capability == Capability::VisualAnalysis {
                continue;
            }
            let Some(adapter) = snapshot.get(*capability) else {
                results.unconfigured.push(*capability);
                continue;
            };

            let key = (stream_key.clone(), segment_path.to_string(), *capability);
            let strategy = Arc::clone(&self.strategy);
            let adapter = Arc::clone(&adapter);
            let frame = frame.clone();

            let outcome = self
                .inflight
                .do_work(key, async move {
                    strategy
                        .execute_detection(adapter.as_ref(), &frame, confidence_threshold)
                        .await
                        .map(InflightResult)
                        .map_err(|e| InflightError(e.to_string()))
                })
                .await;

            match outcome {
                Ok(InflightResult(detections)) => {
                    results.detections.insert(*capability, detections);
                }
                Err(SingleFlightError::Inner(InflightError(msg))) => {
                    warn!(capability = capability.as_str(), error = %msg, "analysis engine: detection failed");
                }
                Err(SingleFlightError::WorkerFailed) => {
                    warn!(capability = capability.as_str(), "analysis engine: single-flight leader dropped");
                }
            }
        }

        results
    }

    /// Runs the motion analyzer (currently the only temporal capability)
    /// against the whole segment file, if one is configured.
    pub async fn analyze_segment(&self, segment_path: &str, capabilities: &[Capability]) -> CapabilityResults {
        let mut results = CapabilityResults::default();
        if capabilities.contains(&Capability::MotionAnalysis) {
            results.motion_summary = self.analyze_motion(segment_path).await;
        }
        results
    }

    async fn analyze_motion(&self, segment_path: &str) -> Option<MotionSummary> {
        let adapter = self.video_adapters.get(&Capability::MotionAnalysis)?;
        match adapter.analyze(segment_path).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(error = %e, "analysis engine: motion analysis failed");
                None
            }
        }
    }
}

fn decode_first_frame(segment_path: &str) -> Result<Frame> {
    ffmpeg_next::init().map_err(|e| Error::DecodeFailed(format!("ffmpeg init: {e}")))?;

    let mut input = ffmpeg_next::format::input(&segment_path)
        .map_err(|e| Error::SegmentNotFound(format!("{segment_path}: {e}")))?;

    let stream = input
        .streams()
        .best(ffmpeg_next::media::Type::Video)
        .ok_or_else(|| Error::DecodeFailed("no video stream in segment".to_string()))?;
    let stream_index = stream.index();

    let context = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
        .map_err(|e| Error::DecodeFailed(format!("codec context: {e}")))?;
    let mut decoder = context
        .decoder()
        .video()
        .map_err(|e| Error::DecodeFailed(format!("video decoder: {e}")))?;

    let (width, height) = (decoder.width(), decoder.height());
    let mut scaler = ffmpeg_next::software::scaling::Context::get(
        decoder.format(),
        width,
        height,
        ffmpeg_next::format::Pixel::RGB24,
        width,
        height,
        ffmpeg_next::software::scaling::Flags::BILINEAR,
    )
    .map_err(|e| Error::DecodeFailed(format!("scaler setup: {e}")))?;

    let mut decoded = ffmpeg_next::frame::Video::empty();
    let mut rgb = ffmpeg_next::frame::Video::empty();

    for (packet_stream, packet) in input.packets() {
        if packet_stream.index() != stream_index {
            continue;
        }
        decoder
            .send_packet(&packet)
            .map_err(|e| Error::DecodeFailed(format!("send_packet: {e}")))?;

        if decoder.receive_frame(&mut decoded).is_ok() {
            scaler
                .run(&decoded, &mut rgb)
                .map_err(|e| Error::DecodeFailed(format!("scale to rgb: {e}")))?;
            return Ok(Frame::new(width, height, rgb.data(0).to_vec()));
        }
    }

    Err(Error::DecodeFailed(
        "segment contained no decodable video frame".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_missing_file_is_segment_not_found() {
        let result = decode_first_frame("/nonexistent/path/does-not-exist.ts");
        assert!(matches!(result, Err(Error::SegmentNotFound(_))));
    }
}
