//! The seam between the worker pool and the subscription bus. The bus
//! implementation (and its WebSocket/HTTP surface) lives in a separate
//! crate that the worker pool has no reason to depend on directly, so the
//! two meet here instead of through a direct crate dependency.

use crate::ids::StreamKey;
use crate::models::Analysis;
use async_trait::async_trait;

/// Fans a persisted analysis out to whatever is subscribed to its stream.
/// Implementations must never block the caller on a slow or gone
/// subscriber — a worker publishing a result should never stall because a
/// client stopped reading.
#[async_trait]
pub trait AnalysisBroadcaster: Send + Sync {
    async fn broadcast(&self, stream_key: &StreamKey, analysis: &Analysis);
}

/// Discards everything. Useful for workers run without a bus attached
/// (tests, offline batch reprocessing).
pub struct NullBroadcaster;

#[async_trait]
impl AnalysisBroadcaster for NullBroadcaster {
    async fn broadcast(&self, _stream_key: &StreamKey, _analysis: &Analysis) {}
}
