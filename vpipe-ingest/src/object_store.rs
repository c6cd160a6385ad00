//! Event source for deployments where segments land in an object store
//! (e.g. S3-compatible storage behind the media segmenter) rather than a
//! local filesystem. The segmenter or a bucket-notification relay calls
//! `notify` per finalized object; this type just forwards to the queue.

use crate::{EventSource, SourceInfo};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use vpipe_core::error::Result;
use vpipe_core::models::SegmentEvent;
use vpipe_queue::Queue;

pub struct ObjectStoreNotifier {
    bucket: String,
    queue: std::sync::Arc<Queue>,
    cancel: CancellationToken,
}

impl ObjectStoreNotifier {
    #[must_use]
    pub fn new(bucket: impl Into<String>, queue: std::sync::Arc<Queue>) -> Self {
        Self {
            bucket: bucket.into(),
            queue,
            cancel: CancellationToken::new(),
        }
    }

    /// Called by the external notification relay for each finalized object.
    pub async fn notify(&self, stream_key: vpipe_core::ids::StreamKey, object_key: &str) -> Result<()> {
        let event = SegmentEvent {
            stream_key,
            segment_path: format!("s3://{}/{object_key}", self.bucket),
            source_tag: "object_store".to_string(),
            attempts: 0,
            session_id: None,
        };
        self.queue.enqueue(&event).await?;
        Ok(())
    }
}

#[async_trait]
impl EventSource for ObjectStoreNotifier {
    /// There is no polling loop here — `notify` is invoked directly by the
    /// relay. `start` just waits for cancellation so the process has a
    /// uniform shutdown path regardless of which source is active.
    async fn start(&self) -> Result<()> {
        self.cancel.cancelled().await;
        Ok(())
    }

    async fn stop(&self) {
        self.cancel.cancel();
    }

    fn info(&self) -> SourceInfo {
        SourceInfo {
            kind: "object_store",
            description: format!("bucket {}", self.bucket),
        }
    }
}
