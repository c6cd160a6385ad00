//! Event sources: components that notice a newly finalized segment and
//! hand it to the queue. Exactly one runs per process, selected by
//! `IngestConfig::source`.

pub mod directory;
pub mod object_store;
pub mod webhook;

pub use directory::DirectoryWatcher;
pub use object_store::ObjectStoreNotifier;
pub use webhook::WebhookReceiver;

use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub kind: &'static str,
    pub description: String,
}

#[async_trait]
pub trait EventSource: Send + Sync {
    /// Start emitting segment events. Returns once `stop` is called or the
    /// source's cancellation token fires; a transient I/O error during a
    /// scan is logged and retried rather than propagated.
    async fn start(&self) -> vpipe_core::error::Result<()>;

    async fn stop(&self);

    fn info(&self) -> SourceInfo;
}
