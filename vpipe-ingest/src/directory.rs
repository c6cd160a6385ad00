//! Polls a directory for newly finalized segment files, parses the stream
//! key out of the filename, and enqueues one event per new file.
//!
//! Filename convention: `<stream_key>-<segment_number>.<ext>`. Stream key
//! extraction splits on the last `-`, mirroring the original watcher's
//! `rsplit('-', 1)` — this means a stream key itself must not contain `-`
//! followed only by digits in a way that could be mistaken for a segment
//! suffix, which the operator-facing naming convention already guarantees.

use crate::{EventSource, SourceInfo};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vpipe_core::error::Result;
use vpipe_core::ids::{SessionId, StreamKey};
use vpipe_core::models::SegmentEvent;
use vpipe_queue::Queue;
use vpipe_store::StreamRepository;

pub struct DirectoryWatcher {
    watch_dir: PathBuf,
    poll_interval: Duration,
    processed: Mutex<HashSet<PathBuf>>,
    queue: std::sync::Arc<Queue>,
    streams: StreamRepository,
    cancel: CancellationToken,
    /// The stream key the last processed segment resolved to, used to
    /// detect a stream activating (or switching) so the session boundary
    /// can be advanced exactly once per activation.
    last_active: Mutex<Option<StreamKey>>,
}

impl DirectoryWatcher {
    #[must_use]
    pub fn new(
        watch_dir: impl Into<PathBuf>,
        poll_interval: Duration,
        queue: std::sync::Arc<Queue>,
        streams: StreamRepository,
    ) -> Self {
        Self {
            watch_dir: watch_dir.into(),
            poll_interval,
            processed: Mutex::new(HashSet::new()),
            queue,
            streams,
            cancel: CancellationToken::new(),
            last_active: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// `"<stream_key>-<segment_number>.ts"` -> `"stream_key"`. Returns
    /// `None` for anything not ending in `.ts` or with no `-` in the stem.
    fn stream_key_from_filename(filename: &str) -> Option<&str> {
        let stem = filename.strip_suffix(".ts")?;
        let (key, _segment_number) = stem.rsplit_once('-')?;
        if key.is_empty() {
            None
        } else {
            Some(key)
        }
    }

    async fn scan_once(&self) {
        let mut entries = match tokio::fs::read_dir(&self.watch_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!(error = %e, dir = %self.watch_dir.display(), "directory watcher: scan failed");
                return;
            }
        };

        let mut new_files = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "directory watcher: error reading directory entries");
                    break;
                }
            };

            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("ts") {
                continue;
            }

            let already_seen = self.processed.lock().expect("processed set lock is never held across await").contains(&path);
            if !already_seen {
                new_files.push(path);
            }
        }

        for path in new_files {
            self.process_new_segment(&path).await;
            self.processed.lock().expect("processed set lock is never held across await").insert(path);
        }
    }

    async fn process_new_segment(&self, path: &Path) {
        let filename = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => return,
        };

        let (stream_key, mut session_id) = match self.resolve_stream_key(filename).await {
            Some(pair) => pair,
            None => {
                warn!(segment = filename, "directory watcher: no active stream, skipping segment");
                return;
            }
        };

        let activated = {
            let mut last_active = self
                .last_active
                .lock()
                .expect("last_active lock is never held across await");
            let activated = last_active.as_ref() != Some(&stream_key);
            *last_active = Some(stream_key.clone());
            activated
        };

        if activated {
            let new_session = SessionId::new();
            match self.streams.reset_session(&stream_key, &new_session).await {
                Ok(()) => session_id = Some(new_session),
                Err(e) => warn!(
                    error = %e,
                    stream_key = %stream_key,
                    "directory watcher: failed to reset session on stream activation"
                ),
            }
        }

        let event = SegmentEvent {
            stream_key,
            segment_path: path.display().to_string(),
            source_tag: "directory".to_string(),
            attempts: 0,
            session_id,
        };

        match self.queue.enqueue(&event).await {
            Ok(depth) => info!(segment = filename, queue_depth = depth, "directory watcher: queued new segment"),
            Err(e) => warn!(error = %e, segment = filename, "directory watcher: failed to enqueue segment"),
        }
    }

    /// Prefer the filename's own stream key when it parses; otherwise
    /// fall back to the single authoritative active stream. Either way,
    /// returns the stream's current `session_id` alongside its key.
    async fn resolve_stream_key(&self, filename: &str) -> Option<(StreamKey, Option<SessionId>)> {
        if let Some(key) = Self::stream_key_from_filename(filename) {
            let stream_key = StreamKey::from_string(key.to_string());
            let session_id = match self.streams.get(&stream_key).await {
                Ok(Some(stream)) => stream.session_id,
                Ok(None) => None,
                Err(e) => {
                    warn!(error = %e, "directory watcher: failed to look up stream session");
                    None
                }
            };
            return Some((stream_key, session_id));
        }

        match self.streams.active().await {
            Ok(Some(stream)) => Some((stream.stream_key, stream.session_id)),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "directory watcher: failed to resolve active stream");
                None
            }
        }
    }
}

#[async_trait]
impl EventSource for DirectoryWatcher {
    async fn start(&self) -> Result<()> {
        info!(dir = %self.watch_dir.display(), "directory watcher: starting");

        // Initial scan catches segments written before the watcher started.
        self.scan_once().await;

        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("directory watcher: stopped");
                    return Ok(());
                }
                _ = interval.tick() => {
                    self.scan_once().await;
                }
            }
        }
    }

    async fn stop(&self) {
        self.cancel.cancel();
    }

    fn info(&self) -> SourceInfo {
        SourceInfo {
            kind: "directory",
            description: format!("polling {}", self.watch_dir.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stream_key_from_conventional_filename() {
        assert_eq!(
            DirectoryWatcher::stream_key_from_filename("studio-feed-102.ts"),
            Some("studio-feed")
        );
    }

    #[test]
    fn rejects_non_ts_files() {
        assert_eq!(DirectoryWatcher::stream_key_from_filename("studio-feed-102.mp4"), None);
    }

    #[test]
    fn rejects_filename_without_segment_suffix() {
        assert_eq!(DirectoryWatcher::stream_key_from_filename("nodash.ts"), None);
    }
}
