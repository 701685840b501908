use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::interactor::types::{AvatarState, MediaFrame, SourceError, TrackType};

/// Uniform capability over every frame producer: looping file sources,
/// queue-backed talking sources, buffered clip replays.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Blocks until a frame is available. `Ok(None)` means the source is
    /// drained or its feeding queue was closed, which is end-of-data and
    /// not an error.
    async fn next_frame(&self) -> Result<Option<MediaFrame>, SourceError>;

    /// Returns immediately; `Ok(None)` means nothing is ready right now.
    async fn try_next_frame(&self) -> Result<Option<MediaFrame>, SourceError>;

    /// The avatar state this source's content represents.
    fn avatar_state(&self) -> AvatarState;

    /// Releases underlying resources. Idempotent.
    async fn close(&self);
}

/// Refinement for sources that can rewind in place. Idle sources must be
/// resettable so re-entering idle always restarts from the first frame.
#[async_trait]
pub trait ResettableFrameSource: FrameSource {
    async fn reset(&self) -> Result<(), SourceError>;
}

/// Outbound sink for finished frames. Implemented externally by the real
/// media room adapter; failures are logged by the pacer and never retried
/// within a tick.
#[async_trait]
pub trait StreamPublisher: Send + Sync {
    async fn publish(&self, frame: &MediaFrame) -> Result<()>;
}

/// Default sink: counts frames per track and debug-logs them. Stands in
/// wherever no real media room is wired.
#[derive(Debug, Default)]
pub struct TracePublisher {
    video_frames: AtomicU64,
    audio_frames: AtomicU64,
}

impl TracePublisher {
    pub fn video_frames(&self) -> u64 {
        self.video_frames.load(Ordering::Relaxed)
    }

    pub fn audio_frames(&self) -> u64 {
        self.audio_frames.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl StreamPublisher for TracePublisher {
    async fn publish(&self, frame: &MediaFrame) -> Result<()> {
        let count = match frame.track {
            TrackType::Video => self.video_frames.fetch_add(1, Ordering::Relaxed) + 1,
            TrackType::Audio => self.audio_frames.fetch_add(1, Ordering::Relaxed) + 1,
        };
        debug!(
            target: "live_interactor",
            track = frame.track.as_str(),
            bytes = frame.payload.len(),
            keyframe = frame.keyframe,
            count,
            "frame published"
        );
        Ok(())
    }
}
