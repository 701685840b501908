use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::interactor::constants::TARGET;
use crate::interactor::traits::FrameSource;
use crate::interactor::types::AvatarState;

use super::state::{StateCell, TalkingSlot};

/// Owner of the three pacing loops. Dropping the handle aborts them; calling
/// `stop` lets them observe the signal and exit within one tick.
pub struct InteractorHandle {
    stop_tx: watch::Sender<bool>,
    stopped: AtomicBool,
    state: Arc<StateCell>,
    slot: Arc<TalkingSlot>,
    router: Option<JoinHandle<()>>,
    audio_pacer: Option<JoinHandle<()>>,
    video_pacer: Option<JoinHandle<()>>,
}

impl InteractorHandle {
    pub(super) fn new(
        stop_tx: watch::Sender<bool>,
        state: Arc<StateCell>,
        slot: Arc<TalkingSlot>,
        router: JoinHandle<()>,
        audio_pacer: JoinHandle<()>,
        video_pacer: JoinHandle<()>,
    ) -> Self {
        Self {
            stop_tx,
            stopped: AtomicBool::new(false),
            state,
            slot,
            router: Some(router),
            audio_pacer: Some(audio_pacer),
            video_pacer: Some(video_pacer),
        }
    }

    /// Attaches (or replaces) the talking source. May be called before any
    /// worker exists; the router polls the slot until one appears.
    pub async fn attach_talking_source(&self, source: Arc<dyn FrameSource>) {
        self.slot.attach(source).await;
    }

    /// Diagnostic read of the avatar state. Only the video pacer mutates it.
    pub fn current_state(&self) -> AvatarState {
        self.state.load()
    }

    /// Notification hook for inbound viewer text. Forwarding to the worker
    /// is the outward-facing side's job.
    pub fn on_user_comment(&self, text: &str) {
        info!(target: TARGET, comment = text, "user comment received");
    }

    /// Signals all three loops to stop. Idempotent; the signal fires once.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            let _ = self.stop_tx.send(true);
            info!(target: TARGET, "stop signalled");
        }
    }

    #[cfg(test)]
    pub(crate) fn loops_finished(&self) -> bool {
        [&self.router, &self.audio_pacer, &self.video_pacer]
            .iter()
            .all(|handle| handle.as_ref().map(JoinHandle::is_finished).unwrap_or(true))
    }
}

impl Drop for InteractorHandle {
    fn drop(&mut self) {
        for handle in [
            self.router.take(),
            self.audio_pacer.take(),
            self.video_pacer.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}
