mod handle;
mod state;
mod worker;

pub use handle::InteractorHandle;

use std::sync::Arc;

use tokio::sync::watch;

use crate::interactor::config::InteractorConfig;
use crate::interactor::traits::{ResettableFrameSource, StreamPublisher};
use crate::interactor::types::AvatarState;
use crate::queue::{self, QueuePolicy};

use self::state::{StateCell, TalkingSlot};
use self::worker::{AudioPacer, RouterTask, VideoPacer};

pub(crate) fn spawn_loops(
    config: InteractorConfig,
    publisher: Arc<dyn StreamPublisher>,
    idle_video: Arc<dyn ResettableFrameSource>,
    idle_audio: Arc<dyn ResettableFrameSource>,
) -> InteractorHandle {
    let (stop_tx, stop_rx) = watch::channel(false);
    let state = Arc::new(StateCell::new(AvatarState::Idle));
    let slot = Arc::new(TalkingSlot::default());

    let (video_tx, video_rx) =
        queue::bounded(config.talking_buffer_capacity, QueuePolicy::Blocking);
    let (audio_tx, audio_rx) =
        queue::bounded(config.talking_buffer_capacity, QueuePolicy::Blocking);

    let router = RouterTask::new(
        config.clone(),
        Arc::clone(&slot),
        video_tx,
        audio_tx,
        stop_rx.clone(),
    )
    .spawn();

    let audio_pacer = AudioPacer::new(
        config.clone(),
        Arc::clone(&publisher),
        idle_audio,
        audio_rx,
        stop_rx.clone(),
    )
    .spawn();

    let video_pacer = VideoPacer::new(
        config,
        publisher,
        idle_video,
        video_rx,
        Arc::clone(&state),
        stop_rx,
    )
    .spawn();

    InteractorHandle::new(stop_tx, state, slot, router, audio_pacer, video_pacer)
}
