use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::interactor::constants::TARGET;
use crate::interactor::traits::FrameSource;
use crate::interactor::types::AvatarState;

/// Diagnostic view of the avatar state. Written only by the video pacer;
/// everyone else reads.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: AvatarState) -> Self {
        Self(AtomicU8::new(encode(state)))
    }

    pub(crate) fn load(&self) -> AvatarState {
        decode(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: AvatarState) {
        self.0.store(encode(state), Ordering::Release);
    }
}

fn encode(state: AvatarState) -> u8 {
    match state {
        AvatarState::Idle => 0,
        AvatarState::Listening => 1,
        AvatarState::Thinking => 2,
        AvatarState::Talking => 3,
    }
}

fn decode(value: u8) -> AvatarState {
    match value {
        1 => AvatarState::Listening,
        2 => AvatarState::Thinking,
        3 => AvatarState::Talking,
        _ => AvatarState::Idle,
    }
}

/// Late-attachable talking source slot. The worker may connect long after
/// the pacer loops have started.
#[derive(Default)]
pub(crate) struct TalkingSlot {
    source: RwLock<Option<Arc<dyn FrameSource>>>,
}

impl TalkingSlot {
    pub(crate) async fn attach(&self, source: Arc<dyn FrameSource>) {
        let mut guard = self.source.write().await;
        if guard.is_some() {
            info!(target: TARGET, "replacing attached talking source");
        }
        *guard = Some(source);
    }

    pub(crate) async fn get(&self) -> Option<Arc<dyn FrameSource>> {
        self.source.read().await.clone()
    }
}
