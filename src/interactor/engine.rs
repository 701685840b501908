use std::sync::Arc;

use crate::interactor::config::InteractorConfig;
use crate::interactor::runtime::{self, InteractorHandle};
use crate::interactor::traits::{ResettableFrameSource, StreamPublisher, TracePublisher};

/// Top-level orchestrator: owns the publisher and the idle sources, and
/// starts the router plus the two pacing loops. A talking source is
/// attached to the returned handle once a worker shows up.
pub struct LiveInteractor {
    config: InteractorConfig,
    publisher: Arc<dyn StreamPublisher>,
    idle_video: Arc<dyn ResettableFrameSource>,
    idle_audio: Arc<dyn ResettableFrameSource>,
}

impl LiveInteractor {
    pub fn new(
        config: InteractorConfig,
        publisher: Arc<dyn StreamPublisher>,
        idle_video: Arc<dyn ResettableFrameSource>,
        idle_audio: Arc<dyn ResettableFrameSource>,
    ) -> Self {
        Self {
            config,
            publisher,
            idle_video,
            idle_audio,
        }
    }

    pub fn with_defaults(
        idle_video: Arc<dyn ResettableFrameSource>,
        idle_audio: Arc<dyn ResettableFrameSource>,
    ) -> Self {
        Self::new(
            InteractorConfig::default(),
            Arc::new(TracePublisher::default()),
            idle_video,
            idle_audio,
        )
    }

    pub fn config(&self) -> &InteractorConfig {
        &self.config
    }

    pub fn start(&self) -> InteractorHandle {
        runtime::spawn_loops(
            self.config.clone(),
            Arc::clone(&self.publisher),
            Arc::clone(&self.idle_video),
            Arc::clone(&self.idle_audio),
        )
    }
}
