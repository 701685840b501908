use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant};
use tracing::{debug, info, warn};

use crate::interactor::config::InteractorConfig;
use crate::interactor::constants::TARGET;
use crate::interactor::traits::{ResettableFrameSource, StreamPublisher};
use crate::interactor::types::{AvatarState, MediaFrame, TrackType};
use crate::queue::QueueSender;
use crate::telemetry::events::record_state_transition;

use super::state::{StateCell, TalkingSlot};

/// Drains the attached talking source and routes frames into the per-track
/// talking buffers. Inserts block on a full buffer; talking content is
/// never dropped here.
pub(crate) struct RouterTask {
    config: InteractorConfig,
    slot: Arc<TalkingSlot>,
    video_tx: QueueSender<MediaFrame>,
    audio_tx: QueueSender<MediaFrame>,
    stop_rx: watch::Receiver<bool>,
}

impl RouterTask {
    pub(crate) fn new(
        config: InteractorConfig,
        slot: Arc<TalkingSlot>,
        video_tx: QueueSender<MediaFrame>,
        audio_tx: QueueSender<MediaFrame>,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            slot,
            video_tx,
            audio_tx,
            stop_rx,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(mut self) {
        if !wait_startup(&mut self.stop_rx, &self.config).await {
            return;
        }
        debug!(target: TARGET, "router started");

        loop {
            let source = match self.slot.get().await {
                Some(source) => source,
                None => {
                    if !pause(&mut self.stop_rx, self.config.source_retry_delay).await {
                        return;
                    }
                    continue;
                }
            };

            let frame = match source.try_next_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    if !pause(&mut self.stop_rx, self.config.drain_poll_delay).await {
                        return;
                    }
                    continue;
                }
                Err(err) => {
                    warn!(target: TARGET, %err, "talking source read failed");
                    if !pause(&mut self.stop_rx, self.config.drain_poll_delay).await {
                        return;
                    }
                    continue;
                }
            };

            let buffer = match frame.track {
                TrackType::Video => &self.video_tx,
                TrackType::Audio => &self.audio_tx,
            };

            tokio::select! {
                biased;
                _ = self.stop_rx.changed() => return,
                result = buffer.push(frame) => {
                    if result.is_err() {
                        debug!(target: TARGET, "talking buffer closed, router exiting");
                        return;
                    }
                }
            }
        }
    }
}

/// Fires every audio tick and publishes exactly one frame: talking audio
/// when buffered, idle audio otherwise.
pub(crate) struct AudioPacer {
    config: InteractorConfig,
    publisher: Arc<dyn StreamPublisher>,
    idle_audio: Arc<dyn ResettableFrameSource>,
    talking_rx: mpsc::Receiver<MediaFrame>,
    stop_rx: watch::Receiver<bool>,
}

impl AudioPacer {
    pub(crate) fn new(
        config: InteractorConfig,
        publisher: Arc<dyn StreamPublisher>,
        idle_audio: Arc<dyn ResettableFrameSource>,
        talking_rx: mpsc::Receiver<MediaFrame>,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            publisher,
            idle_audio,
            talking_rx,
            stop_rx,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(mut self) {
        if !wait_startup(&mut self.stop_rx, &self.config).await {
            return;
        }
        debug!(target: TARGET, "audio pacer started");

        let mut ticker = interval(self.config.audio_tick);
        loop {
            tokio::select! {
                biased;
                _ = self.stop_rx.changed() => return,
                _ = ticker.tick() => {}
            }

            if let Ok(frame) = self.talking_rx.try_recv() {
                publish(self.publisher.as_ref(), &frame).await;
                continue;
            }

            // Idle audio is expected to always be available; a bad tick is
            // skipped, not propagated.
            match self.idle_audio.next_frame().await {
                Ok(Some(frame)) => publish(self.publisher.as_ref(), &frame).await,
                Ok(None) => debug!(target: TARGET, "idle audio yielded no frame"),
                Err(err) => debug!(target: TARGET, %err, "idle audio read failed, skipping tick"),
            }
        }
    }
}

/// Fires every video tick and runs the Idle/Talking state machine: keyframe
/// gating on entry to Talking, anti-flicker hold and idle-source reset on
/// the way back to Idle.
pub(crate) struct VideoPacer {
    config: InteractorConfig,
    publisher: Arc<dyn StreamPublisher>,
    idle_video: Arc<dyn ResettableFrameSource>,
    talking_rx: mpsc::Receiver<MediaFrame>,
    state: Arc<StateCell>,
    stop_rx: watch::Receiver<bool>,
}

impl VideoPacer {
    pub(crate) fn new(
        config: InteractorConfig,
        publisher: Arc<dyn StreamPublisher>,
        idle_video: Arc<dyn ResettableFrameSource>,
        talking_rx: mpsc::Receiver<MediaFrame>,
        state: Arc<StateCell>,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            publisher,
            idle_video,
            talking_rx,
            state,
            stop_rx,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(mut self) {
        if !wait_startup(&mut self.stop_rx, &self.config).await {
            return;
        }
        debug!(target: TARGET, "video pacer started");

        let mut ticker = interval(self.config.video_tick);
        let mut waiting_for_keyframe = true;
        let mut skipped_interframes = 0_u64;
        let mut last_talk: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;
                _ = self.stop_rx.changed() => return,
                _ = ticker.tick() => {}
            }

            if let Ok(frame) = self.talking_rx.try_recv() {
                // Every received talking frame counts against the hold,
                // even one the keyframe gate discards.
                last_talk = Some(Instant::now());

                if waiting_for_keyframe {
                    if !frame.keyframe {
                        skipped_interframes += 1;
                        continue;
                    }
                    waiting_for_keyframe = false;
                    let from = self.state.load();
                    self.state.store(AvatarState::Talking);
                    info!(
                        target: TARGET,
                        skipped = skipped_interframes,
                        "talking started on keyframe"
                    );
                    record_state_transition(from.as_str(), AvatarState::Talking.as_str());
                    skipped_interframes = 0;
                }

                publish(self.publisher.as_ref(), &frame).await;
                continue;
            }

            if let Some(instant) = last_talk {
                if instant.elapsed() < self.config.talk_hold {
                    // Brief gap in talking data; hold the last pose instead
                    // of flapping back to idle.
                    continue;
                }
            }

            if self.state.load() == AvatarState::Talking {
                self.state.store(AvatarState::Idle);
                info!(target: TARGET, "talking finished, back to idle");
                record_state_transition(
                    AvatarState::Talking.as_str(),
                    AvatarState::Idle.as_str(),
                );
                waiting_for_keyframe = true;

                // Idle playback always restarts from its resting pose.
                if let Err(err) = self.idle_video.reset().await {
                    warn!(target: TARGET, %err, "failed to reset idle video source");
                }
            }

            match self.idle_video.next_frame().await {
                Ok(Some(frame)) => publish(self.publisher.as_ref(), &frame).await,
                Ok(None) => debug!(target: TARGET, "idle video yielded no frame"),
                Err(err) => debug!(target: TARGET, %err, "idle video read failed, skipping tick"),
            }
        }
    }
}

async fn publish(publisher: &dyn StreamPublisher, frame: &MediaFrame) {
    if let Err(err) = publisher.publish(frame).await {
        warn!(
            target: TARGET,
            track = frame.track.as_str(),
            %err,
            "publish failed"
        );
    }
}

async fn wait_startup(stop_rx: &mut watch::Receiver<bool>, config: &InteractorConfig) -> bool {
    pause(stop_rx, config.startup_delay).await
}

/// Sleeps for `delay` unless the stop signal fires first. Returns false
/// when the loop should exit.
async fn pause(stop_rx: &mut watch::Receiver<bool>, delay: std::time::Duration) -> bool {
    tokio::select! {
        biased;
        _ = stop_rx.changed() => false,
        _ = sleep(delay) => true,
    }
}
