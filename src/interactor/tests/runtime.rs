use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

use crate::interactor::config::InteractorConfig;
use crate::interactor::traits::{FrameSource, ResettableFrameSource, StreamPublisher};
use crate::interactor::types::{AvatarState, MediaFrame, SourceError, TrackType};
use crate::interactor::LiveInteractor;

const MARK_IDLE_VIDEO: u8 = 0xAA;
const MARK_TALK_VIDEO: u8 = 0xBB;
const MARK_IDLE_AUDIO: u8 = 0xCC;
const MARK_TALK_AUDIO: u8 = 0xDD;

fn talking_video(keyframe: bool, id: u8) -> MediaFrame {
    let lsb = if keyframe { 0x00 } else { 0x01 };
    MediaFrame::video(Bytes::from(vec![lsb, MARK_TALK_VIDEO, id]), keyframe)
}

fn talking_audio(id: u8) -> MediaFrame {
    MediaFrame::audio(Bytes::from(vec![MARK_TALK_AUDIO, id]))
}

fn test_config() -> InteractorConfig {
    InteractorConfig {
        startup_delay: Duration::ZERO,
        source_retry_delay: Duration::from_millis(1),
        drain_poll_delay: Duration::from_millis(1),
        ..InteractorConfig::default()
    }
}

#[derive(Default)]
struct CapturePublisher {
    frames: Mutex<Vec<MediaFrame>>,
}

impl CapturePublisher {
    fn published(&self) -> Vec<MediaFrame> {
        self.frames.lock().expect("frames lock poisoned").clone()
    }

    fn by_marker(&self, marker: u8) -> Vec<MediaFrame> {
        self.published()
            .into_iter()
            .filter(|frame| frame.payload.get(1).copied() == Some(marker) || frame.payload.first().copied() == Some(marker))
            .collect()
    }

    fn talking_video_ids(&self) -> Vec<u8> {
        self.published()
            .iter()
            .filter(|frame| {
                frame.track == TrackType::Video && frame.payload.get(1) == Some(&MARK_TALK_VIDEO)
            })
            .filter_map(|frame| frame.payload.get(2).copied())
            .collect()
    }

    fn count_talking_audio(&self) -> usize {
        self.published()
            .iter()
            .filter(|frame| {
                frame.track == TrackType::Audio && frame.payload.first() == Some(&MARK_TALK_AUDIO)
            })
            .count()
    }
}

#[async_trait]
impl StreamPublisher for CapturePublisher {
    async fn publish(&self, frame: &MediaFrame) -> Result<()> {
        self.frames
            .lock()
            .expect("frames lock poisoned")
            .push(frame.clone());
        Ok(())
    }
}

/// Infinite idle loop: frame N carries its index, `reset` rewinds to zero
/// and counts the rewind.
struct LoopingIdleSource {
    track: TrackType,
    cursor: AtomicU64,
    resets: AtomicU64,
}

impl LoopingIdleSource {
    fn video() -> Self {
        Self {
            track: TrackType::Video,
            cursor: AtomicU64::new(0),
            resets: AtomicU64::new(0),
        }
    }

    fn audio() -> Self {
        Self {
            track: TrackType::Audio,
            cursor: AtomicU64::new(0),
            resets: AtomicU64::new(0),
        }
    }

    fn reset_count(&self) -> u64 {
        self.resets.load(Ordering::SeqCst)
    }

    fn frame(&self) -> MediaFrame {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst) as u8;
        match self.track {
            TrackType::Video => MediaFrame::video(
                Bytes::from(vec![0x00, MARK_IDLE_VIDEO, index]),
                true,
            ),
            TrackType::Audio => MediaFrame::audio(Bytes::from(vec![MARK_IDLE_AUDIO, index])),
        }
    }
}

#[async_trait]
impl FrameSource for LoopingIdleSource {
    async fn next_frame(&self) -> Result<Option<MediaFrame>, SourceError> {
        Ok(Some(self.frame()))
    }

    async fn try_next_frame(&self) -> Result<Option<MediaFrame>, SourceError> {
        Ok(Some(self.frame()))
    }

    fn avatar_state(&self) -> AvatarState {
        AvatarState::Idle
    }

    async fn close(&self) {}
}

#[async_trait]
impl ResettableFrameSource for LoopingIdleSource {
    async fn reset(&self) -> Result<(), SourceError> {
        self.cursor.store(0, Ordering::SeqCst);
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Idle audio stand-in that fails every read.
struct BrokenIdleAudio;

#[async_trait]
impl FrameSource for BrokenIdleAudio {
    async fn next_frame(&self) -> Result<Option<MediaFrame>, SourceError> {
        Err(SourceError::Malformed("scripted failure".into()))
    }

    async fn try_next_frame(&self) -> Result<Option<MediaFrame>, SourceError> {
        Err(SourceError::Malformed("scripted failure".into()))
    }

    fn avatar_state(&self) -> AvatarState {
        AvatarState::Idle
    }

    async fn close(&self) {}
}

#[async_trait]
impl ResettableFrameSource for BrokenIdleAudio {
    async fn reset(&self) -> Result<(), SourceError> {
        Ok(())
    }
}

/// Scripted talking source: hands out whatever the test has queued.
#[derive(Default)]
struct ScriptedTalkingSource {
    frames: Mutex<VecDeque<MediaFrame>>,
}

impl ScriptedTalkingSource {
    fn push(&self, frame: MediaFrame) {
        self.frames
            .lock()
            .expect("frames lock poisoned")
            .push_back(frame);
    }
}

#[async_trait]
impl FrameSource for ScriptedTalkingSource {
    async fn next_frame(&self) -> Result<Option<MediaFrame>, SourceError> {
        Ok(self.frames.lock().expect("frames lock poisoned").pop_front())
    }

    async fn try_next_frame(&self) -> Result<Option<MediaFrame>, SourceError> {
        Ok(self.frames.lock().expect("frames lock poisoned").pop_front())
    }

    fn avatar_state(&self) -> AvatarState {
        AvatarState::Talking
    }

    async fn close(&self) {}
}

struct Rig {
    publisher: Arc<CapturePublisher>,
    idle_video: Arc<LoopingIdleSource>,
    idle_audio: Arc<LoopingIdleSource>,
    talking: Arc<ScriptedTalkingSource>,
    handle: crate::interactor::InteractorHandle,
}

async fn start_rig(config: InteractorConfig) -> Rig {
    let publisher = Arc::new(CapturePublisher::default());
    let idle_video = Arc::new(LoopingIdleSource::video());
    let idle_audio = Arc::new(LoopingIdleSource::audio());
    let talking = Arc::new(ScriptedTalkingSource::default());

    let interactor = LiveInteractor::new(
        config,
        Arc::clone(&publisher) as Arc<dyn StreamPublisher>,
        Arc::clone(&idle_video) as Arc<dyn ResettableFrameSource>,
        Arc::clone(&idle_audio) as Arc<dyn ResettableFrameSource>,
    );
    let handle = interactor.start();
    handle
        .attach_talking_source(Arc::clone(&talking) as Arc<dyn FrameSource>)
        .await;

    Rig {
        publisher,
        idle_video,
        idle_audio,
        talking,
        handle,
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F, max: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + max;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

#[tokio::test(start_paused = true)]
async fn keyframe_gate_drops_leading_interframes() {
    let rig = start_rig(test_config()).await;

    rig.talking.push(talking_video(false, 1));
    rig.talking.push(talking_video(true, 2));
    rig.talking.push(talking_video(false, 3));
    rig.talking.push(talking_video(false, 4));

    assert!(
        wait_until(
            || rig.publisher.talking_video_ids().len() >= 3,
            Duration::from_secs(2)
        )
        .await,
        "three talking frames should make it through the gate"
    );

    // The leading inter-frame is discarded; playback starts on the keyframe.
    assert_eq!(rig.publisher.talking_video_ids(), vec![2, 3, 4]);
    assert_eq!(rig.handle.current_state(), AvatarState::Talking);
    rig.handle.stop();
}

#[tokio::test(start_paused = true)]
async fn pacers_publish_at_most_one_frame_per_tick() {
    let config = test_config();
    let video_tick = config.video_tick;
    let rig = start_rig(config).await;

    // Saturate both talking buffers up front.
    rig.talking.push(talking_video(true, 0));
    for id in 1..20 {
        rig.talking.push(talking_video(false, id));
        rig.talking.push(talking_audio(id));
    }

    let window_ticks = 5u32;
    let window_start = tokio::time::Instant::now();
    tokio::time::sleep(video_tick * window_ticks).await;
    let elapsed = window_start.elapsed();

    let video_published = rig.publisher.by_marker(MARK_TALK_VIDEO).len() as u32;
    let audio_published = rig.publisher.count_talking_audio() as u32;

    // One video frame per 40 ms tick and one audio frame per 20 ms tick,
    // plus the immediate first tick of each interval.
    let video_bound = (elapsed.as_millis() / 40) as u32 + 1;
    let audio_bound = (elapsed.as_millis() / 20) as u32 + 1;
    assert!(
        video_published <= video_bound,
        "video pacer published {video_published} frames in {window_ticks} ticks"
    );
    assert!(
        audio_published <= audio_bound,
        "audio pacer published {audio_published} frames in a {elapsed:?} window"
    );
    assert!(video_published > 0, "video pacer should have progressed");
    rig.handle.stop();
}

#[tokio::test(start_paused = true)]
async fn silence_past_the_hold_reverts_to_idle_with_one_reset() {
    let rig = start_rig(test_config()).await;

    rig.talking.push(talking_video(true, 7));
    assert!(
        wait_until(
            || rig.publisher.talking_video_ids() == vec![7],
            Duration::from_secs(2)
        )
        .await,
        "the keyframe should be published"
    );
    assert_eq!(rig.handle.current_state(), AvatarState::Talking);
    let idle_before = rig.publisher.by_marker(MARK_IDLE_VIDEO).len();

    // No further talking data: ride out the 80 ms hold plus a tick.
    assert!(
        wait_until(
            || rig.handle.current_state() == AvatarState::Idle,
            Duration::from_secs(2)
        )
        .await,
        "the pacer should fall back to idle after the hold"
    );
    assert_eq!(rig.idle_video.reset_count(), 1);

    // Idle playback resumed from frame zero.
    assert!(
        wait_until(
            || rig.publisher.by_marker(MARK_IDLE_VIDEO).len() > idle_before,
            Duration::from_secs(2)
        )
        .await,
        "idle frames should flow again"
    );
    let first_after_reset = rig
        .publisher
        .by_marker(MARK_IDLE_VIDEO)
        .get(idle_before)
        .cloned()
        .expect("an idle frame after the transition");
    assert_eq!(first_after_reset.payload[2], 0, "idle restarts at frame zero");

    // The reset happened exactly once, not once per idle tick.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(rig.idle_video.reset_count(), 1);
    rig.handle.stop();
}

#[tokio::test(start_paused = true)]
async fn brief_gaps_inside_the_hold_do_not_flap_to_idle() {
    let rig = start_rig(test_config()).await;

    rig.talking.push(talking_video(true, 1));
    assert!(
        wait_until(
            || !rig.publisher.talking_video_ids().is_empty(),
            Duration::from_secs(2)
        )
        .await
    );

    // One empty 40 ms tick is inside the 80 ms hold.
    rig.talking.push(talking_video(false, 2));
    assert!(
        wait_until(
            || rig.publisher.talking_video_ids() == vec![1, 2],
            Duration::from_secs(2)
        )
        .await,
        "the follow-up inter-frame should publish without a new keyframe gate"
    );
    assert_eq!(rig.idle_video.reset_count(), 0);
    rig.handle.stop();
}

#[tokio::test(start_paused = true)]
async fn talking_audio_takes_priority_over_idle_audio() {
    let rig = start_rig(test_config()).await;

    for id in 0..5 {
        rig.talking.push(talking_audio(id));
    }
    assert!(
        wait_until(|| rig.publisher.count_talking_audio() >= 5, Duration::from_secs(2)).await,
        "talking audio should drain"
    );

    // While talking audio was buffered, each tick chose it over idle.
    let published = rig.publisher.published();
    let mut talking_seen = 0;
    for frame in published.iter().filter(|f| f.track == TrackType::Audio) {
        if frame.payload.first() == Some(&MARK_TALK_AUDIO) {
            talking_seen += 1;
        } else if talking_seen > 0 && talking_seen < 5 {
            panic!("idle audio published while talking audio was still buffered");
        }
    }
    assert_eq!(talking_seen, 5);
    rig.handle.stop();
}

#[tokio::test(start_paused = true)]
async fn idle_audio_failures_are_swallowed_per_tick() {
    let publisher = Arc::new(CapturePublisher::default());
    let idle_video = Arc::new(LoopingIdleSource::video());
    let talking = Arc::new(ScriptedTalkingSource::default());

    let interactor = LiveInteractor::new(
        test_config(),
        Arc::clone(&publisher) as Arc<dyn StreamPublisher>,
        Arc::clone(&idle_video) as Arc<dyn ResettableFrameSource>,
        Arc::new(BrokenIdleAudio) as Arc<dyn ResettableFrameSource>,
    );
    let handle = interactor.start();
    handle
        .attach_talking_source(Arc::clone(&talking) as Arc<dyn FrameSource>)
        .await;

    // The audio pacer keeps ticking through errors and still serves talking
    // audio when it arrives.
    tokio::time::sleep(Duration::from_millis(100)).await;
    talking.push(talking_audio(9));
    assert!(
        wait_until(|| publisher.count_talking_audio() == 1, Duration::from_secs(2)).await,
        "audio pacer should survive idle-source failures"
    );
    handle.stop();
}

#[tokio::test(start_paused = true)]
async fn tiny_talking_buffers_lose_nothing() {
    let config = InteractorConfig {
        talking_buffer_capacity: 2,
        ..test_config()
    };
    let rig = start_rig(config).await;

    rig.talking.push(talking_video(true, 0));
    for id in 1..10 {
        rig.talking.push(talking_video(false, id));
    }

    assert!(
        wait_until(
            || rig.publisher.talking_video_ids().len() == 10,
            Duration::from_secs(5)
        )
        .await,
        "the router must block rather than drop talking frames"
    );
    assert_eq!(
        rig.publisher.talking_video_ids(),
        (0..10).collect::<Vec<u8>>()
    );
    rig.handle.stop();
}

#[tokio::test(start_paused = true)]
async fn talking_source_can_attach_after_start() {
    let publisher = Arc::new(CapturePublisher::default());
    let idle_video = Arc::new(LoopingIdleSource::video());
    let idle_audio = Arc::new(LoopingIdleSource::audio());

    let interactor = LiveInteractor::new(
        test_config(),
        Arc::clone(&publisher) as Arc<dyn StreamPublisher>,
        Arc::clone(&idle_video) as Arc<dyn ResettableFrameSource>,
        Arc::clone(&idle_audio) as Arc<dyn ResettableFrameSource>,
    );
    let handle = interactor.start();

    // Idle content flows with no talking source at all.
    assert!(
        wait_until(
            || !publisher.by_marker(MARK_IDLE_VIDEO).is_empty(),
            Duration::from_secs(2)
        )
        .await
    );

    let talking = Arc::new(ScriptedTalkingSource::default());
    talking.push(talking_video(true, 1));
    handle
        .attach_talking_source(Arc::clone(&talking) as Arc<dyn FrameSource>)
        .await;

    assert!(
        wait_until(
            || !publisher.by_marker(MARK_TALK_VIDEO).is_empty(),
            Duration::from_secs(2)
        )
        .await,
        "talking frames should flow once a source is attached"
    );
    handle.stop();
}

#[tokio::test(start_paused = true)]
async fn stop_terminates_all_three_loops() {
    let rig = start_rig(test_config()).await;
    assert!(
        wait_until(|| !rig.publisher.published().is_empty(), Duration::from_secs(2)).await
    );

    rig.handle.stop();
    rig.handle.stop(); // idempotent

    assert!(
        wait_until(|| rig.handle.loops_finished(), Duration::from_secs(2)).await,
        "all loops should observe the stop signal within one tick"
    );

    let frames_at_stop = rig.publisher.published().len();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        rig.publisher.published().len(),
        frames_at_stop,
        "no frames may be published after stop"
    );
}
