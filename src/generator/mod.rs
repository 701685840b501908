//! 整段缓冲式生成驱动：触发外部生成任务并关键帧对齐回放。

mod multipart;

pub use multipart::MultipartBody;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWrite;
use tokio::net::UnixListener;
use tokio::sync::Mutex;
use tokio::time::{interval, timeout, Instant};
use tracing::{info, warn};

use crate::interactor::types::SourceError;
use crate::media::{IvfFrame, IvfReader, OggPageReader};
use crate::telemetry::events::{record_clip_buffered, record_leading_frames_dropped};
use crate::transport::{write_packet, PacketType, TransportError};

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("timed out waiting for the generation job to connect")]
    Timeout,
    #[error("generation job produced no frames")]
    NoFramesReceived,
    #[error("generation trigger failed: {0}")]
    Request(String),
    #[error("generation stream error: {0}")]
    Stream(#[from] SourceError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("generator io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub api_url: String,
    pub image_path: PathBuf,
    pub prompt: String,
    /// Bounded wait for the external job to dial back, model load included.
    pub connect_timeout: Duration,
    pub replay_tick: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8000/generate_stream".into(),
            image_path: PathBuf::from("assets/avatar.jpg"),
            prompt: "talking".into(),
            connect_timeout: Duration::from_secs(60),
            replay_tick: Duration::from_millis(20),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub image_path: PathBuf,
    pub audio_path: PathBuf,
    pub prompt: String,
    pub callback_path: PathBuf,
}

/// Seam for the external generation trigger, swappable in tests.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn submit(&self, request: GenerationRequest) -> Result<(), GeneratorError>;
}

/// Real trigger: posts the image, the audio, the prompt and the callback
/// socket path as one multipart form. The job streams its video back over
/// the callback socket, so the HTTP response itself is only a receipt.
pub struct HttpGenerationBackend {
    api_url: String,
}

impl HttpGenerationBackend {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
        }
    }
}

#[async_trait]
impl GenerationBackend for HttpGenerationBackend {
    async fn submit(&self, request: GenerationRequest) -> Result<(), GeneratorError> {
        let api_url = self.api_url.clone();
        tokio::task::spawn_blocking(move || {
            let image = std::fs::read(&request.image_path)?;
            let audio = std::fs::read(&request.audio_path)?;

            let mut body = MultipartBody::new();
            body.add_file(
                "image",
                &file_name(&request.image_path),
                "image/jpeg",
                &image,
            );
            body.add_file("audio", &file_name(&request.audio_path), "audio/ogg", &audio);
            body.add_text("prompt", &request.prompt);
            body.add_text("uds_path", &request.callback_path.to_string_lossy());

            let content_type = body.content_type();
            let response = ureq::post(&api_url)
                .timeout(Duration::from_secs(30))
                .set("Content-Type", &content_type)
                .send_bytes(&body.finish())
                .map_err(|err| GeneratorError::Request(err.to_string()))?;

            if response.status() != 200 {
                return Err(GeneratorError::Request(format!(
                    "generation api returned status {}",
                    response.status()
                )));
            }
            Ok(())
        })
        .await
        .map_err(|err| GeneratorError::Request(err.to_string()))?
    }
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".into())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    pub buffered_frames: usize,
    pub dropped_leading: usize,
    pub video_sent: usize,
    pub audio_sent: usize,
    pub buffer_elapsed: Duration,
}

/// Store-and-forward driver: triggers one generation job, buffers the whole
/// returned clip in memory, aligns it to the first keyframe and replays it
/// against the triggering audio at a fixed cadence. Clips are short by
/// design, which is what makes whole-clip buffering acceptable.
pub struct ClipDriver {
    config: GeneratorConfig,
    backend: Arc<dyn GenerationBackend>,
    writer: Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>,
}

impl ClipDriver {
    pub fn new(
        config: GeneratorConfig,
        backend: Arc<dyn GenerationBackend>,
        writer: Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>,
    ) -> Self {
        Self {
            config,
            backend,
            writer,
        }
    }

    /// One complete generation attempt. Every failure is scoped to this
    /// attempt; temporary files and the callback socket are cleaned up on
    /// every exit path.
    pub async fn generate_and_stream(&self, audio: &[u8]) -> Result<ReplaySummary, GeneratorError> {
        let workdir = tempfile::tempdir()?;
        let audio_path = workdir.path().join("input.ogg");
        tokio::fs::write(&audio_path, audio).await?;

        let callback_path = workdir.path().join("callback.sock");
        let listener = UnixListener::bind(&callback_path)?;

        let backend = Arc::clone(&self.backend);
        let request = GenerationRequest {
            image_path: self.config.image_path.clone(),
            audio_path: audio_path.clone(),
            prompt: self.config.prompt.clone(),
            callback_path: callback_path.clone(),
        };
        info!(target: "generator", api = %self.config.api_url, "triggering generation job");
        tokio::spawn(async move {
            // The accept timeout below is the authoritative failure signal.
            if let Err(err) = backend.submit(request).await {
                warn!(target: "generator", %err, "generation trigger failed");
            }
        });

        let stream = match timeout(self.config.connect_timeout, listener.accept()).await {
            Err(_elapsed) => return Err(GeneratorError::Timeout),
            Ok(Err(err)) => return Err(GeneratorError::Io(err)),
            Ok(Ok((stream, _addr))) => stream,
        };
        info!(target: "generator", "generation job connected, buffering clip");

        let (mut frames, buffer_elapsed) = self.buffer_clip(stream).await?;
        let dropped_leading = align_to_keyframe(&mut frames);

        let summary = self
            .replay(&audio_path, &frames, dropped_leading, buffer_elapsed)
            .await?;
        info!(
            target: "generator",
            video_sent = summary.video_sent,
            audio_sent = summary.audio_sent,
            "playback finished"
        );
        Ok(summary)
    }

    async fn buffer_clip(
        &self,
        stream: tokio::net::UnixStream,
    ) -> Result<(Vec<IvfFrame>, Duration), GeneratorError> {
        let started = Instant::now();
        let mut reader = IvfReader::new(stream).await?;
        let mut frames = Vec::new();
        while let Some(frame) = reader.next_frame().await? {
            frames.push(frame);
        }

        let elapsed = started.elapsed();
        record_clip_buffered(frames.len(), elapsed);
        if frames.is_empty() {
            return Err(GeneratorError::NoFramesReceived);
        }
        Ok((frames, elapsed))
    }

    async fn replay(
        &self,
        audio_path: &std::path::Path,
        frames: &[IvfFrame],
        dropped_leading: usize,
        buffer_elapsed: Duration,
    ) -> Result<ReplaySummary, GeneratorError> {
        let audio_file = File::open(audio_path).await?;
        let mut pages = OggPageReader::new(audio_file).await?;

        let mut ticker = interval(self.config.replay_tick);
        let mut tick_count = 0u64;
        let mut video_cursor = 0usize;
        let mut audio_done = false;
        let mut audio_sent = 0usize;
        let mut video_sent = 0usize;

        loop {
            if audio_done && video_cursor >= frames.len() {
                break;
            }
            ticker.tick().await;

            if !audio_done {
                match pages.next_page().await {
                    Ok(Some(page)) => {
                        self.forward(PacketType::Audio, &page).await?;
                        audio_sent += 1;
                    }
                    Ok(None) => audio_done = true,
                    Err(err) => {
                        warn!(target: "generator", %err, "audio replay read failed");
                        audio_done = true;
                    }
                }
            }

            // Audio runs every tick, video every other one (20 ms vs 40 ms).
            if tick_count % 2 == 0 {
                if let Some(frame) = frames.get(video_cursor) {
                    self.forward(PacketType::Video, &frame.payload).await?;
                    video_cursor += 1;
                    video_sent += 1;
                }
            }
            tick_count += 1;
        }

        Ok(ReplaySummary {
            buffered_frames: frames.len() + dropped_leading,
            dropped_leading,
            video_sent,
            audio_sent,
            buffer_elapsed,
        })
    }

    async fn forward(&self, packet_type: PacketType, payload: &[u8]) -> Result<(), GeneratorError> {
        let mut writer = self.writer.lock().await;
        write_packet(&mut *writer, packet_type, payload).await?;
        Ok(())
    }
}

/// Drops every frame before the first keyframe so playback never starts on
/// an inter-frame. Returns the dropped count; a clip with no keyframe at
/// all plays from frame zero with a warning.
fn align_to_keyframe(frames: &mut Vec<IvfFrame>) -> usize {
    match frames.iter().position(|frame| frame.keyframe) {
        Some(0) => 0,
        Some(index) => {
            frames.drain(..index);
            record_leading_frames_dropped(index, frames.len());
            index
        }
        None => {
            warn!(
                target: "generator",
                frames = frames.len(),
                "no keyframe in clip, playback may start corrupted"
            );
            0
        }
    }
}
