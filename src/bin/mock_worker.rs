//! 模拟 AI 工作进程：循环推送一段说话片段并以零长度包收尾。

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::fs::File;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tokio::time::{interval, sleep};
use tracing::{info, warn};

use everlive_core::media::{IvfReader, OggPageReader};
use everlive_core::telemetry::init_tracing;
use everlive_core::transport::{write_end_of_stream, write_packet, PacketType};

// Send slightly faster than the playback cadence (40 ms video, 20 ms audio)
// so the engine-side buffers stay fed.
const VIDEO_SEND_TICK: Duration = Duration::from_millis(33);
const AUDIO_SEND_TICK: Duration = Duration::from_millis(15);
const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const SESSION_GAP: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let socket_path = args.next().unwrap_or_else(|| "/tmp/everlive.sock".into());
    let video_path = args.next().unwrap_or_else(|| "assets/talking.ivf".into());
    let audio_path = args.next().unwrap_or_else(|| "assets/talking.ogg".into());

    info!(target: "mock_worker", socket = %socket_path, "mock worker starting");

    loop {
        let stream = match UnixStream::connect(&socket_path).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(target: "mock_worker", %err, "engine not reachable, retrying");
                sleep(RECONNECT_DELAY).await;
                continue;
            }
        };
        info!(target: "mock_worker", "connected to engine");

        let writer = Arc::new(Mutex::new(stream));
        let video = tokio::spawn(stream_video(Arc::clone(&writer), video_path.clone()));
        let audio = tokio::spawn(stream_audio(Arc::clone(&writer), audio_path.clone()));

        if let Err(err) = video.await.context("video task panicked")? {
            warn!(target: "mock_worker", %err, "video stream ended with error");
        }
        if let Err(err) = audio.await.context("audio task panicked")? {
            warn!(target: "mock_worker", %err, "audio stream ended with error");
        }

        {
            let mut conn = writer.lock().await;
            if let Err(err) = write_end_of_stream(&mut *conn, PacketType::Video).await {
                warn!(target: "mock_worker", %err, "failed to send end-of-stream sentinel");
            }
        }

        info!(target: "mock_worker", "session done, reconnecting shortly");
        sleep(SESSION_GAP).await;
    }
}

async fn stream_video(writer: Arc<Mutex<UnixStream>>, path: String) -> Result<()> {
    let file = File::open(&path)
        .await
        .with_context(|| format!("failed to open talking video: {path}"))?;
    let mut reader = IvfReader::new(file)
        .await
        .with_context(|| format!("failed to parse talking video: {path}"))?;

    let mut ticker = interval(VIDEO_SEND_TICK);
    loop {
        ticker.tick().await;
        let frame = match reader.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => return Err(err).context("talking video read failed"),
        };

        let mut conn = writer.lock().await;
        write_packet(&mut *conn, PacketType::Video, &frame.payload)
            .await
            .context("video packet write failed")?;
    }

    info!(target: "mock_worker", "video stream finished");
    Ok(())
}

async fn stream_audio(writer: Arc<Mutex<UnixStream>>, path: String) -> Result<()> {
    let file = File::open(&path)
        .await
        .with_context(|| format!("failed to open talking audio: {path}"))?;
    let mut reader = OggPageReader::new(file)
        .await
        .with_context(|| format!("failed to parse talking audio: {path}"))?;

    let mut ticker = interval(AUDIO_SEND_TICK);
    loop {
        ticker.tick().await;
        let page = match reader.next_page().await {
            Ok(Some(page)) => page,
            Ok(None) => break,
            Err(err) => return Err(err).context("talking audio read failed"),
        };

        let mut conn = writer.lock().await;
        write_packet(&mut *conn, PacketType::Audio, &page)
            .await
            .context("audio packet write failed")?;
    }

    info!(target: "mock_worker", "audio stream finished");
    Ok(())
}
