//! 引擎守护进程：装配广播器、空闲资源与状态机并等待退出信号。

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use everlive_core::broadcast::{BroadcastConfig, PacketBroadcaster};
use everlive_core::config::EngineSettings;
use everlive_core::interactor::{LiveInteractor, TracePublisher};
use everlive_core::media::{IvfFileSource, OggFileSource, PlaybackMode, SubscriberSource};
use everlive_core::telemetry::init_tracing;
use everlive_core::transport::SocketServer;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let settings = match std::env::args().nth(1) {
        Some(path) => EngineSettings::from_path(&path)
            .with_context(|| format!("failed to load engine settings from {path}"))?,
        None => EngineSettings::default(),
    };

    let idle_video = IvfFileSource::open(&settings.idle_video_path, PlaybackMode::Loop)
        .await
        .with_context(|| {
            format!(
                "failed to open idle video source: {}",
                settings.idle_video_path
            )
        })?;
    let idle_audio = OggFileSource::open(&settings.idle_audio_path)
        .await
        .with_context(|| {
            format!(
                "failed to open idle audio source: {}",
                settings.idle_audio_path
            )
        })?;

    let server = SocketServer::bind(&settings.socket_path)
        .with_context(|| format!("failed to bind worker socket: {}", settings.socket_path))?;
    let broadcaster = Arc::new(PacketBroadcaster::new(
        server,
        BroadcastConfig {
            subscriber_queue_capacity: settings.subscriber_queue_capacity,
        },
    ));
    let broadcast_task = PacketBroadcaster::spawn(&broadcaster);

    let subscription = broadcaster.subscribe().await;
    let talking_source = Arc::new(SubscriberSource::new(subscription));

    let engine = LiveInteractor::new(
        settings.interactor.clone(),
        Arc::new(TracePublisher::default()),
        Arc::new(idle_video),
        Arc::new(idle_audio),
    );
    let handle = engine.start();
    handle.attach_talking_source(talking_source).await;

    info!(
        target: "everlive",
        socket = %settings.socket_path,
        "engine running; press ctrl-c to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!(target: "everlive", "shutting down");
    handle.stop();
    broadcaster.shutdown();
    broadcast_task.abort();

    Ok(())
}
