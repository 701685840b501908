use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::interactor::InteractorConfig;

/// Daemon-level settings: where the worker socket lives, which idle assets
/// to loop, and the pacing knobs. Loaded from a JSON file or defaulted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub socket_path: String,
    pub idle_video_path: String,
    pub idle_audio_path: String,
    pub subscriber_queue_capacity: usize,
    pub interactor: InteractorConfig,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            socket_path: "/tmp/everlive.sock".into(),
            idle_video_path: "assets/idle.ivf".into(),
            idle_audio_path: "assets/idle.ogg".into(),
            subscriber_queue_capacity: 100,
            interactor: InteractorConfig::default(),
        }
    }
}

impl EngineSettings {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse settings file: {}", path.display()))
    }
}
