use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractorConfig {
    #[serde(with = "duration_millis")]
    pub audio_tick: Duration,
    #[serde(with = "duration_millis")]
    pub video_tick: Duration,
    /// Minimum silence before Talking reverts to Idle (anti-flicker hold).
    #[serde(with = "duration_millis")]
    pub talk_hold: Duration,
    /// Must absorb a full clip burst; talking frames are never dropped.
    pub talking_buffer_capacity: usize,
    /// Router backoff while no talking source is attached yet.
    #[serde(with = "duration_millis")]
    pub source_retry_delay: Duration,
    /// Router backoff when the attached source has nothing ready.
    #[serde(with = "duration_millis")]
    pub drain_poll_delay: Duration,
    #[serde(with = "duration_millis")]
    pub startup_delay: Duration,
}

impl Default for InteractorConfig {
    fn default() -> Self {
        Self {
            audio_tick: Duration::from_millis(20),
            video_tick: Duration::from_millis(40),
            talk_hold: Duration::from_millis(80),
            talking_buffer_capacity: 1000,
            source_retry_delay: Duration::from_millis(100),
            drain_poll_delay: Duration::from_millis(5),
            startup_delay: Duration::from_secs(1),
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
