use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

use crate::transport::{Packet, PacketType};

pub const VIDEO_FRAME_DURATION: Duration = Duration::from_millis(40);
pub const AUDIO_FRAME_DURATION: Duration = Duration::from_millis(20);

/// Avatar presentation states. Only `Idle` and `Talking` are driven by the
/// pacer; `Listening` and `Thinking` are reserved for richer dialogue cues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvatarState {
    Idle,
    Listening,
    Thinking,
    Talking,
}

impl AvatarState {
    pub fn as_str(self) -> &'static str {
        match self {
            AvatarState::Idle => "idle",
            AvatarState::Listening => "listening",
            AvatarState::Thinking => "thinking",
            AvatarState::Talking => "talking",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackType {
    Video,
    Audio,
}

impl TrackType {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackType::Video => "video",
            TrackType::Audio => "audio",
        }
    }
}

/// One finished media frame. The payload is opaque and immutable after
/// construction; clones share the underlying buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFrame {
    pub payload: Bytes,
    pub duration: Duration,
    pub keyframe: bool,
    pub track: TrackType,
}

impl MediaFrame {
    pub fn video(payload: Bytes, keyframe: bool) -> Self {
        Self {
            payload,
            duration: VIDEO_FRAME_DURATION,
            keyframe,
            track: TrackType::Video,
        }
    }

    /// Audio frames are independently decodable, so they always count as
    /// keyframes.
    pub fn audio(payload: Bytes) -> Self {
        Self {
            payload,
            duration: AUDIO_FRAME_DURATION,
            keyframe: true,
            track: TrackType::Audio,
        }
    }

    /// Maps a media packet to a frame using the per-type metadata rules:
    /// video carries the keyframe flag in the low bit of its first payload
    /// byte (0 = keyframe), audio is always a 20 ms keyframe. Text and
    /// user-audio packets carry no media and map to `None`.
    pub fn from_packet(packet: Packet) -> Option<Self> {
        match packet.packet_type {
            PacketType::Video => {
                let keyframe = is_video_keyframe(&packet.payload);
                Some(Self::video(packet.payload, keyframe))
            }
            PacketType::Audio => Some(Self::audio(packet.payload)),
            PacketType::Text | PacketType::UserAudio => None,
        }
    }
}

/// Keyframe rule for the video codec family in use: the least significant
/// bit of the first payload byte is 0 for a keyframe. This is not an H.264
/// start-code scan.
pub fn is_video_keyframe(payload: &[u8]) -> bool {
    payload.first().map(|byte| byte & 0x01 == 0).unwrap_or(false)
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source closed")]
    Closed,
    #[error("end of stream")]
    EndOfStream,
    #[error("malformed media: {0}")]
    Malformed(String),
    #[error("source io error: {0}")]
    Io(#[from] std::io::Error),
}
