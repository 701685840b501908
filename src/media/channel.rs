use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::broadcast::Subscription;
use crate::interactor::types::{AvatarState, MediaFrame, SourceError};
use crate::interactor::FrameSource;
use crate::transport::Packet;

/// Talking frame source over a broadcaster subscription. Queue closure is
/// observed as end-of-data, never an error; non-media packets are skipped.
pub struct SubscriberSource {
    subscription: Mutex<Subscription>,
}

impl SubscriberSource {
    pub fn new(subscription: Subscription) -> Self {
        Self {
            subscription: Mutex::new(subscription),
        }
    }

    fn map_packet(packet: Packet) -> Option<MediaFrame> {
        let packet_type = packet.packet_type;
        match MediaFrame::from_packet(packet) {
            Some(frame) => Some(frame),
            None => {
                debug!(
                    target: "media",
                    packet_type = packet_type.as_str(),
                    "skipping non-media packet"
                );
                None
            }
        }
    }
}

#[async_trait]
impl FrameSource for SubscriberSource {
    async fn next_frame(&self) -> Result<Option<MediaFrame>, SourceError> {
        let mut subscription = self.subscription.lock().await;
        loop {
            match subscription.recv().await {
                Some(packet) => {
                    if let Some(frame) = Self::map_packet(packet) {
                        return Ok(Some(frame));
                    }
                }
                None => return Ok(None),
            }
        }
    }

    async fn try_next_frame(&self) -> Result<Option<MediaFrame>, SourceError> {
        let mut subscription = self.subscription.lock().await;
        loop {
            match subscription.try_recv() {
                Some(packet) => {
                    if let Some(frame) = Self::map_packet(packet) {
                        return Ok(Some(frame));
                    }
                }
                None => return Ok(None),
            }
        }
    }

    fn avatar_state(&self) -> AvatarState {
        AvatarState::Talking
    }

    async fn close(&self) {
        self.subscription.lock().await.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::test_subscription;
    use crate::interactor::types::TrackType;
    use crate::transport::PacketType;
    use bytes::Bytes;
    use std::time::Duration;

    fn packet(packet_type: PacketType, payload: &'static [u8]) -> Packet {
        Packet {
            packet_type,
            payload: Bytes::from_static(payload),
        }
    }

    #[tokio::test]
    async fn maps_per_packet_metadata() {
        let (sender, subscription) = test_subscription(8);
        let source = SubscriberSource::new(subscription);

        sender
            .push(packet(PacketType::Video, &[0x00, 0x10]))
            .await
            .expect("push video");
        sender
            .push(packet(PacketType::Audio, &[0x55]))
            .await
            .expect("push audio");

        let video = source
            .try_next_frame()
            .await
            .expect("read")
            .expect("video ready");
        assert_eq!(video.track, TrackType::Video);
        assert_eq!(video.duration, Duration::from_millis(40));
        assert!(video.keyframe);

        let audio = source
            .try_next_frame()
            .await
            .expect("read")
            .expect("audio ready");
        assert_eq!(audio.track, TrackType::Audio);
        assert_eq!(audio.duration, Duration::from_millis(20));
        assert!(audio.keyframe);
    }

    #[tokio::test]
    async fn empty_queue_is_not_ready_and_closure_is_end_of_data() {
        let (sender, subscription) = test_subscription(8);
        let source = SubscriberSource::new(subscription);

        assert!(source
            .try_next_frame()
            .await
            .expect("read")
            .is_none());

        drop(sender);
        assert!(source.next_frame().await.expect("read").is_none());
    }

    #[tokio::test]
    async fn non_media_packets_are_skipped() {
        let (sender, subscription) = test_subscription(8);
        let source = SubscriberSource::new(subscription);

        sender
            .push(packet(PacketType::Text, b"hello"))
            .await
            .expect("push text");
        sender
            .push(packet(PacketType::Video, &[0x01, 0x02]))
            .await
            .expect("push video");

        let frame = source
            .next_frame()
            .await
            .expect("read")
            .expect("video after skipping text");
        assert_eq!(frame.track, TrackType::Video);
        assert!(!frame.keyframe);
    }
}
