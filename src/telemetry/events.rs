use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

pub(crate) const TARGET: &str = "telemetry::stream";
pub(crate) const EVENT_CLIP_BUFFERED: &str = "clip_buffered";
pub(crate) const EVENT_LEADING_DROPPED: &str = "leading_frames_dropped";
pub(crate) const EVENT_SUBSCRIBER_OVERFLOW: &str = "subscriber_overflow";
pub(crate) const EVENT_STATE_CHANGE: &str = "avatar_state_change";

#[derive(Debug, Serialize)]
pub struct ClipBufferedEvent {
    pub frame_count: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct LeadingFramesDroppedEvent {
    pub dropped: usize,
    pub remaining: usize,
}

#[derive(Debug, Serialize)]
pub struct SubscriberOverflowEvent {
    pub subscriber_id: u64,
    pub dropped_total: u64,
}

#[derive(Debug, Serialize)]
pub struct AvatarStateChangeEvent {
    pub from: &'static str,
    pub to: &'static str,
}

pub fn record_clip_buffered(frame_count: usize, elapsed: Duration) {
    let event = ClipBufferedEvent {
        frame_count,
        elapsed_ms: duration_to_ms(elapsed),
    };

    match serde_json::to_string(&event) {
        Ok(payload) => info!(
            target: TARGET,
            event = EVENT_CLIP_BUFFERED,
            frame_count = event.frame_count,
            elapsed_ms = event.elapsed_ms,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_CLIP_BUFFERED,
            %err,
            "failed to encode clip buffered event"
        ),
    }
}

pub fn record_leading_frames_dropped(dropped: usize, remaining: usize) {
    let event = LeadingFramesDroppedEvent { dropped, remaining };

    match serde_json::to_string(&event) {
        Ok(payload) => info!(
            target: TARGET,
            event = EVENT_LEADING_DROPPED,
            dropped = event.dropped,
            remaining = event.remaining,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_LEADING_DROPPED,
            %err,
            "failed to encode leading frame drop event"
        ),
    }
}

pub fn record_subscriber_overflow(subscriber_id: u64, dropped_total: u64) {
    let event = SubscriberOverflowEvent {
        subscriber_id,
        dropped_total,
    };

    match serde_json::to_string(&event) {
        Ok(payload) => warn!(
            target: TARGET,
            event = EVENT_SUBSCRIBER_OVERFLOW,
            subscriber_id = event.subscriber_id,
            dropped_total = event.dropped_total,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_SUBSCRIBER_OVERFLOW,
            %err,
            "failed to encode subscriber overflow event"
        ),
    }
}

pub fn record_state_transition(from: &'static str, to: &'static str) {
    let event = AvatarStateChangeEvent { from, to };

    match serde_json::to_string(&event) {
        Ok(payload) => info!(
            target: TARGET,
            event = EVENT_STATE_CHANGE,
            from = event.from,
            to = event.to,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_STATE_CHANGE,
            %err,
            "failed to encode state change event"
        ),
    }
}

fn duration_to_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}
