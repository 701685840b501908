//! 帧源适配层：本地容器循环读取与队列订阅源。

mod channel;
mod ivf;
mod ogg;

pub use channel::SubscriberSource;
pub use ivf::{IvfFileSource, IvfFrame, IvfHeader, IvfReader, PlaybackMode};
pub use ogg::{OggFileSource, OggPageReader};
