//! 空闲/说话状态机与双轨节拍器。

mod constants;
mod engine;
mod runtime;

pub mod config;
pub mod traits;
pub mod types;

pub use config::InteractorConfig;
pub use engine::LiveInteractor;
pub use runtime::InteractorHandle;
pub use traits::{FrameSource, ResettableFrameSource, StreamPublisher, TracePublisher};
pub use types::{AvatarState, MediaFrame, SourceError, TrackType};

#[cfg(test)]
mod tests;
