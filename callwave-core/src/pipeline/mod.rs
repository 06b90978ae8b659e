//! The two audio pipelines the session controller drives.
//!
//! Both are owned by the session loop and only started/stopped from there.

pub mod capture;
pub mod playback;

pub use capture::{CaptureConfig, CapturePipeline, FrameCallback};
pub use playback::{PlaybackConfig, PlaybackPipeline, PlaybackSchedule, ScheduledChunk};
