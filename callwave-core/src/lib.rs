//! # callwave-core
//!
//! Real-time voice call engine: microphone in, synthesized speech out, over a
//! bidirectional conversational stream.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → InputDevice → SPSC RingBuffer → CapturePipeline(worker thread)
//!                                                   │ resample 16 kHz, 2048-sample frames
//!                                                   │ PCM16 + base64
//!                                                   ▼
//!                         CallSession loop ──► RemoteStream::send
//!                                ▲
//!              InboundSink ◄─────┘ audio / text / interrupted / turnComplete
//!                   │
//!                   ├─ audio → PlaybackPipeline → OutputFeed → OutputDevice
//!                   ├─ text  → [LANG:XX] strip → transcript → SentimentService
//!                   └─ state → broadcast::Sender<CallStateEvent>
//! ```
//!
//! The device callbacks are zero-alloc. All heap work happens on worker threads.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod codec;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod sentiment;
pub mod session;
pub mod transport;

// Convenience re-exports for downstream crates
pub use audio::device::{list_input_devices, list_output_devices, DeviceDirection, DeviceInfo};
pub use error::{CallError, ErrorKind};
pub use events::{CallStateEvent, SentimentEvent, TranscriptEvent};
pub use sentiment::{Sentiment, SentimentService};
pub use session::{
    diagnostics::{DiagnosticsSnapshot, PipelineStatus},
    state::CallState,
    CallSession, SessionConfig, SessionServices,
};
pub use transport::{Connector, InboundEvent, InboundSink, OutboundMessage, RemoteStream, Speaker};

#[cfg(feature = "audio-cpal")]
pub use audio::{CpalInputDevice, CpalOutputDevice};

#[cfg(feature = "live")]
pub use transport::{LiveConfig, LiveConnector};

#[cfg(feature = "sentiment-http")]
pub use sentiment::{HttpSentiment, SentimentConfig};
