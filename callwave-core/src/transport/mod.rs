//! Remote conversational stream.
//!
//! The session controller sees the remote endpoint only through [`Connector`]
//! and [`RemoteStream`]: a duplex channel taking audio frames and text turns,
//! and producing [`InboundEvent`]s through an [`InboundSink`].

pub mod protocol;

#[cfg(feature = "live")]
pub mod live;

#[cfg(feature = "live")]
pub use live::{LiveConfig, LiveConnector};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{buffering::frame::EncodedChunk, error::Result};

/// Who produced a piece of transcript text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The local caller (input transcription).
    User,
    /// The remote synthesized voice.
    Agent,
}

/// Everything the remote side can tell us.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// One fragment of synthesized speech, arbitrary length.
    Audio(EncodedChunk),
    /// A finalized text fragment, possibly starting with a control tag.
    Text { speaker: Speaker, text: String },
    /// The caller barged in; queued speech must be dropped.
    Interrupted,
    /// The remote finished one utterance.
    TurnComplete,
    /// Transport or provider failure; the call is over.
    Error(String),
    /// The remote closed the stream.
    Closed,
}

/// Messages we send to the remote side.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// One encoded capture frame.
    Audio(EncodedChunk),
    /// A complete user text turn.
    Text(String),
}

/// Delivery handle for inbound events.
///
/// Transports may call [`InboundSink::emit`] from any thread; the session
/// serialises delivery onto its own loop. `emit` returns `false` once the
/// session no longer listens, which is the transport's cue to stop reading.
#[derive(Clone)]
pub struct InboundSink {
    deliver: Arc<dyn Fn(InboundEvent) -> bool + Send + Sync>,
}

impl InboundSink {
    pub fn new(deliver: impl Fn(InboundEvent) -> bool + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    pub fn emit(&self, event: InboundEvent) -> bool {
        (self.deliver)(event)
    }
}

impl std::fmt::Debug for InboundSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundSink").finish_non_exhaustive()
    }
}

/// Establishes remote streams.
pub trait Connector: Send + Sync + 'static {
    /// Perform the handshake and return an open stream. Blocks until the
    /// remote accepts or rejects.
    ///
    /// # Errors
    /// `CallError::Connection` / `CallError::Protocol` when the handshake fails.
    fn connect(&self, inbound: InboundSink) -> Result<Box<dyn RemoteStream>>;
}

/// An open stream to the remote side.
pub trait RemoteStream: Send {
    /// Queue a message for transmission, preserving call order.
    fn send(&mut self, message: OutboundMessage) -> Result<()>;

    /// Close the stream. Idempotent; no further inbound events are produced.
    fn close(&mut self);
}
