//! Events published by a [`CallSession`](crate::session::CallSession).
//!
//! ## Channels
//!
//! | Event | Subscribe with |
//! |-------|----------------|
//! | `CallStateEvent` | `subscribe_state()` |
//! | `TranscriptEvent` | `subscribe_transcripts()` |
//! | `SentimentEvent` | `subscribe_sentiment()` |
//!
//! Every event carries the `callId` it belongs to so consumers can discard
//! anything from a previous call.

use serde::{Deserialize, Serialize};

use crate::{
    sentiment::Sentiment,
    session::state::CallState,
    transport::Speaker,
};

// ---------------------------------------------------------------------------
// Call state
// ---------------------------------------------------------------------------

/// Emitted on every state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStateEvent {
    pub call_id: u64,
    pub state: CallState,
    /// Why the transition happened, when it is not self-evident
    /// (e.g. the connection error that ended the call).
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Transcript
// ---------------------------------------------------------------------------

/// Emitted for each text fragment appended to the transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEvent {
    pub call_id: u64,
    pub speaker: Speaker,
    /// Fragment text with any control tag removed.
    pub text: String,
    /// Language code in effect after this fragment.
    pub language: Option<String>,
}

// ---------------------------------------------------------------------------
// Sentiment
// ---------------------------------------------------------------------------

/// Emitted when a classification result is applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentimentEvent {
    pub call_id: u64,
    /// Request sequence number within the call.
    pub seq: u64,
    pub label: Sentiment,
}
