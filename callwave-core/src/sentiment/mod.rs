//! Sentiment side-channel.
//!
//! Classification runs off the call loop and never affects call state: a
//! failed request only leaves the previous label in place.

#[cfg(feature = "sentiment-http")]
pub mod http;

#[cfg(feature = "sentiment-http")]
pub use http::{HttpSentiment, SentimentConfig};

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    /// Parse a classifier label, ignoring case and surrounding noise such as
    /// quotes or a trailing period.
    pub fn from_label(label: &str) -> Option<Self> {
        let cleaned = label
            .trim()
            .trim_matches(|c: char| !c.is_ascii_alphabetic())
            .to_ascii_lowercase();
        match cleaned.as_str() {
            "positive" => Some(Sentiment::Positive),
            "negative" => Some(Sentiment::Negative),
            "neutral" => Some(Sentiment::Neutral),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "Positive",
            Sentiment::Negative => "Negative",
            Sentiment::Neutral => "Neutral",
        }
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a text fragment. Called from short-lived worker threads, so
/// blocking implementations are fine.
pub trait SentimentService: Send + Sync + 'static {
    /// # Errors
    /// `CallError::Sentiment` when the classifier is unreachable or answers
    /// with something unrecognizable.
    fn analyze(&self, text: &str) -> Result<Sentiment>;
}
