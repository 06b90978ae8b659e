//! Sentiment over a plain JSON endpoint.
//!
//! Request: `POST {url}` with `{"text": "..."}`.
//! Response: `{"label": "Positive" | "Negative" | "Neutral"}` (`sentiment`
//! is accepted as an alias).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Sentiment, SentimentService};
use crate::error::{CallError, Result};

#[derive(Debug, Clone)]
pub struct SentimentConfig {
    pub url: String,
    /// Sent as a bearer token when present.
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl SentimentConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct ClassifyResponse {
    #[serde(alias = "sentiment")]
    label: String,
}

pub struct HttpSentiment {
    config: SentimentConfig,
    client: reqwest::blocking::Client,
}

impl HttpSentiment {
    /// # Errors
    /// `CallError::Sentiment` if the HTTP client cannot be built.
    pub fn new(config: SentimentConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CallError::Sentiment(format!("client build failed: {e}")))?;
        Ok(Self { config, client })
    }
}

impl SentimentService for HttpSentiment {
    fn analyze(&self, text: &str) -> Result<Sentiment> {
        let mut request = self.client.post(&self.config.url).json(&ClassifyRequest { text });
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .map_err(|e| CallError::Sentiment(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CallError::Sentiment(format!("classifier returned {status}")));
        }

        let body: ClassifyResponse = response
            .json()
            .map_err(|e| CallError::Sentiment(format!("bad classifier response: {e}")))?;
        debug!(label = body.label.as_str(), "sentiment classified");
        parse_label(&body.label)
    }
}

fn parse_label(label: &str) -> Result<Sentiment> {
    Sentiment::from_label(label)
        .ok_or_else(|| CallError::Sentiment(format!("unrecognized label {label:?}")))
}
