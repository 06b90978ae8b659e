//! Persistent application settings (JSON file in the app data directory).
//!
//! Secrets and endpoints may also come from the environment, which wins over
//! the file: `CALLWAVE_API_KEY`, `CALLWAVE_ENDPOINT`, `CALLWAVE_SENTIMENT_URL`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use callwave_core::{
    transport::live::{DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_VOICE},
    LiveConfig, SentimentConfig, SessionConfig,
};
use serde::{Deserialize, Serialize};

const DEFAULT_RING_DELAY_MS: u64 = 2_000;
const DEFAULT_MIN_SENTIMENT_CHARS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub preferred_input_device: Option<String>,
    pub preferred_output_device: Option<String>,
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: Option<String>,
    pub greeting: Option<String>,
    pub ring_delay_ms: u64,
    pub sentiment_url: Option<String>,
    pub sentiment_api_key: Option<String>,
    pub min_sentiment_chars: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            preferred_input_device: None,
            preferred_output_device: None,
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.into(),
            model: DEFAULT_MODEL.into(),
            voice: DEFAULT_VOICE.into(),
            system_instruction: Some(
                "You are a friendly voice assistant on a phone call. Keep answers short. \
                 Begin every reply with [LANG:XX] where XX is the language you are speaking."
                    .into(),
            ),
            greeting: Some("Hello!".into()),
            ring_delay_ms: DEFAULT_RING_DELAY_MS,
            sentiment_url: None,
            sentiment_api_key: None,
            min_sentiment_chars: DEFAULT_MIN_SENTIMENT_CHARS,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.preferred_input_device = normalize_optional(self.preferred_input_device.take());
        self.preferred_output_device = normalize_optional(self.preferred_output_device.take());
        self.api_key = normalize_optional(self.api_key.take());
        self.system_instruction = normalize_optional(self.system_instruction.take());
        self.greeting = normalize_optional(self.greeting.take());
        self.sentiment_url = normalize_optional(self.sentiment_url.take());
        self.sentiment_api_key = normalize_optional(self.sentiment_api_key.take());
        self.endpoint = normalize_endpoint(&self.endpoint);
        self.model = normalize_model(&self.model);
        if self.voice.trim().is_empty() {
            self.voice = DEFAULT_VOICE.into();
        } else {
            self.voice = self.voice.trim().to_string();
        }
        self.ring_delay_ms = self.ring_delay_ms.min(30_000);
        self.min_sentiment_chars = self.min_sentiment_chars.clamp(1, 500);
    }

    /// Let environment values replace file values. `lookup` is
    /// `std::env::var(..).ok()` in production.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("CALLWAVE_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(endpoint) = lookup("CALLWAVE_ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Some(url) = lookup("CALLWAVE_SENTIMENT_URL") {
            self.sentiment_url = Some(url);
        }
        self.normalize();
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            ring_delay: Duration::from_millis(self.ring_delay_ms),
            min_sentiment_chars: self.min_sentiment_chars,
            greeting: self.greeting.clone(),
            ..SessionConfig::default()
        }
    }

    pub fn live_config(&self, input_sample_rate: u32) -> LiveConfig {
        LiveConfig {
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone().unwrap_or_default(),
            model: self.model.clone(),
            voice: self.voice.clone(),
            system_instruction: self.system_instruction.clone(),
            input_sample_rate,
            ..LiveConfig::default()
        }
    }

    /// `None` when no classifier endpoint is configured.
    pub fn sentiment_config(&self) -> Option<SentimentConfig> {
        let url = self.sentiment_url.as_ref()?;
        let mut config = SentimentConfig::new(url.clone());
        config.api_key = self.sentiment_api_key.clone();
        Some(config)
    }
}

fn normalize_optional(raw: Option<String>) -> Option<String> {
    raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub fn normalize_endpoint(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with("wss://") || trimmed.starts_with("ws://") {
        trimmed.into()
    } else {
        DEFAULT_ENDPOINT.into()
    }
}

pub fn normalize_model(raw: &str) -> String {
    let trimmed = raw.trim();
    let bare = trimmed.strip_prefix("models/").unwrap_or(trimmed);
    if bare.is_empty() {
        DEFAULT_MODEL.into()
    } else {
        bare.into()
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Callwave")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".config")
            })
            .join("callwave")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_and_fills_defaults() {
        let mut settings = AppSettings {
            api_key: Some("  ".into()),
            endpoint: "https://not-a-websocket".into(),
            model: "models/my-model".into(),
            voice: " ".into(),
            greeting: Some("  Hi there ".into()),
            ring_delay_ms: 120_000,
            min_sentiment_chars: 0,
            ..AppSettings::default()
        };
        settings.normalize();

        assert_eq!(settings.api_key, None);
        assert_eq!(settings.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(settings.model, "my-model");
        assert_eq!(settings.voice, DEFAULT_VOICE);
        assert_eq!(settings.greeting.as_deref(), Some("Hi there"));
        assert_eq!(settings.ring_delay_ms, 30_000);
        assert_eq!(settings.min_sentiment_chars, 1);
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut settings = AppSettings {
            api_key: Some("from-file".into()),
            ..AppSettings::default()
        };
        settings.apply_overrides(|name| match name {
            "CALLWAVE_API_KEY" => Some(" from-env ".into()),
            "CALLWAVE_SENTIMENT_URL" => Some("http://localhost:8080/classify".into()),
            _ => None,
        });
        assert_eq!(settings.api_key.as_deref(), Some("from-env"));
        assert_eq!(settings.endpoint, DEFAULT_ENDPOINT);
        assert!(settings.sentiment_config().is_some());
    }

    #[test]
    fn sentiment_is_disabled_without_url() {
        assert!(AppSettings::default().sentiment_config().is_none());
    }

    #[test]
    fn session_config_reflects_settings() {
        let settings = AppSettings {
            ring_delay_ms: 500,
            greeting: None,
            ..AppSettings::default()
        };
        let config = settings.session_config();
        assert_eq!(config.ring_delay, Duration::from_millis(500));
        assert_eq!(config.greeting, None);
        assert_eq!(config.capture.sample_rate, 16_000);
        assert_eq!(settings.live_config(config.capture.sample_rate).input_sample_rate, 16_000);
    }

    #[test]
    fn missing_file_loads_defaults_and_save_round_trips() {
        let dir = std::env::temp_dir().join(format!("callwave-settings-{}", std::process::id()));
        let path = dir.join("settings.json");
        let _ = fs::remove_dir_all(&dir);

        let loaded = load_settings(&path);
        assert_eq!(loaded.ring_delay_ms, DEFAULT_RING_DELAY_MS);

        let custom = AppSettings {
            voice: "Puck".into(),
            ..AppSettings::default()
        };
        save_settings(&path, &custom).expect("save settings");
        assert_eq!(load_settings(&path).voice, "Puck");

        let _ = fs::remove_dir_all(&dir);
    }
}
