//! Terminal rendering for the call UI.

use callwave_core::{CallState, DeviceInfo, Sentiment, Speaker};

const BAR_WIDTH: usize = 12;

/// `[#####-------]` for a level in [0, 1].
pub fn volume_bar(level: f32) -> String {
    let level = if level.is_finite() { level.clamp(0.0, 1.0) } else { 0.0 };
    let filled = (level * BAR_WIDTH as f32).round() as usize;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(BAR_WIDTH - filled))
}

pub struct StatusView<'a> {
    pub state: CallState,
    pub input: f32,
    pub output: f32,
    pub language: Option<&'a str>,
    pub sentiment: Option<Sentiment>,
}

pub fn status_line(view: &StatusView<'_>) -> String {
    format!(
        "{:<10} mic {} spk {} lang {:<5} mood {}",
        view.state.as_str(),
        volume_bar(view.input),
        volume_bar(view.output),
        view.language.unwrap_or("-"),
        view.sentiment.map(|s| s.as_str()).unwrap_or("-"),
    )
}

pub fn transcript_line(speaker: Speaker, text: &str) -> String {
    let who = match speaker {
        Speaker::User => "you",
        Speaker::Agent => "agent",
    };
    format!("{who:>5}: {}", text.trim())
}

pub fn device_line(device: &DeviceInfo) -> String {
    let mut tags = Vec::new();
    if device.is_default {
        tags.push("default");
    }
    if device.is_recommended {
        tags.push("recommended");
    }
    if device.is_loopback_like {
        tags.push("loopback");
    }
    if tags.is_empty() {
        format!("  {}", device.name)
    } else {
        format!("  {} ({})", device.name, tags.join(", "))
    }
}
