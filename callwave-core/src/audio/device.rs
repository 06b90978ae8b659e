//! Audio device enumeration and selection.

use serde::{Deserialize, Serialize};

/// Which side of the call a device serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDirection {
    Input,
    Output,
}

/// Metadata about an audio device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    pub direction: DeviceDirection,
    /// Whether this is the system default device for its direction.
    pub is_default: bool,
    /// Heuristic flag for inputs that likely capture system/output audio.
    pub is_loopback_like: bool,
    /// Heuristic recommendation for the best device of its direction.
    pub is_recommended: bool,
}

const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "wave out",
    "what u hear",
    "what you hear",
    "loopback",
    "virtual output",
    "monitor of",
    "speakers (",
    "headphones (",
];

const MIC_POSITIVE_KEYWORDS: &[&str] = &[
    "microphone",
    "mic",
    "array",
    "headset",
    "input",
    "usb",
    "webcam",
];

/// Best-effort heuristic for loopback/system-output capture devices. A call
/// through one of these would feed the remote its own voice.
pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Score an input device name for likely speech microphone quality.
///
/// Higher is better.
pub fn mic_preference_score(name: &str) -> i32 {
    let lowered = name.trim().to_ascii_lowercase();
    let mut score = if is_loopback_like_name(&lowered) { -16 } else { 8 };
    if MIC_POSITIVE_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        score += 6;
    }
    if lowered.contains("default") {
        score += 1;
    }
    score
}

/// Mark the best entry as recommended and sort recommended/default first.
fn rank(mut list: Vec<DeviceInfo>) -> Vec<DeviceInfo> {
    let best = list
        .iter()
        .enumerate()
        .max_by_key(|(_, d)| {
            let base = match d.direction {
                DeviceDirection::Input => mic_preference_score(&d.name),
                DeviceDirection::Output => 0,
            };
            base + if d.is_default { 2 } else { 0 }
        })
        .map(|(idx, _)| idx);

    if let Some(best) = best.and_then(|idx| list.get_mut(idx)) {
        best.is_recommended = true;
    }

    list.sort_by_key(|d| {
        (
            !d.is_recommended,
            d.is_loopback_like,
            !d.is_default,
            d.name.to_ascii_lowercase(),
        )
    });
    list
}

#[cfg(feature = "audio-cpal")]
pub use cpal_impl::{list_input_devices, list_output_devices, resolve_input, resolve_output};

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(feature = "audio-cpal")]
mod cpal_impl {
    use cpal::traits::{DeviceTrait, HostTrait};
    use tracing::warn;

    use super::{is_loopback_like_name, rank, DeviceDirection, DeviceInfo};
    use crate::error::{CallError, Result};

    fn describe(
        devices: impl Iterator<Item = cpal::Device>,
        default_name: Option<String>,
        direction: DeviceDirection,
    ) -> Vec<DeviceInfo> {
        let list = devices
            .enumerate()
            .map(|(idx, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Device {}", idx + 1));
                let is_default = default_name.as_deref() == Some(name.as_str());
                let is_loopback_like =
                    direction == DeviceDirection::Input && is_loopback_like_name(&name);
                DeviceInfo {
                    name,
                    direction,
                    is_default,
                    is_loopback_like,
                    is_recommended: false,
                }
            })
            .collect();
        rank(list)
    }

    /// List all available audio input devices on the system.
    pub fn list_input_devices() -> Vec<DeviceInfo> {
        let host = cpal::default_host();
        let default_name = host.default_input_device().and_then(|d| d.name().ok());
        match host.input_devices() {
            Ok(devices) => describe(devices, default_name, DeviceDirection::Input),
            Err(e) => {
                warn!("failed to enumerate input devices: {e}");
                vec![]
            }
        }
    }

    /// List all available audio output devices on the system.
    pub fn list_output_devices() -> Vec<DeviceInfo> {
        let host = cpal::default_host();
        let default_name = host.default_output_device().and_then(|d| d.name().ok());
        match host.output_devices() {
            Ok(devices) => describe(devices, default_name, DeviceDirection::Output),
            Err(e) => {
                warn!("failed to enumerate output devices: {e}");
                vec![]
            }
        }
    }

    fn find_named(
        devices: std::result::Result<impl Iterator<Item = cpal::Device>, cpal::DevicesError>,
        preferred: &str,
    ) -> Option<cpal::Device> {
        match devices {
            Ok(mut devices) => {
                let found = devices.find(|d| d.name().map(|n| n == preferred).unwrap_or(false));
                if found.is_none() {
                    warn!(preferred, "preferred device not found, falling back");
                }
                found
            }
            Err(e) => {
                warn!("failed to list devices while resolving preference: {e}");
                None
            }
        }
    }

    /// Preferred name, otherwise the default input, otherwise the first input.
    pub fn resolve_input(host: &cpal::Host, preferred: Option<&str>) -> Result<cpal::Device> {
        if let Some(device) = preferred.and_then(|name| find_named(host.input_devices(), name)) {
            return Ok(device);
        }
        if let Some(device) = host.default_input_device() {
            return Ok(device);
        }
        let mut devices = host
            .input_devices()
            .map_err(|e| CallError::AudioDevice(e.to_string()))?;
        let fallback = devices.next().ok_or(CallError::NoDefaultInputDevice)?;
        warn!("no default input device, falling back to first available input");
        Ok(fallback)
    }

    /// Preferred name, otherwise the default output, otherwise the first output.
    pub fn resolve_output(host: &cpal::Host, preferred: Option<&str>) -> Result<cpal::Device> {
        if let Some(device) = preferred.and_then(|name| find_named(host.output_devices(), name)) {
            return Ok(device);
        }
        if let Some(device) = host.default_output_device() {
            return Ok(device);
        }
        let mut devices = host
            .output_devices()
            .map_err(|e| CallError::AudioDevice(e.to_string()))?;
        let fallback = devices.next().ok_or(CallError::NoDefaultOutputDevice)?;
        warn!("no default output device, falling back to first available output");
        Ok(fallback)
    }
}
