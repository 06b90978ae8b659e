//! Microphone capture via cpal.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use cpal::{
    traits::{DeviceTrait, StreamTrait},
    FromSample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
};
use tracing::{error, info, warn};

use super::{device, InputDevice, InputStream};
use crate::{
    buffering::{AudioProducer, Producer},
    error::{CallError, Result},
};

/// Frames downmixed per pass inside the callback.
const CAPTURE_BLOCK: usize = 4096;

/// cpal-backed microphone. Opens the preferred device by name, otherwise the
/// default input, otherwise the first available input.
#[derive(Debug, Clone, Default)]
pub struct CpalInputDevice {
    preferred: Option<String>,
}

impl CpalInputDevice {
    pub fn new(preferred: Option<String>) -> Self {
        Self { preferred }
    }
}

impl InputDevice for CpalInputDevice {
    fn open(&self, producer: AudioProducer, running: Arc<AtomicBool>) -> Result<InputStream> {
        let host = cpal::default_host();
        let device = device::resolve_input(&host, self.preferred.as_deref())?;

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| CallError::AudioDevice(e.to_string()))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(sample_rate, channels, "input config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let dropped = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&dropped);
        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_input::<f32>(&device, &config, producer, running, counter)?,
            SampleFormat::I16 => build_input::<i16>(&device, &config, producer, running, counter)?,
            SampleFormat::U16 => build_input::<u16>(&device, &config, producer, running, counter)?,
            SampleFormat::U8 => build_input::<u8>(&device, &config, producer, running, counter)?,
            fmt => {
                return Err(CallError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        };

        stream
            .play()
            .map_err(|e| CallError::AudioStream(e.to_string()))?;

        Ok(InputStream::new(sample_rate, Box::new(LiveInput { _stream: stream, dropped })))
    }
}

/// Keeps the cpal stream alive; reports ring overruns when released.
struct LiveInput {
    _stream: Stream,
    dropped: Arc<AtomicU64>,
}

impl Drop for LiveInput {
    fn drop(&mut self) {
        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            warn!(dropped, "capture ring overflowed during the call");
        }
    }
}

/// Build a stream that downmixes interleaved `T` samples to mono f32 and
/// pushes them into the ring.
fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: AudioProducer,
    running: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let ch = config.channels.max(1) as usize;
    let mut scratch = vec![0f32; CAPTURE_BLOCK];

    device
        .build_input_stream(
            config,
            move |data: &[T], _info: &cpal::InputCallbackInfo| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }

                let lost = downmix_into(data, ch, &mut scratch, &mut producer);
                if lost > 0 {
                    dropped.fetch_add(lost as u64, Ordering::Relaxed);
                }
            },
            |err| error!("input stream error: {err}"),
            None,
        )
        .map_err(|e| CallError::AudioStream(e.to_string()))
}

/// Downmix interleaved `data` to mono through `scratch` and push it.
/// Returns how many mono samples did not fit in the ring. Never allocates.
fn downmix_into<T>(data: &[T], ch: usize, scratch: &mut [f32], producer: &mut AudioProducer) -> usize
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut lost = 0;
    for block in data.chunks(scratch.len() * ch) {
        let mono = &mut scratch[..block.len() / ch];
        for (frame, out) in block.chunks_exact(ch).zip(mono.iter_mut()) {
            let sum: f32 = frame
                .iter()
                .map(|&s| <f32 as FromSample<T>>::from_sample_(s))
                .sum();
            *out = sum / ch as f32;
        }
        lost += mono.len() - producer.push_slice(mono);
    }
    lost
}
