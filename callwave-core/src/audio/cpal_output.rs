//! Speaker playback via cpal.
//!
//! The device callback owns an [`OutputRenderer`] and mirrors what it
//! rendered into a lock-free tap. The sink keeps the matching [`OutputFeed`]
//! for the session thread. A holder thread owns the `!Send` stream, drains
//! the tap into the level meter, and drops the stream on close.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::{
    traits::{DeviceTrait, StreamTrait},
    FromSample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use super::{
    device, meter::LevelMeter, output_stream, AudioSink, OutputClock, OutputDevice, OutputFeed,
    OutputRenderer,
};
use crate::{
    buffering::{create_tap_ring, frame::AudioFrame, AudioProducer, Consumer, Producer, TAP_RING_CAPACITY},
    error::{CallError, Result},
};

/// How often the holder thread drains the tap into the meter.
const METER_POLL: Duration = Duration::from_millis(20);

/// Frames rendered per pass inside the callback; larger device periods are
/// rendered in several passes over the same scratch buffer.
const RENDER_BLOCK: usize = 4096;

/// cpal-backed speaker.
#[derive(Debug, Clone, Default)]
pub struct CpalOutputDevice {
    preferred: Option<String>,
}

impl CpalOutputDevice {
    pub fn new(preferred: Option<String>) -> Self {
        Self { preferred }
    }
}

impl OutputDevice for CpalOutputDevice {
    fn open(&self, meter: Arc<LevelMeter>) -> Result<Arc<dyn AudioSink>> {
        let running = Arc::new(AtomicBool::new(true));
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<OutputFeed>>();

        let preferred = self.preferred.clone();
        let holder_running = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("callwave-output".into())
            .spawn(move || {
                let (tap_tx, mut tap_rx) = create_tap_ring();
                let stream = match open_stream(preferred.as_deref(), tap_tx) {
                    Ok((stream, feed)) => {
                        let _ = open_tx.send(Ok(feed));
                        stream
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };

                let mut scratch = vec![0f32; TAP_RING_CAPACITY];
                while holder_running.load(Ordering::Acquire) {
                    let n = tap_rx.pop_slice(&mut scratch);
                    if n > 0 {
                        meter.update(&scratch[..n]);
                    }
                    thread::park_timeout(METER_POLL);
                }

                meter.reset();
                // Stream drops here, releasing the device on this thread.
                drop(stream);
                debug!("output holder thread exiting");
            })?;

        match open_rx.recv() {
            Ok(Ok(feed)) => Ok(Arc::new(CpalSink {
                clock: feed.clock(),
                device_rate: feed.device_rate(),
                feed: Mutex::new(feed),
                running,
                holder: Mutex::new(Some(handle)),
            })),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(CallError::Other(anyhow::anyhow!(
                    "output holder thread died unexpectedly"
                )))
            }
        }
    }
}

fn open_stream(preferred: Option<&str>, tap: AudioProducer) -> Result<(Stream, OutputFeed)> {
    let host = cpal::default_host();
    let device = device::resolve_output(&host, preferred)?;

    info!(
        device = device.name().unwrap_or_default().as_str(),
        "opening output device"
    );

    let supported = device
        .default_output_config()
        .map_err(|e| CallError::AudioDevice(e.to_string()))?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    info!(sample_rate, channels, "output config selected");

    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let (feed, renderer) = output_stream(sample_rate);
    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_output::<f32>(&device, &config, renderer, tap)?,
        SampleFormat::I16 => build_output::<i16>(&device, &config, renderer, tap)?,
        SampleFormat::U16 => build_output::<u16>(&device, &config, renderer, tap)?,
        fmt => {
            return Err(CallError::AudioStream(format!(
                "unsupported sample format: {fmt:?}"
            )))
        }
    };

    stream
        .play()
        .map_err(|e| CallError::AudioStream(e.to_string()))?;

    Ok((stream, feed))
}

fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut renderer: OutputRenderer,
    mut tap: AudioProducer,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let ch = config.channels.max(1) as usize;
    let mut scratch = vec![0f32; RENDER_BLOCK];

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
                for block in data.chunks_mut(RENDER_BLOCK * ch) {
                    let mono = &mut scratch[..block.len() / ch];
                    renderer.render(mono);

                    for (frame, &s) in block.chunks_mut(ch).zip(mono.iter()) {
                        frame.fill(T::from_sample_(s.clamp(-1.0, 1.0)));
                    }
                    // A full tap only means the meter is behind; never block here.
                    let _ = tap.push_slice(mono);
                }
            },
            |err| error!("output stream error: {err}"),
            None,
        )
        .map_err(|e| CallError::AudioStream(e.to_string()))
}

/// The feed lock is only taken by the session thread; the callback reads
/// the ring and the clock atomics.
struct CpalSink {
    feed: Mutex<OutputFeed>,
    clock: Arc<OutputClock>,
    device_rate: u32,
    running: Arc<AtomicBool>,
    holder: Mutex<Option<JoinHandle<()>>>,
}

impl AudioSink for CpalSink {
    fn current_time(&self) -> f64 {
        self.clock.rendered_frames() as f64 / self.device_rate as f64
    }

    /// Appends after everything queued, or plays now after an underrun.
    /// That is the position the playback schedule hands in as `start_time`.
    fn schedule(&self, start_time: f64, frame: AudioFrame) {
        let mut feed = self.feed.lock();
        debug!(
            start_time,
            queued = feed.queued(),
            now = self.current_time(),
            "feeding fragment"
        );
        feed.push(&frame);
    }

    fn flush(&self) {
        self.feed.lock().flush();
    }

    fn halt(&self) {
        self.feed.lock().halt();
    }

    fn close(&self) {
        self.feed.lock().halt();
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.holder.lock().take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                error!("output holder thread panicked");
            }
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.close();
    }
}
