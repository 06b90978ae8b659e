//! Host playback primitive: a clocked output that accepts buffers with a
//! scheduled start time, and the lock-free feed behind the cpal speaker.
//!
//! ```text
//!  session thread                          device callback
//!  OutputFeed ──── SPSC sample ring ────► OutputRenderer
//!      └─────────── OutputClock (atomics) ──────┘
//! ```
//!
//! The feed runs every fragment through one streaming rate converter and
//! appends the result to the ring, so consecutive fragments are contiguous
//! on the device clock. The renderer pops what is due and pads an underrun
//! with silence; it never takes a lock. `halt` marks everything pushed so
//! far as stale and the renderer skips it on its next period.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use tracing::{error, warn};

use crate::{
    audio::{meter::LevelMeter, resample::RateConverter},
    buffering::{create_output_ring, frame::AudioFrame, AudioConsumer, AudioProducer, Consumer, Observer, Producer},
    error::Result,
};

/// Converter chunk length in milliseconds of source audio. Bounds how much
/// of a fragment can be held back until the next one (or a flush).
const FEED_CHUNK_MS: u32 = 10;

/// An open output device.
pub trait AudioSink: Send + Sync {
    /// Output clock in seconds since the sink was opened.
    fn current_time(&self) -> f64;

    /// Queue `frame` to begin at `start_time` on the output clock.
    fn schedule(&self, start_time: f64, frame: AudioFrame);

    /// Emit audio still held back for conversion. Called when the remote
    /// finishes a turn.
    fn flush(&self) {}

    /// Silence immediately and discard everything scheduled but not yet played.
    fn halt(&self);

    /// Release the device. Idempotent.
    fn close(&self);
}

/// Opens output devices. The sink feeds `meter` with what it renders.
pub trait OutputDevice: Send + Sync + 'static {
    fn open(&self, meter: Arc<LevelMeter>) -> Result<Arc<dyn AudioSink>>;
}

/// Counters shared by both halves of an output stream.
#[derive(Debug, Default)]
pub struct OutputClock {
    rendered: AtomicU64,
    /// Ring sequence number below which samples are skipped unplayed.
    discard_before: AtomicU64,
}

impl OutputClock {
    /// Device frames rendered since the stream was created.
    pub fn rendered_frames(&self) -> u64 {
        self.rendered.load(Ordering::Acquire)
    }
}

/// Create a connected feed/renderer pair for a device at `device_rate`.
pub fn output_stream(device_rate: u32) -> (OutputFeed, OutputRenderer) {
    let (producer, consumer) = create_output_ring(device_rate);
    let clock = Arc::new(OutputClock::default());
    let feed = OutputFeed {
        producer,
        clock: Arc::clone(&clock),
        device_rate,
        converter: None,
        scratch: Vec::new(),
        pushed: 0,
        overflowed: 0,
    };
    let renderer = OutputRenderer {
        consumer,
        clock,
        consumed: 0,
    };
    (feed, renderer)
}

/// Writer half, driven by whoever schedules playback.
pub struct OutputFeed {
    producer: AudioProducer,
    clock: Arc<OutputClock>,
    device_rate: u32,
    /// Streaming converter for the current source rate.
    converter: Option<(u32, RateConverter)>,
    scratch: Vec<f32>,
    /// Samples ever written to the ring.
    pushed: u64,
    overflowed: u64,
}

impl OutputFeed {
    pub fn clock(&self) -> Arc<OutputClock> {
        Arc::clone(&self.clock)
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }

    /// Output clock in seconds.
    pub fn current_time(&self) -> f64 {
        self.clock.rendered_frames() as f64 / self.device_rate as f64
    }

    /// Samples waiting in the ring, including stale ones not yet skipped.
    pub fn queued(&self) -> usize {
        self.producer.occupied_len()
    }

    /// Samples dropped because the ring was full.
    pub fn overflowed(&self) -> u64 {
        self.overflowed
    }

    /// Convert `frame` to the device rate and append it right after
    /// everything already queued.
    pub fn push(&mut self, frame: &AudioFrame) {
        if frame.is_empty() {
            return;
        }
        self.scratch.clear();
        match converter_for(&mut self.converter, frame.sample_rate, self.device_rate) {
            Some(converter) => converter.process_into(&frame.samples, &mut self.scratch),
            None => self.scratch.extend_from_slice(&frame.samples),
        }
        self.commit();
    }

    /// Append the converter's held-back tail.
    pub fn flush(&mut self) {
        self.scratch.clear();
        if let Some((_, converter)) = self.converter.as_mut() {
            converter.flush_into(&mut self.scratch);
        }
        self.commit();
    }

    /// Discard everything queued so far. Audio pushed afterwards plays
    /// normally.
    pub fn halt(&mut self) {
        if let Some((_, converter)) = self.converter.as_mut() {
            converter.reset();
        }
        self.clock.discard_before.store(self.pushed, Ordering::Release);
    }

    fn commit(&mut self) {
        if self.scratch.is_empty() {
            return;
        }
        let written = self.producer.push_slice(&self.scratch);
        self.pushed += written as u64;

        let dropped = self.scratch.len() - written;
        if dropped > 0 {
            self.overflowed += dropped as u64;
            warn!(dropped, "speaker feed full, dropping audio");
        }
    }
}

fn converter_for(
    slot: &mut Option<(u32, RateConverter)>,
    source_rate: u32,
    device_rate: u32,
) -> Option<&mut RateConverter> {
    if slot.as_ref().map(|(rate, _)| *rate) != Some(source_rate) {
        let chunk = (source_rate * FEED_CHUNK_MS / 1000).max(1) as usize;
        *slot = match RateConverter::new(source_rate, device_rate, chunk) {
            Ok(converter) => Some((source_rate, converter)),
            Err(e) => {
                error!("speaker resampler unavailable, playing unconverted: {e}");
                None
            }
        };
    }
    slot.as_mut().map(|(_, converter)| converter)
}

/// Reader half, owned by the device callback.
pub struct OutputRenderer {
    consumer: AudioConsumer,
    clock: Arc<OutputClock>,
    /// Samples ever taken out of the ring, played or skipped.
    consumed: u64,
}

impl OutputRenderer {
    /// Fill `out` with the next mono frames and advance the clock.
    /// Wait-free; silence pads whatever the ring cannot supply.
    pub fn render(&mut self, out: &mut [f32]) {
        let discard_before = self.clock.discard_before.load(Ordering::Acquire);
        if self.consumed < discard_before {
            let stale = (discard_before - self.consumed) as usize;
            self.consumed += self.consumer.skip(stale) as u64;
        }

        let n = self.consumer.pop_slice(out);
        self.consumed += n as u64;
        out[n..].fill(0.0);

        self.clock.rendered.fetch_add(out.len() as u64, Ordering::Release);
    }
}
