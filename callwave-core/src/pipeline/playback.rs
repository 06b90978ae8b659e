//! Playback pipeline: gapless scheduling of arbitrarily sized fragments.
//!
//! ## Schedule invariant
//!
//! `next_start` is a cursor on the output clock. Each fragment starts at
//! `max(next_start, now)` and advances the cursor by its duration, so
//! fragments play back to back in call order. If the cursor fell behind the
//! clock (network gap) the fragment starts "now" and the gap is audible;
//! ordering is never sacrificed to hide it.
//!
//! `stop()` is a hard interrupt for barge-in: scheduled audio is discarded,
//! not drained, and the cursor returns to 0.

use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    audio::{meter::LevelMeter, AudioSink, OutputDevice},
    buffering::frame::EncodedChunk,
    codec,
    error::{CallError, Result},
};

/// Configuration for [`PlaybackPipeline`].
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Rate of inbound synthesized audio (Hz). Default: 24000.
    pub sample_rate: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
        }
    }
}

/// The "next start time" cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlaybackSchedule {
    next_start: f64,
}

impl PlaybackSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `duration` seconds starting no earlier than `now`.
    /// Returns the start time.
    pub fn place(&mut self, now: f64, duration: f64) -> f64 {
        let start = self.next_start.max(now);
        self.next_start = start + duration.max(0.0);
        start
    }

    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    pub fn reset(&mut self) {
        self.next_start = 0.0;
    }
}

/// Where a fragment landed on the output clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    pub start_time: f64,
    pub duration: f64,
    pub samples: usize,
}

pub struct PlaybackPipeline {
    config: PlaybackConfig,
    device: Arc<dyn OutputDevice>,
    meter: Arc<LevelMeter>,
    sink: Option<Arc<dyn AudioSink>>,
    schedule: PlaybackSchedule,
}

impl PlaybackPipeline {
    pub fn new(config: PlaybackConfig, device: Arc<dyn OutputDevice>, meter: Arc<LevelMeter>) -> Self {
        Self {
            config,
            device,
            meter,
            sink: None,
            schedule: PlaybackSchedule::new(),
        }
    }

    /// Acquire the output device. No-op if already open.
    ///
    /// # Errors
    /// Device errors from [`OutputDevice::open`].
    pub fn open(&mut self) -> Result<()> {
        if self.sink.is_some() {
            return Ok(());
        }
        let sink = self.device.open(Arc::clone(&self.meter))?;
        self.schedule.reset();
        self.sink = Some(sink);
        info!(sample_rate = self.config.sample_rate, "playback opened");
        Ok(())
    }

    /// Decode and schedule one inbound fragment right after the previous one.
    ///
    /// # Errors
    /// - `CallError::NotRunning` if the device is not open.
    /// - `CallError::Decode` for a malformed fragment; the schedule is untouched.
    pub fn play_chunk(&mut self, chunk: &EncodedChunk) -> Result<ScheduledChunk> {
        let sink = self.sink.as_ref().ok_or(CallError::NotRunning)?;
        let frame = codec::decode(chunk, self.config.sample_rate)?;

        let duration = frame.duration_secs();
        let samples = frame.len();
        let start_time = self.schedule.place(sink.current_time(), duration);
        sink.schedule(start_time, frame);

        debug!(start_time, duration, samples, "fragment scheduled");
        Ok(ScheduledChunk {
            start_time,
            duration,
            samples,
        })
    }

    /// The remote finished its turn: let the sink emit anything it is still
    /// holding back. The schedule is untouched.
    pub fn finish_turn(&mut self) {
        if let Some(sink) = self.sink.as_ref() {
            sink.flush();
        }
    }

    /// Hard interrupt: silence now, discard pending audio, reset the cursor.
    pub fn stop(&mut self) {
        if let Some(sink) = self.sink.as_ref() {
            sink.halt();
        }
        self.schedule.reset();
    }

    /// Release the output device. Idempotent.
    pub fn close(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.halt();
            sink.close();
            info!("playback closed");
        }
        self.schedule.reset();
        self.meter.reset();
    }

    /// Current output level; 0.0 when closed.
    pub fn volume(&self) -> f32 {
        if self.sink.is_none() {
            return 0.0;
        }
        self.meter.level()
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    pub fn schedule(&self) -> PlaybackSchedule {
        self.schedule
    }
}

impl Drop for PlaybackPipeline {
    fn drop(&mut self) {
        self.close();
    }
}
