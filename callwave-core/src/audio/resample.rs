//! Streaming sample-rate conversion using rubato `FastFixedIn` resamplers.
//!
//! Both directions run one converter per stream: the capture worker turns
//! the device's native rate into a continuous 16 kHz stream, and the output
//! feed turns 24 kHz fragments into the device rate. Input is accumulated
//! until a full rubato chunk is available, and filter state carries across
//! calls, so consecutive pieces come out as one continuous signal.
//!
//! When both rates match no rubato session is created.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{error, info};

use crate::error::{CallError, Result};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when source rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Input carried over between calls until a full chunk is available.
    input_buf: Vec<f32>,
    chunk_size: usize,
    ratio: f64,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Create a streaming converter from `source_rate` to `target_rate`,
    /// feeding rubato `chunk_size` input frames at a time.
    ///
    /// # Errors
    /// Returns `CallError::AudioDevice` for a zero rate or a ratio rubato
    /// rejects.
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if source_rate == 0 || target_rate == 0 || chunk_size == 0 {
            return Err(CallError::AudioDevice(format!(
                "cannot resample {source_rate} Hz -> {target_rate} Hz in chunks of {chunk_size}"
            )));
        }
        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                ratio: 1.0,
                output_buf: Vec::new(),
            });
        }

        let resampler = build_resampler(source_rate, target_rate, chunk_size)?;
        let output_buf = vec![vec![0f32; resampler.output_frames_max()]; 1];

        info!(source_rate, target_rate, chunk_size, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::with_capacity(chunk_size * 2),
            chunk_size,
            ratio: target_rate as f64 / source_rate as f64,
            output_buf,
        })
    }

    /// Convert incoming samples, appending output to `out` (may append nothing).
    pub fn process_into(&mut self, samples: &[f32], out: &mut Vec<f32>) {
        let Some(ref mut resampler) = self.resampler else {
            out.extend_from_slice(samples);
            return;
        };

        self.input_buf.extend_from_slice(samples);

        let mut consumed_total = 0;
        while self.input_buf.len() - consumed_total >= self.chunk_size {
            let input = &self.input_buf[consumed_total..consumed_total + self.chunk_size];
            match resampler.process_into_buffer(&[input], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => out.extend_from_slice(&self.output_buf[0][..produced]),
                Err(e) => error!("resampler process error: {e}"),
            }
            consumed_total += self.chunk_size;
        }
        self.input_buf.drain(..consumed_total);
    }

    /// Convert whatever input is still held back, zero-padded to a full
    /// chunk, and append only the part that corresponds to real input.
    pub fn flush_into(&mut self, out: &mut Vec<f32>) {
        let Some(ref mut resampler) = self.resampler else {
            return;
        };
        if self.input_buf.is_empty() {
            return;
        }

        let held = self.input_buf.len();
        let input: [&[f32]; 1] = [&self.input_buf];
        match resampler.process_partial_into_buffer(Some(&input[..]), &mut self.output_buf, None) {
            Ok((_consumed, produced)) => {
                let expected = (held as f64 * self.ratio).ceil() as usize;
                out.extend_from_slice(&self.output_buf[0][..produced.min(expected)]);
            }
            Err(e) => error!("resampler flush error: {e}"),
        }
        self.input_buf.clear();
    }

    /// Drop any buffered input and internal filter state.
    pub fn reset(&mut self) {
        self.input_buf.clear();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }

    /// Returns `true` when no conversion happens.
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

fn build_resampler(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<FastFixedIn<f32>> {
    let ratio = target_rate as f64 / source_rate as f64;
    FastFixedIn::<f32>::new(
        ratio,
        1.0, // fixed ratio, no dynamic adjustment
        PolynomialDegree::Cubic,
        chunk_size,
        1, // mono
    )
    .map_err(|e| CallError::AudioDevice(format!("resampler init: {e}")))
}
