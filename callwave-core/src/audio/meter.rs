//! FFT-based level meter backing `volume()` on both pipelines.
//!
//! ## Algorithm
//!
//! 1. Keep the most recent `size` samples (default 256 ≈ 16 ms at 16 kHz).
//! 2. Apply a Hann window and run a forward FFT.
//! 3. Report the mean magnitude of the positive-frequency bins, normalised
//!    so a full-scale sine lands near 1.0 / (size / 4).
//!
//! The level is computed on the writer side (capture worker or output holder
//! thread) and published through an atomic, so readers never lock.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use parking_lot::Mutex;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Default analysis window in samples.
pub const DEFAULT_METER_SIZE: usize = 256;

pub struct LevelMeter {
    size: usize,
    fft: Arc<dyn Fft<f32>>,
    hann: Vec<f32>,
    state: Mutex<MeterState>,
    level_bits: AtomicU32,
}

struct MeterState {
    recent: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

impl LevelMeter {
    pub fn new(size: usize) -> Self {
        let size = size.max(2);
        let fft = FftPlanner::<f32>::new().plan_fft_forward(size);
        let hann = (0..size)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32;
                0.5 - 0.5 * phase.cos()
            })
            .collect();

        Self {
            size,
            fft,
            hann,
            state: Mutex::new(MeterState {
                recent: Vec::with_capacity(size),
                scratch: vec![Complex::new(0.0, 0.0); size],
            }),
            level_bits: AtomicU32::new(0f32.to_bits()),
        }
    }

    /// Feed newly captured or rendered samples.
    pub fn update(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }

        let mut state = self.state.lock();
        let MeterState { recent, scratch } = &mut *state;

        if samples.len() >= self.size {
            recent.clear();
            recent.extend_from_slice(&samples[samples.len() - self.size..]);
        } else {
            let overflow = (recent.len() + samples.len()).saturating_sub(self.size);
            recent.drain(..overflow);
            recent.extend_from_slice(samples);
        }

        // Left-pad with silence until the window fills up.
        let pad = self.size - recent.len();
        for (i, slot) in scratch.iter_mut().enumerate() {
            let s = if i < pad { 0.0 } else { recent[i - pad] };
            *slot = Complex::new(s * self.hann[i], 0.0);
        }
        self.fft.process(scratch);

        let bins = self.size / 2;
        let mean = scratch[..bins].iter().map(|c| c.norm()).sum::<f32>() / bins as f32;
        let level = mean / (self.size as f32 / 4.0);
        self.level_bits.store(level.to_bits(), Ordering::Release);
    }

    /// Most recent level. Always non-negative; 0.0 before the first update.
    pub fn level(&self) -> f32 {
        f32::from_bits(self.level_bits.load(Ordering::Acquire))
    }

    /// Forget history and report silence.
    pub fn reset(&self) {
        self.state.lock().recent.clear();
        self.level_bits.store(0f32.to_bits(), Ordering::Release);
    }

    pub fn window_size(&self) -> usize {
        self.size
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(DEFAULT_METER_SIZE)
    }
}

impl std::fmt::Debug for LevelMeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LevelMeter")
            .field("size", &self.size)
            .field("level", &self.level())
            .finish_non_exhaustive()
    }
}
