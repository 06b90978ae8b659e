//! Typed audio blocks that cross pipeline boundaries.

use std::fmt;

/// A contiguous block of mono PCM samples at a known sample rate.
///
/// Produced by the capture framer and consumed immediately by the encoder,
/// or produced by the decoder on the playback side.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz (16 000 for capture, 24 000 for playback).
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Returns the duration of this frame in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Transport-safe (base64) text holding little-endian 16-bit PCM.
///
/// Outbound chunks always hold exactly one capture frame. Inbound chunks are
/// whatever the provider delivered and need not be frame-aligned.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncodedChunk(String);

impl EncodedChunk {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Length of the encoded text in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for EncodedChunk {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl fmt::Display for EncodedChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Slices a continuous sample stream into fixed-size frames.
///
/// Samples are emitted in arrival order; a trailing partial frame stays
/// pending until enough samples arrive to complete it.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(frame_size: usize, sample_rate: u32) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            sample_rate,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Append samples and invoke `emit` once per completed frame.
    pub fn push(&mut self, mut samples: &[f32], mut emit: impl FnMut(AudioFrame)) {
        while !samples.is_empty() {
            let room = self.frame_size - self.pending.len();
            let take = room.min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == self.frame_size {
                let full = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
                emit(AudioFrame::new(full, self.sample_rate));
            }
        }
    }

    /// Number of samples waiting for the next frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Discard the partial frame.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
