//! PCM codec: f32 samples ⇄ 16-bit little-endian PCM ⇄ base64 text.
//!
//! Both directions are pure functions. Outbound frames are encoded on the
//! capture worker thread; inbound fragments are decoded on the session loop
//! right before scheduling.

use base64::{engine::general_purpose, Engine as _};

use crate::buffering::frame::{AudioFrame, EncodedChunk};
use crate::error::DecodeError;

/// Width of one PCM sample on the wire.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Divisor used when converting PCM back to float.
const DECODE_SCALE: f32 = 32768.0;

/// Convert one float sample to PCM.
///
/// Negative values scale by 0x8000 and non-negative by 0x7FFF so that both
/// ends of [-1.0, 1.0] stay representable.
#[inline]
pub fn sample_to_i16(sample: f32) -> i16 {
    let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    let scaled = if s < 0.0 {
        s * 32768.0
    } else {
        s * 32767.0
    };
    scaled.round() as i16
}

/// Serialize samples to raw little-endian PCM bytes.
pub fn samples_to_pcm(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for &s in samples {
        bytes.extend_from_slice(&sample_to_i16(s).to_le_bytes());
    }
    bytes
}

/// Reinterpret little-endian PCM bytes as float samples.
pub fn pcm_to_samples(bytes: &[u8]) -> Result<Vec<f32>, DecodeError> {
    if bytes.len() % BYTES_PER_SAMPLE != 0 {
        return Err(DecodeError::MisalignedLength { len: bytes.len() });
    }
    Ok(bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / DECODE_SCALE)
        .collect())
}

/// Encode a frame for transmission. Deterministic and infallible.
pub fn encode(samples: &[f32]) -> EncodedChunk {
    EncodedChunk::new(general_purpose::STANDARD.encode(samples_to_pcm(samples)))
}

/// Decode a transport chunk into a frame at `sample_rate`.
///
/// # Errors
/// `DecodeError::InvalidBase64` for malformed text and
/// `DecodeError::MisalignedLength` when the payload ends mid-sample.
pub fn decode(chunk: &EncodedChunk, sample_rate: u32) -> Result<AudioFrame, DecodeError> {
    let bytes = general_purpose::STANDARD.decode(chunk.as_str())?;
    let samples = pcm_to_samples(&bytes)?;
    Ok(AudioFrame::new(samples, sample_rate))
}
