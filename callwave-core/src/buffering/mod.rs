//! Lock-free SPSC ring buffers for audio samples.
//!
//! Uses `ringbuf::HeapRb<f32>` which provides a wait-free `push_slice` and
//! `pop_slice` safe to call from the real-time audio callbacks: microphone
//! capture, the speaker feed, and the rendered-output tap that feeds the
//! level meter.

pub mod frame;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half of a sample ring.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half of a sample ring.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Capture capacity: 2^18 = 262 144 f32 samples ≈ 5.4 s at 48 kHz.
/// The capture worker drains every few milliseconds, so this only has to
/// absorb scheduling hiccups, not long utterances.
pub const CAPTURE_RING_CAPACITY: usize = 1 << 18;

/// Output tap capacity: enough for ~340 ms at 48 kHz. Older samples are
/// simply not pushed when the meter falls behind.
pub const TAP_RING_CAPACITY: usize = 1 << 14;

/// Seconds of device-rate audio the speaker feed can hold. The remote
/// usually streams speech faster than real time.
pub const OUTPUT_RING_SECONDS: usize = 60;

/// Create a matched producer/consumer pair for microphone samples.
pub fn create_capture_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(CAPTURE_RING_CAPACITY).split()
}

/// Create a matched producer/consumer pair for the playback level tap.
pub fn create_tap_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(TAP_RING_CAPACITY).split()
}

/// Create the speaker feed ring for a device running at `device_rate`.
pub fn create_output_ring(device_rate: u32) -> (AudioProducer, AudioConsumer) {
    let capacity = (device_rate as usize * OUTPUT_RING_SECONDS).max(TAP_RING_CAPACITY);
    HeapRb::<f32>::new(capacity).split()
}
