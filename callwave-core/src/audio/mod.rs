//! Host audio seams and their cpal implementations.
//!
//! # Design constraints
//!
//! cpal data callbacks run on an OS audio thread at elevated priority. They
//! **must not** allocate per call, block on a contended lock, or perform I/O.
//! Capture writes into an SPSC ring producer through a scratch buffer sized
//! before the stream starts; playback pops from the speaker feed ring the
//! same way. Neither callback logs: dropped capture samples are counted in
//! an atomic and reported by the worker.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). Input streams are therefore opened on the capture worker thread
//! (see [`InputDevice::open`]) and output streams on a dedicated holder thread
//! owned by the sink. Both are dropped on the thread that created them.

pub mod device;
pub mod meter;
pub mod output;
pub mod resample;

#[cfg(feature = "audio-cpal")]
pub mod cpal_input;
#[cfg(feature = "audio-cpal")]
pub mod cpal_output;

use std::any::Any;
use std::sync::{atomic::AtomicBool, Arc};

use crate::{buffering::AudioProducer, error::Result};

pub use meter::LevelMeter;
pub use output::{output_stream, AudioSink, OutputClock, OutputDevice, OutputFeed, OutputRenderer};

#[cfg(feature = "audio-cpal")]
pub use cpal_input::CpalInputDevice;
#[cfg(feature = "audio-cpal")]
pub use cpal_output::CpalOutputDevice;

/// Host microphone primitive.
///
/// Implementations push mono f32 samples at their native rate into the
/// producer while `running` is set, and report that rate in the returned
/// [`InputStream`].
pub trait InputDevice: Send + Sync + 'static {
    /// Acquire the device exclusively and start streaming.
    ///
    /// Called on the capture worker thread; the returned handle is dropped on
    /// that same thread when capture stops, which releases the device.
    ///
    /// # Errors
    /// Device missing, permission denied, or stream construction failure.
    fn open(&self, producer: AudioProducer, running: Arc<AtomicBool>) -> Result<InputStream>;
}

/// Live input stream handle. Dropping it releases the device.
pub struct InputStream {
    /// Actual capture sample rate reported by the device (Hz).
    pub sample_rate: u32,
    _keepalive: Box<dyn Any>,
}

impl InputStream {
    pub fn new(sample_rate: u32, keepalive: Box<dyn Any>) -> Self {
        Self {
            sample_rate,
            _keepalive: keepalive,
        }
    }
}

impl std::fmt::Debug for InputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputStream")
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}
