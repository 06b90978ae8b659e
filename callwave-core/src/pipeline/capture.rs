//! Capture pipeline: microphone → ring → resample → frame → encode → callback.
//!
//! ## Stages (per worker iteration)
//!
//! ```text
//! 1. Drain the SPSC ring (device-rate mono f32)
//! 2. Resample to the capture rate (16 kHz)
//! 3. Slice into fixed frames (2048 samples)
//! 4. Per frame: update the level meter, encode, invoke on_frame
//! ```
//!
//! The worker thread also opens the input device, because `cpal::Stream`
//! cannot leave the thread that created it. `start()` blocks until that open
//! succeeds or fails.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info};

use crate::{
    audio::{meter::LevelMeter, resample::RateConverter, InputDevice},
    buffering::{create_capture_ring, frame::EncodedChunk, frame::FrameAssembler, Consumer},
    codec,
    error::{CallError, Result},
};

/// Samples drained from the ring per iteration; also the resampler chunk.
const DRAIN_CHUNK: usize = 960;

/// Sleep when the ring is empty (avoids busy-wait burning a core).
const SLEEP_EMPTY: Duration = Duration::from_millis(5);

/// Configuration for [`CapturePipeline`].
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Rate frames are delivered at (Hz). Default: 16000.
    pub sample_rate: u32,
    /// Samples per frame. Default: 2048 (128 ms at 16 kHz).
    pub frame_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_size: 2048,
        }
    }
}

/// Callback receiving encoded frames in capture order.
pub type FrameCallback = Box<dyn FnMut(EncodedChunk) + Send + 'static>;

pub struct CapturePipeline {
    config: CaptureConfig,
    device: Arc<dyn InputDevice>,
    meter: Arc<LevelMeter>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CapturePipeline {
    pub fn new(config: CaptureConfig, device: Arc<dyn InputDevice>, meter: Arc<LevelMeter>) -> Self {
        Self {
            config,
            device,
            meter,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Open the microphone and begin delivering frames to `on_frame`.
    ///
    /// Blocks until the device is confirmed open.
    ///
    /// # Errors
    /// - `CallError::AlreadyActive` if capture is already running.
    /// - Device errors from [`InputDevice::open`], or an unusable device
    ///   rate; nothing is left running.
    pub fn start(&mut self, on_frame: FrameCallback) -> Result<()> {
        if self.worker.is_some() {
            return Err(CallError::AlreadyActive);
        }

        let (producer, consumer) = create_capture_ring();
        self.running.store(true, Ordering::SeqCst);

        let device = Arc::clone(&self.device);
        let running = Arc::clone(&self.running);
        let meter = Arc::clone(&self.meter);
        let config = self.config.clone();

        // Sync oneshot: the worker reports device open success/failure.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

        let handle = thread::Builder::new()
            .name("callwave-capture".into())
            .spawn(move || {
                let opened = device.open(producer, Arc::clone(&running)).and_then(|stream| {
                    let resampler =
                        RateConverter::new(stream.sample_rate, config.sample_rate, DRAIN_CHUNK)?;
                    Ok((stream, resampler))
                });
                let (stream, resampler) = match opened {
                    Ok(opened) => {
                        let _ = open_tx.send(Ok(opened.0.sample_rate));
                        opened
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        running.store(false, Ordering::SeqCst);
                        return;
                    }
                };

                run_worker(WorkerContext {
                    config,
                    consumer,
                    running,
                    meter,
                    on_frame,
                    resampler,
                });

                // Stream drops here, releasing the microphone on this thread.
                drop(stream);
            })?;

        match open_rx.recv() {
            Ok(Ok(device_rate)) => {
                info!(device_rate, target_rate = self.config.sample_rate, "capture started");
                self.worker = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(CallError::Other(anyhow::anyhow!(
                    "capture worker died before opening the device"
                )))
            }
        }
    }

    /// Release the microphone. Safe to call repeatedly or before `start`.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("capture worker panicked");
            }
            info!("capture stopped");
        }
        self.meter.reset();
    }

    /// Current input level; 0.0 when not capturing.
    pub fn volume(&self) -> f32 {
        self.meter.level()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

struct WorkerContext {
    config: CaptureConfig,
    consumer: crate::buffering::AudioConsumer,
    running: Arc<AtomicBool>,
    meter: Arc<LevelMeter>,
    on_frame: FrameCallback,
    resampler: RateConverter,
}

fn run_worker(mut ctx: WorkerContext) {
    let mut assembler = FrameAssembler::new(ctx.config.frame_size, ctx.config.sample_rate);
    let mut raw = vec![0f32; DRAIN_CHUNK];
    let mut converted = Vec::with_capacity(DRAIN_CHUNK);
    let mut frames_out = 0u64;

    while ctx.running.load(Ordering::Relaxed) {
        let n = ctx.consumer.pop_slice(&mut raw);
        if n == 0 {
            thread::sleep(SLEEP_EMPTY);
            continue;
        }

        converted.clear();
        ctx.resampler.process_into(&raw[..n], &mut converted);

        let meter = &ctx.meter;
        let on_frame = &mut ctx.on_frame;
        assembler.push(&converted, |frame| {
            meter.update(&frame.samples);
            on_frame(codec::encode(&frame.samples));
            frames_out += 1;
        });
    }

    debug!(frames_out, dropped_tail = assembler.pending(), "capture worker exiting");
}
