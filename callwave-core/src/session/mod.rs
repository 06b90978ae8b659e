//! `CallSession`: the top-level call lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! CallSession::new()
//!     └─► start_session()   → ringing for `ring_delay`, then connecting
//!         ├─► accepted      → speaker + microphone open, listening
//!         │     └─► remote audio ⇄ speaking / listening
//!         └─► end_session() → everything released, idle
//! ```
//!
//! `start_session()` is rejected unless idle. `end_session()` is idempotent
//! and returns only after the devices and the remote stream are released.
//!
//! ## Threading
//!
//! A dedicated loop thread owns the call (see `controller.rs`). Public
//! methods either post a message and wait for its reply, or read the
//! shared snapshot, so `CallSession` is `Send + Sync`.

mod controller;
pub mod diagnostics;
pub mod state;
pub mod tags;
pub mod transcript;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Sender};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::{
    audio::{meter::DEFAULT_METER_SIZE, InputDevice, LevelMeter, OutputDevice},
    error::{CallError, Result},
    events::{CallStateEvent, SentimentEvent, TranscriptEvent},
    pipeline::{CaptureConfig, PlaybackConfig},
    sentiment::{Sentiment, SentimentService},
    transport::Connector,
};
use controller::{Controller, LoopMsg};
use diagnostics::{DiagnosticsSnapshot, PipelineStatus, SessionDiagnostics};
use state::CallState;
use transcript::Transcript;

/// Broadcast channel capacity: 256 events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Configuration for [`CallSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Simulated ringing before the connection attempt. Default: 2 s.
    pub ring_delay: Duration,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
    /// FFT window of the input and output level meters. Default: 256.
    pub meter_size: usize,
    /// Text fragments shorter than this (trimmed, in chars) are not sent
    /// for sentiment. Default: 5.
    pub min_sentiment_chars: usize,
    /// Text turn sent as soon as the call connects, prompting the remote
    /// to speak first.
    pub greeting: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ring_delay: Duration::from_secs(2),
            capture: CaptureConfig::default(),
            playback: PlaybackConfig::default(),
            meter_size: DEFAULT_METER_SIZE,
            min_sentiment_chars: 5,
            greeting: None,
        }
    }
}

/// External collaborators of a session.
#[derive(Clone)]
pub struct SessionServices {
    pub connector: Arc<dyn Connector>,
    pub input: Arc<dyn InputDevice>,
    pub output: Arc<dyn OutputDevice>,
    /// `None` disables the sentiment side-channel.
    pub sentiment: Option<Arc<dyn SentimentService>>,
}

/// Read-mostly call snapshot, written only by the loop thread.
#[derive(Debug, Default)]
pub(crate) struct SessionView {
    pub(crate) state: CallState,
    pub(crate) call_id: u64,
    pub(crate) language: Option<String>,
    pub(crate) sentiment: Option<Sentiment>,
    pub(crate) transcript: Transcript,
}

pub(crate) struct SessionShared {
    pub(crate) view: Mutex<SessionView>,
    /// Id of the call currently holding resources; 0 when none.
    pub(crate) active_call: AtomicU64,
    pub(crate) state_tx: broadcast::Sender<CallStateEvent>,
    pub(crate) transcript_tx: broadcast::Sender<TranscriptEvent>,
    pub(crate) sentiment_tx: broadcast::Sender<SentimentEvent>,
    pub(crate) diagnostics: SessionDiagnostics,
    pub(crate) input_meter: Arc<LevelMeter>,
    pub(crate) output_meter: Arc<LevelMeter>,
    pub(crate) capture_running: AtomicBool,
    pub(crate) playback_open: AtomicBool,
}

/// The top-level call handle.
pub struct CallSession {
    tx: Sender<LoopMsg>,
    shared: Arc<SessionShared>,
    worker: Option<JoinHandle<()>>,
}

impl CallSession {
    /// Spawn the session loop. No device or connection is touched until
    /// [`start_session`](Self::start_session).
    ///
    /// # Errors
    /// `CallError::Io` if the loop thread cannot be spawned.
    pub fn new(config: SessionConfig, services: SessionServices) -> Result<Self> {
        let (state_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (transcript_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (sentiment_tx, _) = broadcast::channel(BROADCAST_CAP);

        let shared = Arc::new(SessionShared {
            view: Mutex::new(SessionView::default()),
            active_call: AtomicU64::new(0),
            state_tx,
            transcript_tx,
            sentiment_tx,
            diagnostics: SessionDiagnostics::default(),
            input_meter: Arc::new(LevelMeter::new(config.meter_size)),
            output_meter: Arc::new(LevelMeter::new(config.meter_size)),
            capture_running: AtomicBool::new(false),
            playback_open: AtomicBool::new(false),
        });

        let (tx, rx) = unbounded();
        let controller = Controller::new(config, services, Arc::clone(&shared), tx.clone());
        let worker = thread::Builder::new()
            .name("callwave-session".into())
            .spawn(move || controller.run(rx))?;

        Ok(Self {
            tx,
            shared,
            worker: Some(worker),
        })
    }

    /// Begin a call: idle → ringing, then connecting once the ring delay
    /// elapses. Returns the new call id.
    ///
    /// # Errors
    /// `CallError::AlreadyActive` unless the session is idle.
    pub fn start_session(&self) -> Result<u64> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(LoopMsg::Start { reply: reply_tx })
            .map_err(|_| loop_stopped())?;
        reply_rx.recv().map_err(|_| loop_stopped())?
    }

    /// End the current call and release everything it holds. No-op when idle.
    pub fn end_session(&self) {
        let (reply_tx, reply_rx) = bounded(1);
        if self.tx.send(LoopMsg::End { reply: reply_tx }).is_ok() {
            let _ = reply_rx.recv();
        }
    }

    /// Send a typed user turn on the connected call.
    ///
    /// # Errors
    /// `CallError::NotRunning` unless listening or speaking.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(LoopMsg::SendText {
                text: text.into(),
                reply: reply_tx,
            })
            .map_err(|_| loop_stopped())?;
        reply_rx.recv().map_err(|_| loop_stopped())?
    }

    pub fn state(&self) -> CallState {
        self.shared.view.lock().state
    }

    /// Id of the current (or most recent) call; 0 before the first call.
    pub fn call_id(&self) -> u64 {
        self.shared.view.lock().call_id
    }

    /// Last language announced by the remote during this call.
    pub fn detected_language(&self) -> Option<String> {
        self.shared.view.lock().language.clone()
    }

    pub fn current_sentiment(&self) -> Option<Sentiment> {
        self.shared.view.lock().sentiment
    }

    pub fn transcript(&self) -> String {
        self.shared.view.lock().transcript.as_str().to_string()
    }

    /// Microphone level in [0, 1]; 0 when not capturing.
    pub fn input_volume(&self) -> f32 {
        if !self.shared.capture_running.load(Ordering::SeqCst) {
            return 0.0;
        }
        self.shared.input_meter.level()
    }

    /// Speaker level in [0, 1]; 0 when playback is closed.
    pub fn output_volume(&self) -> f32 {
        if !self.shared.playback_open.load(Ordering::SeqCst) {
            return 0.0;
        }
        self.shared.output_meter.level()
    }

    pub fn pipeline_status(&self) -> PipelineStatus {
        PipelineStatus {
            capture_running: self.shared.capture_running.load(Ordering::SeqCst),
            playback_open: self.shared.playback_open.load(Ordering::SeqCst),
        }
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.shared.diagnostics.snapshot()
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<CallStateEvent> {
        self.shared.state_tx.subscribe()
    }

    pub fn subscribe_transcripts(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.shared.transcript_tx.subscribe()
    }

    pub fn subscribe_sentiment(&self) -> broadcast::Receiver<SentimentEvent> {
        self.shared.sentiment_tx.subscribe()
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        let _ = self.tx.send(LoopMsg::Shutdown);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("session loop panicked");
            }
            info!("call session shut down");
        }
    }
}

fn loop_stopped() -> CallError {
    CallError::Other(anyhow::anyhow!("session loop has stopped"))
}
