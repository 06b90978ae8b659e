#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use callwave_core::audio::{InputDevice, InputStream};
use callwave_core::buffering::{AudioProducer, Producer};
use callwave_core::{
    audio::{AudioSink, LevelMeter, OutputDevice},
    buffering::frame::AudioFrame,
    CallError, CallSession, Connector, InboundEvent, InboundSink, OutboundMessage, RemoteStream,
    Sentiment, SentimentService, SessionConfig, SessionServices,
};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;

pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

pub const WAIT: Duration = Duration::from_secs(3);

pub fn fast_config() -> SessionConfig {
    SessionConfig {
        ring_delay: Duration::from_millis(20),
        ..SessionConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Microphone
// ---------------------------------------------------------------------------

/// Delivers a fixed block of 16 kHz samples as soon as it is opened.
pub struct ScriptedMic {
    samples: Vec<f32>,
    pub opens: AtomicUsize,
}

impl ScriptedMic {
    pub fn silent() -> Self {
        Self::with_samples(Vec::new())
    }

    pub fn with_samples(samples: Vec<f32>) -> Self {
        Self {
            samples,
            opens: AtomicUsize::new(0),
        }
    }
}

impl InputDevice for ScriptedMic {
    fn open(&self, mut producer: AudioProducer, _running: Arc<AtomicBool>) -> callwave_core::error::Result<InputStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        producer.push_slice(&self.samples);
        Ok(InputStream::new(16_000, Box::new(producer)))
    }
}

pub struct DeniedMic;

impl InputDevice for DeniedMic {
    fn open(&self, _producer: AudioProducer, _running: Arc<AtomicBool>) -> callwave_core::error::Result<InputStream> {
        Err(CallError::AudioDevice("microphone permission denied".into()))
    }
}

// ---------------------------------------------------------------------------
// Speaker
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSink {
    pub scheduled: Mutex<Vec<(f64, usize)>>,
    pub halts: AtomicUsize,
    pub closes: AtomicUsize,
}

impl AudioSink for RecordingSink {
    fn current_time(&self) -> f64 {
        0.0
    }

    fn schedule(&self, start_time: f64, frame: AudioFrame) {
        self.scheduled.lock().push((start_time, frame.len()));
    }

    fn halt(&self) {
        self.halts.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingSpeaker {
    pub sink: Arc<RecordingSink>,
    pub opens: AtomicUsize,
}

impl OutputDevice for RecordingSpeaker {
    fn open(&self, _meter: Arc<LevelMeter>) -> callwave_core::error::Result<Arc<dyn AudioSink>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(self.sink.clone())
    }
}

// ---------------------------------------------------------------------------
// Remote
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    Accept,
    Reject(String),
}

#[derive(Default)]
pub struct StreamLog {
    pub sent: Mutex<Vec<OutboundMessage>>,
    pub closes: AtomicUsize,
}

impl StreamLog {
    pub fn sent_audio(&self) -> Vec<callwave_core::buffering::frame::EncodedChunk> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| match m {
                OutboundMessage::Audio(chunk) => Some(chunk.clone()),
                OutboundMessage::Text(_) => None,
            })
            .collect()
    }
}

struct ScriptedStream {
    log: Arc<StreamLog>,
    closed: bool,
}

impl RemoteStream for ScriptedStream {
    fn send(&mut self, message: OutboundMessage) -> callwave_core::error::Result<()> {
        if self.closed {
            return Err(CallError::Connection("stream closed".into()));
        }
        self.log.sent.lock().push(message);
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.log.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Connector whose outcome, timing and inbound traffic the test controls.
pub struct ScriptedConnector {
    outcome: ConnectOutcome,
    gate: Mutex<Option<Receiver<()>>>,
    pub attempts: Mutex<Vec<Instant>>,
    pub completed: AtomicUsize,
    sink: Mutex<Option<InboundSink>>,
    pub streams: Mutex<Vec<Arc<StreamLog>>>,
}

impl ScriptedConnector {
    pub fn new(outcome: ConnectOutcome) -> Self {
        Self {
            outcome,
            gate: Mutex::new(None),
            attempts: Mutex::new(Vec::new()),
            completed: AtomicUsize::new(0),
            sink: Mutex::new(None),
            streams: Mutex::new(Vec::new()),
        }
    }

    pub fn accepting() -> Self {
        Self::new(ConnectOutcome::Accept)
    }

    /// The next `connect` blocks until the returned sender fires.
    pub fn gated(outcome: ConnectOutcome) -> (Self, crossbeam_channel::Sender<()>) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let connector = Self::new(outcome);
        *connector.gate.lock() = Some(rx);
        (connector, tx)
    }

    /// Push an event as if the remote had sent it.
    pub fn emit(&self, event: InboundEvent) -> bool {
        match self.sink.lock().as_ref() {
            Some(sink) => sink.emit(event),
            None => false,
        }
    }

    pub fn stream(&self, index: usize) -> Arc<StreamLog> {
        Arc::clone(&self.streams.lock()[index])
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, inbound: InboundSink) -> callwave_core::error::Result<Box<dyn RemoteStream>> {
        self.attempts.lock().push(Instant::now());
        // The remote may speak before the handshake returns.
        *self.sink.lock() = Some(inbound);
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }

        let result: callwave_core::error::Result<Box<dyn RemoteStream>> = match &self.outcome {
            ConnectOutcome::Accept => {
                let log = Arc::new(StreamLog::default());
                self.streams.lock().push(Arc::clone(&log));
                Ok(Box::new(ScriptedStream { log, closed: false }))
            }
            ConnectOutcome::Reject(reason) => Err(CallError::Connection(reason.clone())),
        };
        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }
}

// ---------------------------------------------------------------------------
// Sentiment
// ---------------------------------------------------------------------------

/// Answers by text prefix after a per-rule delay.
pub struct ScriptedSentiment {
    rules: Vec<(&'static str, Duration, Sentiment)>,
    pub calls: AtomicUsize,
}

impl ScriptedSentiment {
    pub fn new(rules: Vec<(&'static str, Duration, Sentiment)>) -> Self {
        Self {
            rules,
            calls: AtomicUsize::new(0),
        }
    }
}

impl SentimentService for ScriptedSentiment {
    fn analyze(&self, text: &str) -> callwave_core::error::Result<Sentiment> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for (prefix, delay, label) in &self.rules {
            if text.starts_with(prefix) {
                thread::sleep(*delay);
                return Ok(*label);
            }
        }
        Err(CallError::Sentiment("no rule".into()))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub session: CallSession,
    pub connector: Arc<ScriptedConnector>,
    pub speaker: Arc<RecordingSpeaker>,
}

pub fn harness(
    config: SessionConfig,
    connector: ScriptedConnector,
    input: Arc<dyn InputDevice>,
    sentiment: Option<Arc<dyn SentimentService>>,
) -> Harness {
    let connector = Arc::new(connector);
    let speaker = Arc::new(RecordingSpeaker::default());
    let session = CallSession::new(
        config,
        SessionServices {
            connector: connector.clone(),
            input,
            output: speaker.clone(),
            sentiment,
        },
    )
    .expect("spawn session");
    Harness {
        session,
        connector,
        speaker,
    }
}

/// Harness with a silent mic and no sentiment, already connected.
pub fn connected() -> Harness {
    let h = harness(
        fast_config(),
        ScriptedConnector::accepting(),
        Arc::new(ScriptedMic::silent()),
        None,
    );
    h.session.start_session().expect("start");
    assert!(wait_for(WAIT, || h.session.state().is_connected()));
    h
}
