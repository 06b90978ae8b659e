//! The session loop.
//!
//! One thread owns all call resources (pipelines, remote stream, state) and
//! processes [`LoopMsg`]s in arrival order. Every other thread (connect
//! attempts, capture worker, transport reader, sentiment requests) only
//! posts messages tagged with the call id they belong to; anything tagged
//! with a stale id is discarded here.

use std::sync::{atomic::Ordering, Arc};
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use super::{
    diagnostics::SessionDiagnostics,
    state::{CallState, CallTrigger},
    tags, SessionConfig, SessionServices, SessionShared,
};
use crate::{
    buffering::frame::EncodedChunk,
    error::{CallError, ErrorKind, Result},
    events::{CallStateEvent, SentimentEvent, TranscriptEvent},
    pipeline::{CapturePipeline, PlaybackPipeline},
    sentiment::Sentiment,
    transport::{InboundEvent, InboundSink, OutboundMessage, RemoteStream, Speaker},
};

pub(crate) enum LoopMsg {
    Start {
        reply: Sender<Result<u64>>,
    },
    End {
        reply: Sender<()>,
    },
    SendText {
        text: String,
        reply: Sender<Result<()>>,
    },
    Shutdown,
    Connected {
        call_id: u64,
        result: Result<Box<dyn RemoteStream>>,
    },
    Inbound {
        call_id: u64,
        event: InboundEvent,
    },
    Frame {
        call_id: u64,
        chunk: EncodedChunk,
    },
    Sentiment {
        call_id: u64,
        seq: u64,
        result: Result<Sentiment>,
    },
}

pub(crate) struct Controller {
    config: SessionConfig,
    services: SessionServices,
    shared: Arc<SessionShared>,
    tx: Sender<LoopMsg>,
    state: CallState,
    call_id: u64,
    ring_deadline: Option<Instant>,
    link: Option<Box<dyn RemoteStream>>,
    capture: CapturePipeline,
    playback: PlaybackPipeline,
    /// Events that raced ahead of the connect result.
    early_events: Vec<InboundEvent>,
    sentiment_seq: u64,
}

impl Controller {
    pub(crate) fn new(
        config: SessionConfig,
        services: SessionServices,
        shared: Arc<SessionShared>,
        tx: Sender<LoopMsg>,
    ) -> Self {
        let capture = CapturePipeline::new(
            config.capture.clone(),
            Arc::clone(&services.input),
            Arc::clone(&shared.input_meter),
        );
        let playback = PlaybackPipeline::new(
            config.playback.clone(),
            Arc::clone(&services.output),
            Arc::clone(&shared.output_meter),
        );
        Self {
            config,
            services,
            shared,
            tx,
            state: CallState::Idle,
            call_id: 0,
            ring_deadline: None,
            link: None,
            capture,
            playback,
            early_events: Vec::new(),
            sentiment_seq: 0,
        }
    }

    pub(crate) fn run(mut self, rx: Receiver<LoopMsg>) {
        debug!("session loop started");
        loop {
            let msg = match self.ring_deadline {
                Some(deadline) => match rx.recv_deadline(deadline) {
                    Ok(msg) => msg,
                    Err(RecvTimeoutError::Timeout) => {
                        self.on_ring_elapsed();
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match rx.recv() {
                    Ok(msg) => msg,
                    Err(_) => break,
                },
            };
            if !self.dispatch(msg) {
                break;
            }
        }

        if !self.state.is_idle() {
            self.teardown(CallTrigger::End, Some("session closed".into()));
        }
        debug!("session loop exiting");
    }

    /// Returns `false` when the loop should exit.
    fn dispatch(&mut self, msg: LoopMsg) -> bool {
        match msg {
            LoopMsg::Start { reply } => {
                let _ = reply.send(self.on_start());
            }
            LoopMsg::End { reply } => {
                self.on_end();
                let _ = reply.send(());
            }
            LoopMsg::SendText { text, reply } => {
                let _ = reply.send(self.on_send_text(text));
            }
            LoopMsg::Shutdown => return false,
            LoopMsg::Connected { call_id, result } => self.on_connected(call_id, result),
            LoopMsg::Inbound { call_id, event } => self.on_inbound(call_id, event),
            LoopMsg::Frame { call_id, chunk } => self.on_frame(call_id, chunk),
            LoopMsg::Sentiment {
                call_id,
                seq,
                result,
            } => self.on_sentiment(call_id, seq, result),
        }
        true
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    fn on_start(&mut self) -> Result<u64> {
        if !self.state.is_idle() {
            return Err(CallError::AlreadyActive);
        }

        self.call_id += 1;
        self.sentiment_seq = 0;
        {
            let mut view = self.shared.view.lock();
            view.call_id = self.call_id;
            view.language = None;
            view.sentiment = None;
            view.transcript.clear();
        }
        self.shared.active_call.store(self.call_id, Ordering::SeqCst);
        SessionDiagnostics::bump(&self.shared.diagnostics.calls_started);

        self.fire(CallTrigger::Start, None);
        self.ring_deadline = Some(Instant::now() + self.config.ring_delay);
        info!(call_id = self.call_id, ring_delay_ms = self.config.ring_delay.as_millis() as u64, "call started");
        Ok(self.call_id)
    }

    fn on_ring_elapsed(&mut self) {
        self.ring_deadline = None;
        if !self.fire(CallTrigger::RingElapsed, None) {
            return;
        }

        let call_id = self.call_id;
        let connector = Arc::clone(&self.services.connector);
        let shared = Arc::clone(&self.shared);
        let inbound_tx = self.tx.clone();
        let inbound = InboundSink::new(move |event| {
            shared.active_call.load(Ordering::SeqCst) == call_id
                && inbound_tx.send(LoopMsg::Inbound { call_id, event }).is_ok()
        });
        let done_tx = self.tx.clone();

        let spawned = thread::Builder::new()
            .name("callwave-connect".into())
            .spawn(move || {
                let result = connector.connect(inbound);
                let _ = done_tx.send(LoopMsg::Connected { call_id, result });
            });

        if let Err(e) = spawned {
            error!("failed to spawn connect thread: {e}");
            SessionDiagnostics::bump(&self.shared.diagnostics.connection_failures);
            self.teardown(CallTrigger::Rejected, Some(e.to_string()));
        }
    }

    fn on_connected(&mut self, call_id: u64, result: Result<Box<dyn RemoteStream>>) {
        if call_id != self.call_id || self.state != CallState::Connecting {
            if let Ok(mut link) = result {
                info!(call_id, "closing connection that completed after its call ended");
                link.close();
            }
            return;
        }

        let link = match result {
            Ok(link) => link,
            Err(e) => {
                warn!(call_id, "connection failed: {e}");
                self.fail_call(CallTrigger::Rejected, &e);
                return;
            }
        };
        self.link = Some(link);

        if let Err(e) = self.playback.open() {
            error!(call_id, "failed to open speaker: {e}");
            self.fail_call(CallTrigger::Rejected, &e);
            return;
        }
        self.shared.playback_open.store(true, Ordering::SeqCst);

        let frame_tx = self.tx.clone();
        let on_frame = Box::new(move |chunk: EncodedChunk| {
            let _ = frame_tx.send(LoopMsg::Frame { call_id, chunk });
        });
        if let Err(e) = self.capture.start(on_frame) {
            error!(call_id, "failed to open microphone: {e}");
            self.fail_call(CallTrigger::Rejected, &e);
            return;
        }
        self.shared.capture_running.store(true, Ordering::SeqCst);

        self.fire(CallTrigger::Accepted, None);

        if let Some(greeting) = self.config.greeting.clone() {
            if self.send_outbound(OutboundMessage::Text(greeting)).is_err() {
                return;
            }
        }

        for event in std::mem::take(&mut self.early_events) {
            self.on_inbound(call_id, event);
        }
    }

    fn on_end(&mut self) {
        if self.state.is_idle() {
            return;
        }
        info!(call_id = self.call_id, state = %self.state, "call ended locally");
        self.teardown(CallTrigger::End, None);
    }

    /// Terminal failure: count it by kind, then return to idle.
    fn fail_call(&mut self, trigger: CallTrigger, err: &CallError) {
        if err.kind() == ErrorKind::Connection {
            SessionDiagnostics::bump(&self.shared.diagnostics.connection_failures);
        }
        self.teardown(trigger, Some(err.to_string()));
    }

    /// Release everything the call holds, then apply `trigger`.
    fn teardown(&mut self, trigger: CallTrigger, detail: Option<String>) {
        self.shared.active_call.store(0, Ordering::SeqCst);
        self.ring_deadline = None;
        self.early_events.clear();

        if let Some(mut link) = self.link.take() {
            link.close();
        }
        self.capture.stop();
        self.shared.capture_running.store(false, Ordering::SeqCst);
        self.playback.close();
        self.shared.playback_open.store(false, Ordering::SeqCst);

        self.shared.view.lock().transcript.end_turn();
        self.fire(trigger, detail);
    }

    // ── Remote → local ───────────────────────────────────────────────────────

    fn on_inbound(&mut self, call_id: u64, event: InboundEvent) {
        if call_id != self.call_id || self.state.is_idle() {
            debug!(call_id, "discarding inbound event for inactive call");
            return;
        }

        match event {
            InboundEvent::Error(message) => {
                warn!(call_id, "remote error: {message}");
                SessionDiagnostics::bump(&self.shared.diagnostics.connection_failures);
                self.teardown(CallTrigger::End, Some(message));
            }
            InboundEvent::Closed => {
                info!(call_id, "remote closed the call");
                self.teardown(CallTrigger::End, Some("remote closed".into()));
            }
            event if self.state == CallState::Connecting => {
                self.early_events.push(event);
            }
            InboundEvent::Audio(chunk) => {
                self.fire(CallTrigger::AudioArrived, None);
                match self.playback.play_chunk(&chunk) {
                    Ok(_) => SessionDiagnostics::bump(&self.shared.diagnostics.fragments_played),
                    Err(e) if e.kind() == ErrorKind::Decode => {
                        SessionDiagnostics::bump(&self.shared.diagnostics.fragments_dropped);
                        warn!(call_id, "dropping inbound audio fragment: {e}");
                    }
                    Err(e) if e.is_fatal_to_call() => {
                        error!(call_id, "playback failed: {e}");
                        self.fail_call(CallTrigger::End, &e);
                    }
                    Err(e) => {
                        SessionDiagnostics::bump(&self.shared.diagnostics.fragments_dropped);
                        debug!(call_id, "fragment not played: {e}");
                    }
                }
            }
            InboundEvent::Text { speaker, text } => self.on_text(speaker, &text),
            InboundEvent::Interrupted => {
                self.playback.stop();
                SessionDiagnostics::bump(&self.shared.diagnostics.interruptions);
                debug!(call_id, "playback interrupted");
                self.fire(CallTrigger::Interrupted, None);
            }
            InboundEvent::TurnComplete => {
                self.playback.finish_turn();
                self.shared.view.lock().transcript.end_turn();
                self.fire(CallTrigger::TurnComplete, None);
            }
        }
    }

    fn on_text(&mut self, speaker: Speaker, text: &str) {
        let tagged = tags::strip_language_tag(text);
        let content = tagged.content;

        {
            let mut view = self.shared.view.lock();
            if let Some(code) = tagged.language {
                if view.language.as_deref() != Some(code) {
                    info!(call_id = self.call_id, language = code, "language detected");
                }
                view.language = Some(code.to_string());
            }
            if content.is_empty() {
                return;
            }
            view.transcript.push(speaker, content);
            let _ = self.shared.transcript_tx.send(TranscriptEvent {
                call_id: self.call_id,
                speaker,
                text: content.to_string(),
                language: view.language.clone(),
            });
        }

        let trimmed = content.trim();
        if trimmed.chars().count() >= self.config.min_sentiment_chars {
            self.request_sentiment(trimmed.to_string());
        }
    }

    fn request_sentiment(&mut self, text: String) {
        let Some(service) = self.services.sentiment.clone() else {
            return;
        };

        self.sentiment_seq += 1;
        let seq = self.sentiment_seq;
        let call_id = self.call_id;
        let tx = self.tx.clone();
        SessionDiagnostics::bump(&self.shared.diagnostics.sentiment_requests);

        let spawned = thread::Builder::new()
            .name("callwave-sentiment".into())
            .spawn(move || {
                let result = service.analyze(&text);
                let _ = tx.send(LoopMsg::Sentiment { call_id, seq, result });
            });
        if let Err(e) = spawned {
            SessionDiagnostics::bump(&self.shared.diagnostics.sentiment_failures);
            warn!("failed to spawn sentiment request: {e}");
        }
    }

    fn on_sentiment(&mut self, call_id: u64, seq: u64, result: Result<Sentiment>) {
        if call_id != self.call_id {
            debug!(call_id, seq, "discarding sentiment from a previous call");
            return;
        }
        match result {
            Ok(label) => {
                self.shared.view.lock().sentiment = Some(label);
                debug!(call_id, seq, label = %label, "sentiment updated");
                let _ = self
                    .shared
                    .sentiment_tx
                    .send(SentimentEvent { call_id, seq, label });
            }
            Err(e) => {
                SessionDiagnostics::bump(&self.shared.diagnostics.sentiment_failures);
                debug!(call_id, seq, "sentiment request failed: {e}");
            }
        }
    }

    // ── Local → remote ───────────────────────────────────────────────────────

    fn on_frame(&mut self, call_id: u64, chunk: EncodedChunk) {
        if call_id != self.call_id || !self.state.is_connected() {
            return;
        }
        if self.send_outbound(OutboundMessage::Audio(chunk)).is_ok() {
            SessionDiagnostics::bump(&self.shared.diagnostics.frames_sent);
        }
    }

    fn on_send_text(&mut self, text: String) -> Result<()> {
        if !self.state.is_connected() {
            return Err(CallError::NotRunning);
        }
        self.send_outbound(OutboundMessage::Text(text.clone()))?;
        self.on_text(Speaker::User, &text);
        self.shared.view.lock().transcript.end_turn();
        Ok(())
    }

    /// A failed send means the stream is gone, which ends the call.
    fn send_outbound(&mut self, message: OutboundMessage) -> Result<()> {
        let Some(link) = self.link.as_mut() else {
            return Err(CallError::NotRunning);
        };
        if let Err(e) = link.send(message) {
            warn!(call_id = self.call_id, "send failed: {e}");
            self.fail_call(CallTrigger::End, &e);
            return Err(e);
        }
        Ok(())
    }

    // ── State ────────────────────────────────────────────────────────────────

    /// Apply `trigger`; returns `false` if it does not apply in this state.
    fn fire(&mut self, trigger: CallTrigger, detail: Option<String>) -> bool {
        let Some(next) = self.state.next(trigger) else {
            debug!(state = %self.state, ?trigger, "transition ignored");
            return false;
        };
        if next != self.state {
            self.state = next;
            info!(call_id = self.call_id, state = %next, "call state changed");
            // Publish under the view lock so readers never see a state
            // whose event has not been sent yet.
            let mut view = self.shared.view.lock();
            view.state = next;
            let _ = self.shared.state_tx.send(CallStateEvent {
                call_id: self.call_id,
                state: next,
                detail,
            });
        }
        true
    }
}
