mod common;

use std::sync::{atomic::Ordering, Arc};
use std::thread;
use std::time::{Duration, Instant};

use callwave_core::{
    codec, CallError, CallState, InboundEvent, OutboundMessage, Sentiment, SessionConfig, Speaker,
};
use common::*;
use tokio::sync::broadcast::error::TryRecvError;

fn drain_states(rx: &mut tokio::sync::broadcast::Receiver<callwave_core::CallStateEvent>) -> Vec<CallState> {
    let mut states = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => states.push(event.state),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    states
}

fn speech_chunk(samples: usize) -> callwave_core::buffering::frame::EncodedChunk {
    codec::encode(&vec![0.2; samples])
}

#[test]
fn ringing_lasts_at_least_the_configured_delay() {
    let ring_delay = Duration::from_millis(250);
    let h = harness(
        SessionConfig {
            ring_delay,
            ..SessionConfig::default()
        },
        ScriptedConnector::accepting(),
        Arc::new(ScriptedMic::silent()),
        None,
    );

    let started = Instant::now();
    h.session.start_session().expect("start");
    assert_eq!(h.session.state(), CallState::Ringing);

    assert!(wait_for(WAIT, || h.session.state() == CallState::Listening));
    let attempt = h.connector.attempts.lock()[0];
    assert!(
        attempt.duration_since(started) >= ring_delay,
        "connect began after {:?}",
        attempt.duration_since(started)
    );
}

#[test]
fn full_state_sequence_is_broadcast() {
    let h = harness(
        fast_config(),
        ScriptedConnector::accepting(),
        Arc::new(ScriptedMic::silent()),
        None,
    );
    let mut rx = h.session.subscribe_state();

    h.session.start_session().expect("start");
    assert!(wait_for(WAIT, || h.session.state() == CallState::Listening));
    h.connector.emit(InboundEvent::Audio(speech_chunk(480)));
    assert!(wait_for(WAIT, || h.session.state() == CallState::Speaking));
    h.connector.emit(InboundEvent::TurnComplete);
    assert!(wait_for(WAIT, || h.session.state() == CallState::Listening));
    h.session.end_session();

    assert_eq!(
        drain_states(&mut rx),
        vec![
            CallState::Ringing,
            CallState::Connecting,
            CallState::Listening,
            CallState::Speaking,
            CallState::Listening,
            CallState::Idle,
        ]
    );
}

#[test]
fn start_while_active_is_rejected() {
    let h = connected();
    assert!(matches!(
        h.session.start_session(),
        Err(CallError::AlreadyActive)
    ));
    assert_eq!(h.connector.attempts.lock().len(), 1);
}

#[test]
fn end_session_releases_everything() {
    let h = connected();
    let status = h.session.pipeline_status();
    assert!(status.capture_running);
    assert!(status.playback_open);

    h.session.end_session();

    assert_eq!(h.session.state(), CallState::Idle);
    let status = h.session.pipeline_status();
    assert!(!status.capture_running);
    assert!(!status.playback_open);
    assert_eq!(h.session.input_volume(), 0.0);
    assert_eq!(h.session.output_volume(), 0.0);
    assert_eq!(h.connector.stream(0).closes.load(Ordering::SeqCst), 1);
    assert_eq!(h.speaker.sink.closes.load(Ordering::SeqCst), 1);

    // Idempotent.
    h.session.end_session();
    assert_eq!(h.speaker.sink.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn connection_failure_returns_to_idle_without_devices() {
    let mic = Arc::new(ScriptedMic::silent());
    let h = harness(
        fast_config(),
        ScriptedConnector::new(ConnectOutcome::Reject("handshake refused".into())),
        mic.clone(),
        None,
    );
    let mut rx = h.session.subscribe_state();

    h.session.start_session().expect("start");
    assert!(wait_for(WAIT, || {
        h.connector.completed.load(Ordering::SeqCst) == 1 && h.session.state() == CallState::Idle
    }));

    assert_eq!(
        drain_states(&mut rx),
        vec![CallState::Ringing, CallState::Connecting, CallState::Idle]
    );
    assert_eq!(mic.opens.load(Ordering::SeqCst), 0);
    assert_eq!(h.speaker.opens.load(Ordering::SeqCst), 0);
    assert_eq!(h.session.diagnostics_snapshot().connection_failures, 1);

    // A new call may be placed afterwards.
    h.session.start_session().expect("restart after failure");
}

#[test]
fn microphone_failure_after_connect_ends_the_call() {
    let h = harness(
        fast_config(),
        ScriptedConnector::accepting(),
        Arc::new(DeniedMic),
        None,
    );
    let mut rx = h.session.subscribe_state();
    h.session.start_session().expect("start");

    assert!(wait_for(WAIT, || {
        h.connector.completed.load(Ordering::SeqCst) == 1 && h.session.state() == CallState::Idle
    }));
    let states = drain_states(&mut rx);
    assert_eq!(states.last(), Some(&CallState::Idle));
    assert!(!states.contains(&CallState::Listening));
    assert_eq!(h.connector.stream(0).closes.load(Ordering::SeqCst), 1);
    assert!(!h.session.pipeline_status().playback_open);
}

#[test]
fn late_connection_after_end_is_closed_and_ignored() {
    let (connector, release) = ScriptedConnector::gated(ConnectOutcome::Accept);
    let mic = Arc::new(ScriptedMic::silent());
    let h = harness(fast_config(), connector, mic.clone(), None);

    h.session.start_session().expect("start");
    assert!(wait_for(WAIT, || h.session.state() == CallState::Connecting));
    h.session.end_session();
    assert_eq!(h.session.state(), CallState::Idle);

    release.send(()).expect("release connect");
    assert!(wait_for(WAIT, || {
        h.connector
            .streams
            .lock()
            .first()
            .is_some_and(|s| s.closes.load(Ordering::SeqCst) == 1)
    }));

    thread::sleep(Duration::from_millis(50));
    assert_eq!(h.session.state(), CallState::Idle);
    assert_eq!(mic.opens.load(Ordering::SeqCst), 0);
    assert_eq!(h.speaker.opens.load(Ordering::SeqCst), 0);
}

#[test]
fn remote_error_while_connecting_returns_to_idle() {
    let (connector, release) = ScriptedConnector::gated(ConnectOutcome::Accept);
    let mic = Arc::new(ScriptedMic::silent());
    let h = harness(fast_config(), connector, mic.clone(), None);

    h.session.start_session().expect("start");
    assert!(wait_for(WAIT, || h.session.state() == CallState::Connecting));
    assert!(h.connector.emit(InboundEvent::Error("handshake refused".into())));
    assert!(wait_for(WAIT, || h.session.state() == CallState::Idle));

    let status = h.session.pipeline_status();
    assert!(!status.capture_running);
    assert!(!status.playback_open);
    assert_eq!(h.session.diagnostics_snapshot().connection_failures, 1);

    release.send(()).expect("release connect");
    assert!(wait_for(WAIT, || {
        h.connector
            .streams
            .lock()
            .first()
            .is_some_and(|s| s.closes.load(Ordering::SeqCst) == 1)
    }));

    thread::sleep(Duration::from_millis(50));
    assert_eq!(h.session.state(), CallState::Idle);
    assert_eq!(mic.opens.load(Ordering::SeqCst), 0);
    assert_eq!(h.speaker.opens.load(Ordering::SeqCst), 0);
}

#[test]
fn events_before_connect_are_applied_once_listening() {
    let (connector, release) = ScriptedConnector::gated(ConnectOutcome::Accept);
    let h = harness(fast_config(), connector, Arc::new(ScriptedMic::silent()), None);

    h.session.start_session().expect("start");
    assert!(wait_for(WAIT, || h.session.state() == CallState::Connecting));
    assert!(h.connector.emit(InboundEvent::Text {
        speaker: Speaker::Agent,
        text: "[LANG:fr] bonjour".into(),
    }));
    assert!(h.connector.emit(InboundEvent::Audio(speech_chunk(480))));

    thread::sleep(Duration::from_millis(50));
    assert_eq!(h.session.state(), CallState::Connecting);
    assert!(h.session.transcript().is_empty());
    assert_eq!(h.session.diagnostics_snapshot().fragments_played, 0);
    assert!(h.speaker.sink.scheduled.lock().is_empty());

    release.send(()).expect("release connect");
    assert!(wait_for(WAIT, || h.session.diagnostics_snapshot().fragments_played == 1));

    assert!(h.session.state().is_connected());
    assert_eq!(h.session.diagnostics_snapshot().fragments_dropped, 0);
    assert_eq!(h.speaker.sink.scheduled.lock().len(), 1);
    assert!(h.session.transcript().contains("bonjour"));
    assert!(!h.session.transcript().contains("[LANG"));
    assert_eq!(h.session.detected_language().as_deref(), Some("fr"));
}

#[test]
fn captured_frames_are_sent_in_order() {
    let frame_size = 2048;
    let levels = [0.1f32, -0.2, 0.3, -0.4];
    let mut samples = Vec::new();
    for level in levels {
        samples.extend(std::iter::repeat(level).take(frame_size));
    }

    let h = harness(
        fast_config(),
        ScriptedConnector::accepting(),
        Arc::new(ScriptedMic::with_samples(samples)),
        None,
    );
    h.session.start_session().expect("start");
    assert!(wait_for(WAIT, || {
        h.connector
            .streams
            .lock()
            .first()
            .is_some_and(|s| s.sent_audio().len() == levels.len())
    }));

    let sent = h.connector.stream(0).sent_audio();
    for (chunk, expected) in sent.iter().zip(levels) {
        let frame = codec::decode(chunk, 16_000).expect("decode");
        assert_eq!(frame.len(), frame_size);
        let mid = frame.samples[frame_size / 2];
        assert!((mid - expected).abs() < 1e-3, "mid={mid} expected={expected}");
    }
    assert!(wait_for(WAIT, || {
        h.session.diagnostics_snapshot().frames_sent == levels.len()
    }));
}

#[test]
fn greeting_is_sent_before_any_audio() {
    let h = harness(
        SessionConfig {
            greeting: Some("Hello, please introduce yourself.".into()),
            ..fast_config()
        },
        ScriptedConnector::accepting(),
        Arc::new(ScriptedMic::with_samples(vec![0.1; 4096])),
        None,
    );
    h.session.start_session().expect("start");
    assert!(wait_for(WAIT, || {
        h.connector
            .streams
            .lock()
            .first()
            .is_some_and(|s| s.sent.lock().len() >= 2)
    }));

    let log = h.connector.stream(0);
    let sent = log.sent.lock();
    assert_eq!(
        sent[0],
        OutboundMessage::Text("Hello, please introduce yourself.".into())
    );
    assert!(matches!(sent[1], OutboundMessage::Audio(_)));
}

#[test]
fn remote_audio_switches_to_speaking_and_interrupt_halts_once() {
    let h = connected();

    h.connector.emit(InboundEvent::Audio(speech_chunk(2400)));
    h.connector.emit(InboundEvent::Audio(speech_chunk(1200)));
    assert!(wait_for(WAIT, || h.speaker.sink.scheduled.lock().len() == 2));
    assert_eq!(h.session.state(), CallState::Speaking);

    let scheduled = h.speaker.sink.scheduled.lock().clone();
    assert_eq!(scheduled[0].0, 0.0);
    assert!((scheduled[1].0 - 0.1).abs() < 1e-9, "second chunk follows the first");

    h.connector.emit(InboundEvent::Interrupted);
    assert!(wait_for(WAIT, || h.session.state() == CallState::Listening));
    assert_eq!(h.speaker.sink.halts.load(Ordering::SeqCst), 1);
    assert_eq!(h.session.diagnostics_snapshot().interruptions, 1);

    // After an interrupt the schedule restarts at the clock.
    h.connector.emit(InboundEvent::Audio(speech_chunk(480)));
    assert!(wait_for(WAIT, || h.speaker.sink.scheduled.lock().len() == 3));
    assert_eq!(h.speaker.sink.scheduled.lock()[2].0, 0.0);
}

#[test]
fn malformed_audio_is_dropped_and_the_call_continues() {
    let h = connected();

    h.connector.emit(InboundEvent::Audio(callwave_core::buffering::frame::EncodedChunk::new("%%%")));
    h.connector.emit(InboundEvent::Audio(speech_chunk(480)));
    assert!(wait_for(WAIT, || h.session.diagnostics_snapshot().fragments_played == 1));

    assert_eq!(h.session.diagnostics_snapshot().fragments_dropped, 1);
    assert_eq!(h.speaker.sink.scheduled.lock().len(), 1);
    assert!(h.session.state().is_connected());
}

#[test]
fn language_tag_is_stripped_and_recorded() {
    let h = connected();
    let mut transcripts = h.session.subscribe_transcripts();

    h.connector.emit(InboundEvent::Text {
        speaker: Speaker::Agent,
        text: "[LANG:ES] Hola, ¿cómo estás?".into(),
    });
    let mut received = None;
    assert!(wait_for(WAIT, || {
        if let Ok(event) = transcripts.try_recv() {
            received = Some(event);
        }
        received.is_some()
    }));

    assert_eq!(h.session.detected_language().as_deref(), Some("ES"));
    let transcript = h.session.transcript();
    assert!(transcript.contains("Hola, ¿cómo estás?"));
    assert!(!transcript.contains("[LANG"));

    let event = received.expect("transcript event");
    assert_eq!(event.text, "Hola, ¿cómo estás?");
    assert_eq!(event.language.as_deref(), Some("ES"));
    assert_eq!(event.speaker, Speaker::Agent);
}

#[test]
fn transcript_attributes_turns_by_speaker() {
    let h = connected();
    h.connector.emit(InboundEvent::Text {
        speaker: Speaker::User,
        text: "what's the weather".into(),
    });
    h.connector.emit(InboundEvent::Text {
        speaker: Speaker::Agent,
        text: "Sunny".into(),
    });
    h.connector.emit(InboundEvent::Text {
        speaker: Speaker::Agent,
        text: " today.".into(),
    });
    assert!(wait_for(WAIT, || h.session.transcript().ends_with("today.")));
    assert_eq!(h.session.transcript(), "what's the weather\nSunny today.");
}

#[test]
fn remote_error_ends_the_call() {
    let h = connected();
    let mut rx = h.session.subscribe_state();

    h.connector.emit(InboundEvent::Error("quota exceeded".into()));
    assert!(wait_for(WAIT, || h.session.state() == CallState::Idle));

    let event = rx.try_recv().expect("idle event");
    assert_eq!(event.state, CallState::Idle);
    assert_eq!(event.detail.as_deref(), Some("quota exceeded"));
    assert!(!h.session.pipeline_status().capture_running);
    assert_eq!(h.connector.stream(0).closes.load(Ordering::SeqCst), 1);
}

#[test]
fn sentiment_keeps_the_last_completed_result() {
    let sentiment = Arc::new(ScriptedSentiment::new(vec![
        ("slow", Duration::from_millis(300), Sentiment::Positive),
        ("fast", Duration::from_millis(10), Sentiment::Negative),
    ]));
    let h = harness(
        fast_config(),
        ScriptedConnector::accepting(),
        Arc::new(ScriptedMic::silent()),
        Some(sentiment.clone()),
    );
    h.session.start_session().expect("start");
    assert!(wait_for(WAIT, || h.session.state().is_connected()));

    h.connector.emit(InboundEvent::Text {
        speaker: Speaker::User,
        text: "slow but steady".into(),
    });
    h.connector.emit(InboundEvent::Text {
        speaker: Speaker::User,
        text: "fast and loose".into(),
    });
    h.connector.emit(InboundEvent::Text {
        speaker: Speaker::User,
        text: "ok".into(),
    });

    assert!(wait_for(WAIT, || h.session.current_sentiment() == Some(Sentiment::Negative)));
    assert!(wait_for(WAIT, || h.session.current_sentiment() == Some(Sentiment::Positive)));
    assert_eq!(sentiment.calls.load(Ordering::SeqCst), 2, "short fragments are skipped");
    assert!(h.session.state().is_connected());
}

#[test]
fn sentiment_from_a_previous_call_is_discarded() {
    let sentiment = Arc::new(ScriptedSentiment::new(vec![(
        "slow",
        Duration::from_millis(200),
        Sentiment::Positive,
    )]));
    let h = harness(
        fast_config(),
        ScriptedConnector::accepting(),
        Arc::new(ScriptedMic::silent()),
        Some(sentiment.clone()),
    );
    h.session.start_session().expect("start");
    assert!(wait_for(WAIT, || h.session.state().is_connected()));
    h.connector.emit(InboundEvent::Text {
        speaker: Speaker::Agent,
        text: "slow response".into(),
    });
    assert!(wait_for(WAIT, || sentiment.calls.load(Ordering::SeqCst) == 1));

    h.session.end_session();
    h.session.start_session().expect("second call");
    thread::sleep(Duration::from_millis(400));

    assert_eq!(h.session.current_sentiment(), None);
}

#[test]
fn failed_sentiment_does_not_disturb_the_call() {
    let sentiment = Arc::new(ScriptedSentiment::new(Vec::new()));
    let h = harness(
        fast_config(),
        ScriptedConnector::accepting(),
        Arc::new(ScriptedMic::silent()),
        Some(sentiment),
    );
    h.session.start_session().expect("start");
    assert!(wait_for(WAIT, || h.session.state().is_connected()));

    h.connector.emit(InboundEvent::Text {
        speaker: Speaker::Agent,
        text: "anything at all".into(),
    });
    assert!(wait_for(WAIT, || h.session.diagnostics_snapshot().sentiment_failures == 1));
    assert_eq!(h.session.current_sentiment(), None);
    assert!(h.session.state().is_connected());
}

#[test]
fn send_text_requires_a_connected_call() {
    let h = harness(
        fast_config(),
        ScriptedConnector::accepting(),
        Arc::new(ScriptedMic::silent()),
        None,
    );
    assert!(matches!(
        h.session.send_text("hello"),
        Err(CallError::NotRunning)
    ));

    h.session.start_session().expect("start");
    assert!(wait_for(WAIT, || h.session.state().is_connected()));
    h.session.send_text("hello there").expect("send");

    let log = h.connector.stream(0);
    assert!(log
        .sent
        .lock()
        .contains(&OutboundMessage::Text("hello there".into())));
    assert!(h.session.transcript().contains("hello there"));
}

#[test]
fn events_after_end_are_ignored() {
    let h = connected();
    h.session.end_session();

    assert!(!h.connector.emit(InboundEvent::Audio(speech_chunk(480))));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(h.session.state(), CallState::Idle);
    assert!(h.speaker.sink.scheduled.lock().is_empty());
}
