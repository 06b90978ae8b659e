//! Call counters for observability.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

/// Cumulative counters, written by the session loop and its helpers.
#[derive(Debug, Default)]
pub struct SessionDiagnostics {
    pub calls_started: AtomicUsize,
    pub frames_sent: AtomicUsize,
    pub fragments_played: AtomicUsize,
    pub fragments_dropped: AtomicUsize,
    pub interruptions: AtomicUsize,
    pub sentiment_requests: AtomicUsize,
    pub sentiment_failures: AtomicUsize,
    pub connection_failures: AtomicUsize,
}

impl SessionDiagnostics {
    pub(crate) fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        for counter in [
            &self.calls_started,
            &self.frames_sent,
            &self.fragments_played,
            &self.fragments_dropped,
            &self.interruptions,
            &self.sentiment_requests,
            &self.sentiment_failures,
            &self.connection_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            calls_started: self.calls_started.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            fragments_played: self.fragments_played.load(Ordering::Relaxed),
            fragments_dropped: self.fragments_dropped.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
            sentiment_requests: self.sentiment_requests.load(Ordering::Relaxed),
            sentiment_failures: self.sentiment_failures.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub calls_started: usize,
    pub frames_sent: usize,
    pub fragments_played: usize,
    pub fragments_dropped: usize,
    pub interruptions: usize,
    pub sentiment_requests: usize,
    pub sentiment_failures: usize,
    pub connection_failures: usize,
}

/// Which devices a session currently holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    pub capture_running: bool,
    pub playback_open: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_and_reset() {
        let diag = SessionDiagnostics::default();
        SessionDiagnostics::bump(&diag.frames_sent);
        SessionDiagnostics::bump(&diag.frames_sent);
        SessionDiagnostics::bump(&diag.interruptions);

        let snap = diag.snapshot();
        assert_eq!(snap.frames_sent, 2);
        assert_eq!(snap.interruptions, 1);

        diag.reset();
        assert_eq!(diag.snapshot(), DiagnosticsSnapshot::default());
    }
}
