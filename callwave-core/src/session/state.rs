//! Call state machine.
//!
//! ```text
//! Idle ─Start─► Ringing ─RingElapsed─► Connecting ─Accepted─► Listening ◄─────┐
//!                                          │                      │          │ Interrupted /
//!                                       Rejected            AudioArrived     │ TurnComplete
//!                                          ▼                      ▼          │
//!                                         Idle                 Speaking ─────┘
//!
//! End: Ringing | Connecting | Listening | Speaking ─► Idle
//! ```
//!
//! Transitions not in the table are rejected, so stale or out-of-order
//! triggers cannot move the call.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    /// No call; no device or connection held.
    #[default]
    Idle,
    /// Simulated ringing delay before connecting.
    Ringing,
    /// Handshake in flight.
    Connecting,
    /// Connected; microphone streaming, remote silent.
    Listening,
    /// Connected; remote speech is being played.
    Speaking,
}

/// Inputs that can move the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTrigger {
    Start,
    RingElapsed,
    Accepted,
    Rejected,
    AudioArrived,
    Interrupted,
    TurnComplete,
    End,
}

impl CallState {
    /// The state `trigger` leads to, or `None` if it does not apply here.
    pub fn next(self, trigger: CallTrigger) -> Option<CallState> {
        use CallState::*;
        use CallTrigger::*;

        match (self, trigger) {
            (Idle, Start) => Some(Ringing),
            (Ringing, RingElapsed) => Some(Connecting),
            (Connecting, Accepted) => Some(Listening),
            (Connecting, Rejected) => Some(Idle),
            (Listening | Speaking, AudioArrived) => Some(Speaking),
            (Listening | Speaking, Interrupted | TurnComplete) => Some(Listening),
            (Ringing | Connecting | Listening | Speaking, End) => Some(Idle),
            _ => None,
        }
    }

    /// Connected to the remote side (microphone frames are forwarded).
    pub fn is_connected(self) -> bool {
        matches!(self, CallState::Listening | CallState::Speaking)
    }

    pub fn is_idle(self) -> bool {
        self == CallState::Idle
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Ringing => "ringing",
            CallState::Connecting => "connecting",
            CallState::Listening => "listening",
            CallState::Speaking => "speaking",
        }
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CallState::*;
    use CallTrigger::*;

    #[test]
    fn happy_path() {
        let mut state = Idle;
        for (trigger, expected) in [
            (Start, Ringing),
            (RingElapsed, Connecting),
            (Accepted, Listening),
            (AudioArrived, Speaking),
            (AudioArrived, Speaking),
            (TurnComplete, Listening),
            (AudioArrived, Speaking),
            (Interrupted, Listening),
            (End, Idle),
        ] {
            state = state.next(trigger).expect("valid transition");
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn connection_failure_returns_to_idle() {
        assert_eq!(Connecting.next(Rejected), Some(Idle));
        assert_eq!(Connecting.next(End), Some(Idle));
    }

    #[test]
    fn start_only_from_idle() {
        for state in [Ringing, Connecting, Listening, Speaking] {
            assert_eq!(state.next(Start), None, "{state} must reject Start");
        }
    }

    #[test]
    fn audio_does_not_move_unconnected_calls() {
        for state in [Idle, Ringing, Connecting] {
            assert_eq!(state.next(AudioArrived), None);
            assert_eq!(state.next(Interrupted), None);
        }
    }

    #[test]
    fn end_is_ignored_when_idle() {
        assert_eq!(Idle.next(End), None);
    }

    #[test]
    fn connected_states() {
        assert!(Listening.is_connected());
        assert!(Speaking.is_connected());
        assert!(!Connecting.is_connected());
        assert!(Idle.is_idle());
    }
}
