use thiserror::Error;

/// Failure decoding an inbound audio fragment.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("fragment is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("fragment length {len} is not a whole number of 16-bit samples")]
    MisalignedLength { len: usize },
}

/// All errors produced by callwave-core.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("audio decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("sentiment service error: {0}")]
    Sentiment(String),

    #[error("a call is already in progress")]
    AlreadyActive,

    #[error("pipeline is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse classification used by the session controller to decide whether a
/// failure ends the call or is contained where it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Microphone or speaker unavailable. Fatal to the call attempt.
    Device,
    /// Handshake or transport failure. Fatal to the call.
    Connection,
    /// Malformed inbound audio. The fragment is dropped.
    Decode,
    /// Sentiment enrichment failed. Swallowed.
    Sentiment,
    Other,
}

impl CallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CallError::AudioDevice(_)
            | CallError::AudioStream(_)
            | CallError::NoDefaultInputDevice
            | CallError::NoDefaultOutputDevice => ErrorKind::Device,
            CallError::Connection(_) | CallError::Protocol(_) => ErrorKind::Connection,
            CallError::Decode(_) => ErrorKind::Decode,
            CallError::Sentiment(_) => ErrorKind::Sentiment,
            _ => ErrorKind::Other,
        }
    }

    /// Device and connection failures force the call back to idle.
    pub fn is_fatal_to_call(&self) -> bool {
        matches!(self.kind(), ErrorKind::Device | ErrorKind::Connection)
    }
}

pub type Result<T> = std::result::Result<T, CallError>;
