use thiserror::Error;

/// Failures surfaced by the session runtime and its services.
///
/// `EmptyRecording` is warning-only: it is published as an event and never
/// returned as the failure of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("capture device unsupported: {0}")]
    DeviceUnsupported(String),

    /// Returned by a `PlaybackSink` whose output refuses to start, such as a
    /// device sink held back by an autoplay policy. The headless sink never
    /// blocks; `AudioService` passes it through unchanged.
    #[error("playback blocked by autoplay policy: {0}")]
    PlaybackBlocked(String),

    #[error("audio decode or format error: {0}")]
    DecodeOrFormat(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("recording may be empty or corrupt ({bytes} bytes)")]
    EmptyRecording { bytes: usize },
}

impl SessionError {
    /// Whether this error aborts the operation that produced it
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::EmptyRecording { .. })
    }
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;
