use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::{SessionError, SessionResult};

/// Encoded containers in descending order of preference
pub const PREFERRED_MIME_TYPES: [&str; 4] = [
    "audio/webm;codecs=opus",
    "audio/webm",
    "audio/mp4",
    "audio/ogg;codecs=opus",
];

/// Processing requested from the capture device
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub sample_rate: u32,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            sample_rate: 44100,
        }
    }
}

/// Parameters for one capture run
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Negotiated container; `None` lets the backend use its default
    pub mime_type: Option<String>,
    /// Encoded data is delivered once per timeslice
    pub timeslice: Duration,
    /// Level readings are delivered once per interval
    pub level_interval: Duration,
    pub constraints: CaptureConstraints,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            mime_type: None,
            timeslice: Duration::from_millis(250),
            level_interval: Duration::from_millis(50),
            constraints: CaptureConstraints::default(),
        }
    }
}

/// Output of a running capture
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// One timeslice of encoded audio
    Data {
        bytes: Vec<u8>,
        mime_type: Option<String>,
    },
    /// Input level in `0..=100`
    Level(u8),
}

/// Audio capture backend trait
///
/// Implementations:
/// - File: a WAV file standing in for the microphone (headless sessions, tests)
///
/// The receiver returned by `start` closes once capture has stopped and every
/// pending chunk has been delivered.
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Acquire and immediately release the device to prime permission
    async fn request_permission(&mut self) -> SessionResult<()>;

    /// Whether the backend can produce the given container
    fn is_type_supported(&self, mime_type: &str) -> bool;

    /// Start capturing audio
    async fn start(&mut self, options: CaptureOptions) -> SessionResult<mpsc::Receiver<CaptureEvent>>;

    /// Stop capturing, flush pending data and release the device
    async fn stop(&mut self) -> SessionResult<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Pick the best container the backend supports, `None` for its default
pub fn select_mime_type(backend: &dyn CaptureBackend) -> Option<&'static str> {
    PREFERRED_MIME_TYPES
        .iter()
        .copied()
        .find(|mime| backend.is_type_supported(mime))
}

/// Capture source type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Live microphone input
    Microphone,
    /// WAV file played back as if it were the microphone
    File(String),
}

/// Capture backend factory
pub struct CaptureBackendFactory;

impl CaptureBackendFactory {
    pub fn create(source: AudioSource) -> SessionResult<Box<dyn CaptureBackend>> {
        match source {
            AudioSource::File(path) => Ok(Box::new(super::file::WavFileBackend::new(path))),
            AudioSource::Microphone => Err(SessionError::DeviceUnsupported(
                "no live microphone backend is available on this platform".to_string(),
            )),
        }
    }
}
