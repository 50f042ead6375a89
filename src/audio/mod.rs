pub mod backend;
pub mod file;
pub mod level;
pub mod playback;
pub mod segment;
pub mod service;
pub mod wav;

pub use backend::{
    select_mime_type, AudioSource, CaptureBackend, CaptureBackendFactory, CaptureConstraints,
    CaptureEvent, CaptureOptions, PREFERRED_MIME_TYPES,
};
pub use file::WavFileBackend;
pub use playback::{HeadlessPlayback, PlaybackEvent, PlaybackSink, PlaybackSource};
pub use segment::AudioSegment;
pub use service::{AudioEvent, AudioService, AudioSettings, RecordingMode};
