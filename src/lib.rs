pub mod ai;
pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod questions;
pub mod random;
pub mod relay;
pub mod session;
pub mod timer;

pub use ai::{AiEvent, AiService, PartnerStrategy, StrategyKind};
pub use audio::{
    AudioEvent, AudioSegment, AudioService, AudioSettings, AudioSource, CaptureBackend,
    CaptureBackendFactory, HeadlessPlayback, PlaybackSink, WavFileBackend,
};
pub use config::Config;
pub use error::{SessionError, SessionResult};
pub use events::EventBus;
pub use questions::{LocalQuestionBank, QuestionCatalog, QuestionData, QuestionManager};
pub use random::{RandomSource, SequenceRandom, UuidRandom};
pub use relay::{create_router, RelayState, WebSocketService};
pub use session::{
    format_time, DifficultyLevel, MatchType, Participant, SessionEvent, SessionOptions,
    SessionServices, SessionState, SessionSummary, SpeakingTurn, TranscriptMessage,
    VersusSessionController,
};
pub use timer::{TimerEvent, TimerService};
