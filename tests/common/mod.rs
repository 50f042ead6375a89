// Shared fixtures for integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use versus_session::ai::{AiService, PartnerStrategy};
use versus_session::audio::wav::{encode, WAV_MIME_TYPE};
use versus_session::audio::{
    AudioSegment, AudioService, AudioSettings, CaptureBackend, CaptureEvent, CaptureOptions,
    HeadlessPlayback,
};
use versus_session::questions::{LocalQuestionBank, QuestionCatalog, QuestionManager};
use versus_session::random::SequenceRandom;
use versus_session::relay::WebSocketService;
use versus_session::session::{
    DifficultyLevel, MatchType, Participant, SessionOptions, SessionServices, SessionState,
    VersusSessionController,
};
use versus_session::{SessionError, SessionResult};

/// Nothing listens here, so relay connects fail fast
pub const UNREACHABLE_RELAY: &str = "ws://127.0.0.1:1/ws/versus";

/// Capture backend that emits one level reading on start and a fixed chunk
/// on stop
pub struct MockCapture {
    permission: SessionResult<()>,
    chunk: Vec<u8>,
    mime_type: &'static str,
    tx: Option<mpsc::Sender<CaptureEvent>>,
    pub starts: Arc<AtomicUsize>,
}

impl MockCapture {
    pub fn new(chunk: Vec<u8>) -> Self {
        Self {
            permission: Ok(()),
            chunk,
            mime_type: "audio/webm;codecs=opus",
            tx: None,
            starts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Records a valid WAV utterance
    pub fn wav(samples: usize) -> Self {
        let mut capture = Self::new(encode(&vec![1000i16; samples], 16000, 1).unwrap());
        capture.mime_type = WAV_MIME_TYPE;
        capture
    }

    pub fn denied() -> Self {
        let mut capture = Self::new(Vec::new());
        capture.permission = Err(SessionError::PermissionDenied("user dismissed the prompt".into()));
        capture
    }
}

#[async_trait::async_trait]
impl CaptureBackend for MockCapture {
    async fn request_permission(&mut self) -> SessionResult<()> {
        self.permission.clone()
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        mime_type == self.mime_type
    }

    async fn start(&mut self, _options: CaptureOptions) -> SessionResult<mpsc::Receiver<CaptureEvent>> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        let _ = tx.send(CaptureEvent::Level(40)).await;
        self.tx = Some(tx);
        Ok(rx)
    }

    async fn stop(&mut self) -> SessionResult<()> {
        if let Some(tx) = self.tx.take() {
            let _ = tx
                .send(CaptureEvent::Data {
                    bytes: self.chunk.clone(),
                    mime_type: Some(self.mime_type.to_string()),
                })
                .await;
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.tx.is_some()
    }

    fn name(&self) -> &str {
        "mock"
    }
}

pub fn wav_segment(samples: usize) -> AudioSegment {
    AudioSegment::new(encode(&vec![500i16; samples], 16000, 1).unwrap(), WAV_MIME_TYPE)
}

pub fn audio_service(capture: MockCapture) -> AudioService {
    AudioService::new(Box::new(capture), Arc::new(HeadlessPlayback::new()), AudioSettings::default())
}

pub fn options(match_type: MatchType) -> SessionOptions {
    SessionOptions {
        match_duration_secs: 300,
        turn_switch_delay: Duration::from_millis(300),
        match_type,
        difficulty_level: DifficultyLevel::Beginner,
        fixed_topic: None,
        fixed_prompts: Vec::new(),
    }
}

/// Controller with deterministic partner and question choices
pub fn controller(options: SessionOptions, capture: MockCapture, relay_url: &str) -> VersusSessionController {
    let bank = LocalQuestionBank::new(
        Arc::new(QuestionCatalog::builtin()),
        Box::new(SequenceRandom::constant(0.0)),
    );

    VersusSessionController::new(
        options,
        SessionServices {
            audio: audio_service(capture),
            // 0.0 => 5s of speaking, first canned response
            ai: AiService::new(PartnerStrategy::SimulatedText, Box::new(SequenceRandom::constant(0.0))),
            questions: QuestionManager::new(Arc::new(bank)),
            relay: WebSocketService::new(relay_url, Participant::anonymous()),
        },
    )
}

/// Poll the controller state until `check` passes
pub async fn wait_for_state(
    controller: &VersusSessionController,
    timeout: Duration,
    check: impl Fn(&SessionState) -> bool,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check(&controller.state()) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait for the first session event matching `pick`, skipping lag
pub async fn next_event<T>(
    events: &mut tokio::sync::broadcast::Receiver<versus_session::SessionEvent>,
    timeout: Duration,
    pick: impl Fn(versus_session::SessionEvent) -> Option<T>,
) -> Option<T> {
    use tokio::sync::broadcast::error::RecvError;

    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(found) = pick(event) {
                        return Some(found);
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}
