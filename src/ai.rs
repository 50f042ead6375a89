//! Simulated conversation partner.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::wav::WAV_MIME_TYPE;
use crate::audio::{AudioSegment, PlaybackEvent, PlaybackSink};
use crate::config::AiConfig;
use crate::error::{SessionError, SessionResult};
use crate::events::EventBus;
use crate::random::RandomSource;

/// Delay before the simulated partner starts talking
const SIMULATED_ONSET: Duration = Duration::from_millis(1000);
const SIMULATED_MIN_SPEAKING_MS: f64 = 5000.0;
const SIMULATED_SPEAKING_RANGE_MS: f64 = 10000.0;

/// Thinking time before each scripted turn, cycling
pub const SCRIPTED_THINKING_SECS: [u64; 6] = [3, 6, 5, 2, 2, 3];
/// Scripted turns available per match
pub const SCRIPTED_MAX_TURNS: usize = 6;

pub const PARTNER_RESPONSES: [&str; 5] = [
    "That's a very interesting perspective. Could you tell me more about your experience with this?",
    "I understand your point. Have you considered the alternative viewpoint?",
    "That's a great example. How do you think this applies in different situations?",
    "Very thoughtful response. What do you think are the main challenges in this area?",
    "I see what you mean. How has this changed over the years in your opinion?",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Simulated,
    Scripted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AiEvent {
    SpeakingState(bool),
    ThinkingState(bool),
    ResponseGenerated(String),
}

/// Provides the pre-recorded partner clips, indexed from 1
pub trait ClipSource: Send + Sync {
    fn clip(&self, index: usize) -> SessionResult<AudioSegment>;
}

/// Clips stored as `<dir>/<index>.wav`
#[derive(Debug, Clone)]
pub struct DirectoryClips {
    dir: PathBuf,
}

impl DirectoryClips {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ClipSource for DirectoryClips {
    fn clip(&self, index: usize) -> SessionResult<AudioSegment> {
        let path = self.dir.join(format!("{}.wav", index));
        let bytes = std::fs::read(&path).map_err(|e| {
            SessionError::DecodeOrFormat(format!("cannot read clip {}: {}", path.display(), e))
        })?;
        Ok(AudioSegment::new(bytes, WAV_MIME_TYPE))
    }
}

/// How the partner produces its turn
#[derive(Clone)]
pub enum PartnerStrategy {
    /// Timed speaking flag followed by a canned reply
    SimulatedText,
    /// Thinking pause, then a pre-recorded clip
    ScriptedAudio {
        clips: Arc<dyn ClipSource>,
        playback: Arc<dyn PlaybackSink>,
    },
}

impl PartnerStrategy {
    pub fn from_config(config: &AiConfig, playback: Arc<dyn PlaybackSink>) -> Self {
        match config.strategy {
            StrategyKind::Simulated => PartnerStrategy::SimulatedText,
            StrategyKind::Scripted => {
                let dir = config.clips_dir.clone().unwrap_or_else(|| "clips".to_string());
                PartnerStrategy::ScriptedAudio {
                    clips: Arc::new(DirectoryClips::new(dir)),
                    playback,
                }
            }
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            PartnerStrategy::SimulatedText => StrategyKind::Simulated,
            PartnerStrategy::ScriptedAudio { .. } => StrategyKind::Scripted,
        }
    }
}

pub struct AiService {
    strategy: PartnerStrategy,
    events: EventBus<AiEvent>,
    random: Arc<Mutex<Box<dyn RandomSource>>>,
    turns_taken: Arc<AtomicUsize>,
    current: Mutex<Option<JoinHandle<()>>>,
}

impl AiService {
    pub fn new(strategy: PartnerStrategy, random: Box<dyn RandomSource>) -> Self {
        Self {
            strategy,
            events: EventBus::new(),
            random: Arc::new(Mutex::new(random)),
            turns_taken: Arc::new(AtomicUsize::new(0)),
            current: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AiEvent> {
        self.events.subscribe()
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy.kind()
    }

    pub fn turns_taken(&self) -> usize {
        self.turns_taken.load(Ordering::SeqCst)
    }

    /// Rewind the scripted sequence to its first turn
    pub fn reset_script(&self) {
        self.turns_taken.store(0, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.current
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|task| !task.is_finished()))
            .unwrap_or(false)
    }

    /// Begin one partner turn, replacing any turn in progress
    pub fn start_speaking(&self) {
        self.cancel();

        let events = self.events.clone();
        let task = match &self.strategy {
            PartnerStrategy::SimulatedText => {
                info!("Partner turn (simulated)");
                tokio::spawn(run_simulated(events, Arc::clone(&self.random)))
            }
            PartnerStrategy::ScriptedAudio { clips, playback } => {
                info!("Partner turn (scripted, turn {})", self.turns_taken() + 1);
                tokio::spawn(run_scripted(
                    events,
                    Arc::clone(clips),
                    Arc::clone(playback),
                    Arc::clone(&self.random),
                    Arc::clone(&self.turns_taken),
                ))
            }
        };

        if let Ok(mut slot) = self.current.lock() {
            *slot = Some(task);
        }
    }

    /// Cancel any pending turn and force both flags off. Safe when idle.
    pub async fn stop_speaking(&self) {
        self.cancel();

        if let PartnerStrategy::ScriptedAudio { playback, .. } = &self.strategy {
            playback.stop().await;
        }

        self.events.emit(AiEvent::ThinkingState(false));
        self.events.emit(AiEvent::SpeakingState(false));
    }

    pub async fn cleanup(&self) {
        self.stop_speaking().await;
    }

    fn cancel(&self) {
        if let Ok(mut slot) = self.current.lock() {
            if let Some(task) = slot.take() {
                task.abort();
                debug!("Pending partner turn cancelled");
            }
        }
    }
}

impl Drop for AiService {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn pick_response(random: &Mutex<Box<dyn RandomSource>>) -> String {
    let idx = random
        .lock()
        .map(|mut r| r.next_index(PARTNER_RESPONSES.len()))
        .unwrap_or(0);
    PARTNER_RESPONSES[idx].to_string()
}

async fn run_simulated(events: EventBus<AiEvent>, random: Arc<Mutex<Box<dyn RandomSource>>>) {
    tokio::time::sleep(SIMULATED_ONSET).await;
    events.emit(AiEvent::SpeakingState(true));

    let fraction = random.lock().map(|mut r| r.next_f64()).unwrap_or(0.0);
    let speaking = Duration::from_millis((fraction * SIMULATED_SPEAKING_RANGE_MS + SIMULATED_MIN_SPEAKING_MS) as u64);
    debug!("Simulated partner speaking for {}ms", speaking.as_millis());

    tokio::time::sleep(speaking).await;
    events.emit(AiEvent::SpeakingState(false));
    events.emit(AiEvent::ResponseGenerated(pick_response(&random)));
}

async fn run_scripted(
    events: EventBus<AiEvent>,
    clips: Arc<dyn ClipSource>,
    playback: Arc<dyn PlaybackSink>,
    random: Arc<Mutex<Box<dyn RandomSource>>>,
    turns_taken: Arc<AtomicUsize>,
) {
    let turn = turns_taken.load(Ordering::SeqCst);
    if turn >= SCRIPTED_MAX_TURNS {
        // Out of clips; a text reply still hands the turn back
        info!("Scripted partner finished after {} turns, replying without a clip", turn);
        events.emit(AiEvent::ThinkingState(false));
        events.emit(AiEvent::SpeakingState(false));
        events.emit(AiEvent::ResponseGenerated(pick_response(&random)));
        return;
    }

    events.emit(AiEvent::ThinkingState(true));
    let thinking = Duration::from_secs(SCRIPTED_THINKING_SECS[turn % SCRIPTED_THINKING_SECS.len()]);
    tokio::time::sleep(thinking).await;

    let clip_index = turn % SCRIPTED_MAX_TURNS + 1;
    if let Err(e) = play_clip(&events, clips.as_ref(), playback.as_ref(), clip_index).await {
        warn!("Scripted clip {} failed, using fallback reply: {}", clip_index, e);
    }

    events.emit(AiEvent::ThinkingState(false));
    events.emit(AiEvent::SpeakingState(false));
    events.emit(AiEvent::ResponseGenerated(pick_response(&random)));
    turns_taken.fetch_add(1, Ordering::SeqCst);
}

async fn play_clip(
    events: &EventBus<AiEvent>,
    clips: &dyn ClipSource,
    playback: &dyn PlaybackSink,
    index: usize,
) -> SessionResult<()> {
    let clip = clips.clip(index)?;
    let mut rx = playback.play(&clip).await?;

    while let Some(event) = rx.recv().await {
        match event {
            PlaybackEvent::Play => {
                events.emit(AiEvent::ThinkingState(false));
                events.emit(AiEvent::SpeakingState(true));
            }
            PlaybackEvent::Ended | PlaybackEvent::Pause => break,
            PlaybackEvent::Error(e) => return Err(e),
            PlaybackEvent::LoadedMetadata { .. } | PlaybackEvent::TimeUpdate { .. } => {}
        }
    }

    Ok(())
}
