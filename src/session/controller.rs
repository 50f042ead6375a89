//! Versus session orchestration.
//!
//! The controller owns the session state and composes the audio, timer,
//! partner, question and relay services. Service events are folded into the
//! state by a background pump; session operations are plain async methods.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::model::VersusModel;
use super::participant::Participant;
use super::state::{DifficultyLevel, MatchType, SessionPhase, SessionState, SpeakingTurn, TranscriptMessage};
use crate::ai::{AiEvent, AiService, PartnerStrategy};
use crate::audio::{AudioEvent, AudioSegment, AudioService, AudioSettings, CaptureBackend, HeadlessPlayback};
use crate::config::Config;
use crate::error::SessionResult;
use crate::events::EventBus;
use crate::questions::{LocalQuestionBank, QuestionCatalog, QuestionManager};
use crate::random::UuidRandom;
use crate::relay::{InboundVoice, WebSocketService};
use crate::timer::{TimerEvent, TimerService};

/// Artifacts handed back when a match ends
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSummary {
    pub recorded_segments: Vec<AudioSegment>,
    pub transcript_messages: Vec<TranscriptMessage>,
}

impl SessionSummary {
    pub fn is_empty(&self) -> bool {
        self.recorded_segments.is_empty() && self.transcript_messages.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// Emitted whenever a running match ends, including countdown expiry
    MatchEnded(SessionSummary),
    /// The relay could not be reached; the match continues locally
    RelayUnavailable(String),
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub match_duration_secs: u32,
    pub turn_switch_delay: Duration,
    pub match_type: MatchType,
    pub difficulty_level: DifficultyLevel,
    /// Topic forced in AI mode instead of a question from the bank
    pub fixed_topic: Option<String>,
    pub fixed_prompts: Vec<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SessionOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            match_duration_secs: cfg.session.match_duration_secs,
            turn_switch_delay: Duration::from_millis(cfg.session.turn_switch_delay_ms),
            match_type: cfg.session.match_type,
            difficulty_level: cfg.session.difficulty_level,
            fixed_topic: cfg.ai.fixed_topic.clone(),
            fixed_prompts: cfg.ai.fixed_prompts.clone(),
        }
    }
}

/// Collaborators the controller takes ownership of
pub struct SessionServices {
    pub audio: AudioService,
    pub ai: AiService,
    pub questions: QuestionManager,
    pub relay: WebSocketService,
}

struct Inner {
    options: SessionOptions,
    model: Mutex<VersusModel>,
    audio: AudioService,
    timer: TimerService,
    ai: AiService,
    questions: tokio::sync::Mutex<QuestionManager>,
    relay: WebSocketService,
    events: EventBus<SessionEvent>,
    /// Set while inbound peer audio is what the player is playing
    partner_playing: AtomicBool,
    pending_switch: Mutex<Option<JoinHandle<()>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    /// Serializes start and end
    lifecycle: tokio::sync::Mutex<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        abort_slot(&self.pending_switch);
        abort_slot(&self.pump);
    }
}

/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct VersusSessionController {
    inner: Arc<Inner>,
}

impl VersusSessionController {
    /// Must be called from within a Tokio runtime.
    pub fn new(options: SessionOptions, services: SessionServices) -> Self {
        let initial = SessionState::new(options.match_duration_secs, options.match_type, options.difficulty_level);
        let timer = TimerService::new();

        let audio_rx = services.audio.subscribe();
        let timer_rx = timer.subscribe();
        let ai_rx = services.ai.subscribe();
        let voice_rx = services.relay.voice_stream();

        let inner = Arc::new(Inner {
            options,
            model: Mutex::new(VersusModel::new(initial)),
            audio: services.audio,
            timer,
            ai: services.ai,
            questions: tokio::sync::Mutex::new(services.questions),
            relay: services.relay,
            events: EventBus::new(),
            partner_playing: AtomicBool::new(false),
            pending_switch: Mutex::new(None),
            pump: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        });

        let pump = tokio::spawn(run_event_pump(
            Arc::downgrade(&inner),
            audio_rx,
            timer_rx,
            ai_rx,
            voice_rx,
        ));
        if let Ok(mut slot) = inner.pump.lock() {
            *slot = Some(pump);
        }

        Self { inner }
    }

    /// Wire up the default services for a config: headless playback, the
    /// built-in question bank and the configured relay.
    pub fn from_config(cfg: &Config, capture: Box<dyn CaptureBackend>, participant: Participant) -> Self {
        let audio = AudioService::new(capture, Arc::new(HeadlessPlayback::new()), AudioSettings::from(&cfg.audio));
        let strategy = PartnerStrategy::from_config(&cfg.ai, Arc::new(HeadlessPlayback::new()));
        let ai = AiService::new(strategy, Box::new(UuidRandom));
        let bank = LocalQuestionBank::new(Arc::new(QuestionCatalog::builtin()), Box::new(UuidRandom));
        let questions = QuestionManager::new(Arc::new(bank));
        let relay = WebSocketService::new(cfg.relay.url.clone(), participant)
            .with_connect_timeout(Duration::from_millis(cfg.relay.connect_timeout_ms));

        Self::new(
            SessionOptions::from(cfg),
            SessionServices {
                audio,
                ai,
                questions,
                relay,
            },
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.inner.model().state().clone()
    }

    pub fn audio(&self) -> &AudioService {
        &self.inner.audio
    }

    pub fn relay(&self) -> &WebSocketService {
        &self.inner.relay
    }

    pub fn timer(&self) -> &TimerService {
        &self.inner.timer
    }

    pub fn can_user_speak(&self) -> bool {
        self.inner.model().can_user_speak()
    }

    pub async fn current_topic(&self) -> String {
        self.inner.questions.lock().await.get_current_topic().to_string()
    }

    pub async fn current_prompt(&self) -> String {
        let index = self.inner.model().state().current_prompt_index;
        self.inner
            .questions
            .lock()
            .await
            .get_prompt_by_index(index as i64)
            .to_string()
    }

    /// Begin a match: permission, topic, relay, continuous capture, countdown.
    ///
    /// Permission or capture failures roll the session back to idle.
    pub async fn start_match(&self) -> SessionResult<()> {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;

        if inner.model().state().match_started {
            warn!("Match already started");
            return Ok(());
        }

        inner.update(|m| m.update(|s| s.phase = SessionPhase::Starting));

        if let Err(e) = inner.audio.request_microphone_permission().await {
            error!("Cannot start match: {}", e);
            inner.update(|m| m.update(|s| s.phase = SessionPhase::Idle));
            return Err(e);
        }

        // Nothing recorded before the match belongs to it
        abort_slot(&inner.pending_switch);
        if inner.audio.is_recording().await {
            inner.audio.stop_recording().await;
        }
        inner.audio.clear_recorded_segments();

        let (match_type, difficulty) = inner.update(|m| {
            m.update(|s| {
                s.last_recorded_audio = None;
                s.full_recording_available = false;
                s.match_started = true;
                s.speaking_turn = SpeakingTurn::User;
                s.remaining_time = inner.options.match_duration_secs;
                s.current_prompt_index = 0;
                (s.match_type, s.difficulty_level)
            })
        });

        info!("Starting match: {}, {}", match_type, difficulty);
        self.load_topic(match_type, difficulty).await;

        match match_type {
            MatchType::HumanVsHuman => {
                if let Err(e) = inner.relay.connect().await {
                    warn!("Relay unavailable, continuing without peer audio: {}", e);
                    inner.events.emit(SessionEvent::RelayUnavailable(e.to_string()));
                }
            }
            MatchType::AiAssisted => inner.ai.reset_script(),
        }

        if let Err(e) = inner.audio.start_continuous_recording().await {
            error!("Cannot start match, capture failed: {}", e);
            inner.relay.disconnect();
            inner.questions.lock().await.reset();
            inner.update(|m| m.reset_match());
            return Err(e);
        }

        inner.update(|m| {
            m.set_user_speaking(true);
            m.update(|s| {
                s.is_recording = true;
                s.user_muted = false;
                s.phase = SessionPhase::Running;
            });
        });

        inner.timer.start_main_timer(inner.options.match_duration_secs);
        info!("Match started, user may speak");
        Ok(())
    }

    async fn load_topic(&self, match_type: MatchType, difficulty: DifficultyLevel) {
        let mut questions = self.inner.questions.lock().await;

        if match_type == MatchType::AiAssisted {
            if let Some(topic) = &self.inner.options.fixed_topic {
                questions.set_server_topic(topic.clone(), self.inner.options.fixed_prompts.clone());
            }
        }

        if questions.load_question_by_level(difficulty).await.is_none() && !questions.is_using_server_topic() {
            warn!("No topic available for {}", difficulty);
        }
    }

    /// End the match and hand back its recordings and transcript.
    ///
    /// A no-op returning an empty summary when no match is running.
    pub async fn end_match(&self) -> SessionSummary {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;

        let was_started = inner.update(|m| {
            m.update(|s| {
                let was = s.match_started;
                if was {
                    s.match_started = false;
                    s.phase = SessionPhase::Ending;
                }
                was
            })
        });
        if !was_started {
            debug!("End requested but no match is running");
            return SessionSummary::default();
        }

        info!("Ending match");

        abort_slot(&inner.pending_switch);
        inner.timer.stop_all_timers();
        inner.audio.stop_continuous_recording().await;
        inner.audio.stop_recording().await;
        inner.audio.stop_playback().await;
        inner.ai.stop_speaking().await;
        inner.relay.disconnect();
        inner.partner_playing.store(false, Ordering::SeqCst);

        let recorded_segments = inner.audio.take_recorded_segments();
        inner.questions.lock().await.reset();

        let transcript_messages = inner.update(|m| {
            let transcript = m.take_transcript();
            m.reset_match();
            transcript
        });

        info!(
            "Match ended: {} segments, {} transcript messages",
            recorded_segments.len(),
            transcript_messages.len()
        );

        let summary = SessionSummary {
            recorded_segments,
            transcript_messages,
        };
        inner.events.emit(SessionEvent::MatchEnded(summary.clone()));
        summary
    }

    /// Start an utterance, or finish the current one and hand over the turn
    pub async fn toggle_recording(&self) -> SessionResult<()> {
        let inner = &self.inner;

        if inner.audio.is_recording().await {
            inner.audio.stop_recording().await;
            inner.update(|m| {
                m.update(|s| {
                    s.is_recording = false;
                    s.audio_level = 0;
                })
            });
            self.end_user_speaking();
            return Ok(());
        }

        let state = self.state();
        if state.match_started && state.match_type == MatchType::AiAssisted && state.speaking_turn == SpeakingTurn::Partner {
            warn!("Partner has the turn, recording not started");
            return Ok(());
        }

        if state.is_playing_audio {
            inner.audio.stop_playback().await;
        }

        inner.audio.start_recording().await?;

        inner.update(|m| {
            m.set_user_speaking(true);
            m.update(|s| {
                s.is_recording = true;
                s.user_muted = false;
            });
        });
        Ok(())
    }

    fn end_user_speaking(&self) {
        let inner = &self.inner;
        let ended = inner.update(|m| {
            if !m.can_user_speak() {
                return false;
            }
            m.set_user_speaking(false);
            m.update(|s| s.user_muted = true);
            true
        });
        if !ended {
            return;
        }

        let delay = inner.options.turn_switch_delay;
        let weak = Arc::downgrade(inner);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                VersusSessionController { inner }.switch_speaking_turn().await;
            }
        });

        if let Ok(mut slot) = inner.pending_switch.lock() {
            if let Some(previous) = slot.replace(task) {
                previous.abort();
            }
        }
    }

    /// Hand the turn to the other side and clear both speaking flags
    pub async fn switch_speaking_turn(&self) {
        let inner = &self.inner;
        inner.ai.stop_speaking().await;

        let state = self.state();
        if state.is_recording && state.speaking_turn == SpeakingTurn::User {
            inner.audio.stop_recording().await;
        }

        let (turn, match_type) = inner.update(|m| {
            m.clear_speaking_flags();
            m.update(|s| {
                s.is_recording = false;
                s.audio_level = 0;
            });
            let turn = m.switch_speaking_turn();
            (turn, m.state().match_type)
        });

        if turn == SpeakingTurn::Partner && match_type == MatchType::AiAssisted {
            inner.ai.start_speaking();
        }

        info!("Speaking turn switched to {:?}", turn);
    }

    pub async fn skip_partner_turn(&self) {
        if self.state().speaking_turn != SpeakingTurn::Partner {
            return;
        }

        info!("Skipping partner turn");
        self.inner.ai.stop_speaking().await;
        self.inner.update(|m| m.set_partner_speaking(false));
        self.switch_speaking_turn().await;
    }

    /// Play or stop the last recorded utterance
    pub async fn toggle_playback(&self) -> SessionResult<()> {
        let state = self.state();
        if state.is_playing_audio {
            self.inner.audio.stop_playback().await;
            return Ok(());
        }

        match state.last_recorded_audio {
            Some(segment) => self.play(Some(&segment)).await,
            None => {
                debug!("Nothing recorded yet");
                Ok(())
            }
        }
    }

    pub async fn delete_recording(&self) {
        self.inner.audio.stop_playback().await;
        self.inner.update(|m| m.update(|s| s.last_recorded_audio = None));
        info!("Last recording deleted");
    }

    /// Merge every segment recorded so far and play it with progress
    pub async fn play_full_recording(&self) -> SessionResult<()> {
        self.play(None).await
    }

    /// Play one segment, or the merged session recording when `None`
    async fn play(&self, segment: Option<&AudioSegment>) -> SessionResult<()> {
        let inner = &self.inner;
        inner.partner_playing.store(false, Ordering::SeqCst);

        let result = match segment {
            Some(segment) => inner.audio.play_audio(segment).await,
            None => inner.audio.play_full_recording_with_progress().await,
        };

        if let Err(e) = &result {
            error!("Playback failed: {}", e);
            inner.update(|m| m.update(|s| s.is_playing_audio = false));
        }
        result
    }

    /// Fresh question at the current difficulty; clears the transcript
    pub async fn next_topic(&self) {
        let difficulty = self.state().difficulty_level;
        let loaded = self
            .inner
            .questions
            .lock()
            .await
            .load_question_by_level(difficulty)
            .await;

        if loaded.is_none() {
            warn!("No new topic available, keeping the current one");
        }

        self.inner.update(|m| {
            m.clear_transcript();
            m.update(|s| s.current_prompt_index = 0);
        });
    }

    /// Advance to the next prompt of the current topic, wrapping around
    pub async fn next_prompt(&self) -> String {
        let current = self.state().current_prompt_index;
        let (prompt, next) = {
            let questions = self.inner.questions.lock().await;
            let (prompt, next) = questions.get_next_prompt(current);
            (prompt.to_string(), next)
        };
        self.inner.update(|m| m.update(|s| s.current_prompt_index = next));
        prompt
    }

    pub fn change_match_type(&self, match_type: MatchType) {
        info!("Match type changed to {}", match_type);
        self.inner.update(|m| {
            m.update(|s| s.match_type = match_type);
            m.clear_transcript();
            m.clear_speaking_flags();
        });
    }

    /// Takes effect on the next match or topic load
    pub fn change_difficulty_level(&self, difficulty_level: DifficultyLevel) {
        info!("Difficulty changed to {}", difficulty_level);
        self.inner.update(|m| m.update(|s| s.difficulty_level = difficulty_level));
    }

    /// Release every resource regardless of match state
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        info!("Shutting down session");
        abort_slot(&inner.pending_switch);
        inner.timer.stop_all_timers();
        inner.audio.cleanup().await;
        inner.ai.cleanup().await;
        inner.relay.disconnect();
    }
}

/// `m:ss`
pub fn format_time(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

fn abort_slot(slot: &Mutex<Option<JoinHandle<()>>>) {
    if let Ok(mut slot) = slot.lock() {
        if let Some(task) = slot.take() {
            task.abort();
        }
    }
}

impl Inner {
    fn model(&self) -> MutexGuard<'_, VersusModel> {
        self.model.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply a change to the model and publish the new state
    fn update<R>(&self, f: impl FnOnce(&mut VersusModel) -> R) -> R {
        let (result, snapshot) = {
            let mut model = self.model();
            let result = f(&mut model);
            (result, model.state().clone())
        };
        self.events.emit(SessionEvent::StateChanged(snapshot));
        result
    }

    fn match_started(&self) -> bool {
        self.model().state().match_started
    }

    async fn on_audio_event(self: &Arc<Self>, event: AudioEvent) {
        match event {
            AudioEvent::RecordingState { is_recording, level } => {
                // Level readings queued before a stop are stale
                if is_recording && !self.audio.is_recording().await {
                    return;
                }
                self.update(|m| {
                    m.set_user_speaking(is_recording);
                    m.update(|s| {
                        s.is_recording = is_recording;
                        s.audio_level = level;
                    });
                });
            }
            AudioEvent::RecordingComplete(segment) => {
                if !self.match_started() {
                    debug!("Recording completed outside a match ({} bytes)", segment.len());
                    return;
                }

                let match_type = self.update(|m| {
                    m.add_transcript_message(TranscriptMessage::user(format!(
                        "[voice message, {} bytes]",
                        segment.len()
                    )));
                    m.update(|s| {
                        s.last_recorded_audio = Some(segment.clone());
                        s.full_recording_available = true;
                        s.match_type
                    })
                });

                if match_type == MatchType::HumanVsHuman {
                    self.relay.send_audio(&segment);
                }
            }
            AudioEvent::Warning(e) => warn!("Audio warning: {}", e),
            AudioEvent::PlaybackState { is_playing } => {
                let partner_done = !is_playing && self.partner_playing.swap(false, Ordering::SeqCst);
                self.update(|m| {
                    m.update(|s| s.is_playing_audio = is_playing);
                    if partner_done {
                        m.set_partner_speaking(false);
                    }
                });
            }
            AudioEvent::PlaybackProgress {
                progress,
                current_time,
                duration,
            } => {
                self.update(|m| {
                    m.update(|s| {
                        s.playback_progress = progress;
                        s.current_playback_time = current_time;
                        s.full_recording_duration = duration;
                    })
                });
            }
            AudioEvent::PlaybackError(e) => {
                warn!("Playback error: {}", e);
                let partner_done = self.partner_playing.swap(false, Ordering::SeqCst);
                self.update(|m| {
                    m.update(|s| s.is_playing_audio = false);
                    if partner_done {
                        m.set_partner_speaking(false);
                    }
                });
            }
        }
    }

    fn on_timer_event(self: &Arc<Self>, event: TimerEvent) {
        let TimerEvent::Tick { remaining } = event;
        if !self.match_started() {
            return;
        }

        self.update(|m| m.update(|s| s.remaining_time = remaining));

        if remaining == 0 {
            info!("Countdown expired");
            let controller = VersusSessionController { inner: Arc::clone(self) };
            tokio::spawn(async move {
                controller.end_match().await;
            });
        }
    }

    fn on_ai_event(self: &Arc<Self>, event: AiEvent) {
        match event {
            AiEvent::SpeakingState(speaking) => self.update(|m| m.set_partner_speaking(speaking)),
            AiEvent::ThinkingState(thinking) => self.update(|m| m.update(|s| s.is_partner_thinking = thinking)),
            AiEvent::ResponseGenerated(text) => {
                if !self.match_started() {
                    return;
                }
                let hand_back = self.update(|m| {
                    m.add_transcript_message(TranscriptMessage::partner(text));
                    let s = m.state();
                    s.match_type == MatchType::AiAssisted && s.speaking_turn == SpeakingTurn::Partner
                });

                if hand_back {
                    let controller = VersusSessionController { inner: Arc::clone(self) };
                    tokio::spawn(async move {
                        controller.switch_speaking_turn().await;
                    });
                }
            }
        }
    }

    fn on_inbound_voice(self: &Arc<Self>, voice: InboundVoice) {
        let state = self.model().state().clone();
        if !state.match_started || state.match_type != MatchType::HumanVsHuman {
            debug!("Ignoring peer audio outside a human match");
            return;
        }

        info!("Playing audio from {} ({} bytes)", voice.user_id, voice.segment.len());
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.partner_playing.store(true, Ordering::SeqCst);
            match inner.audio.play_audio(&voice.segment).await {
                Ok(()) => inner.update(|m| m.set_partner_speaking(true)),
                Err(e) => {
                    warn!("Cannot play peer audio: {}", e);
                    inner.partner_playing.store(false, Ordering::SeqCst);
                    inner.update(|m| m.set_partner_speaking(false));
                }
            }
        });
    }
}

/// Folds service events into the session state until the controller is gone
async fn run_event_pump(
    inner: Weak<Inner>,
    mut audio_rx: broadcast::Receiver<AudioEvent>,
    mut timer_rx: broadcast::Receiver<TimerEvent>,
    mut ai_rx: broadcast::Receiver<AiEvent>,
    mut voice_rx: broadcast::Receiver<InboundVoice>,
) {
    enum Next {
        Audio(AudioEvent),
        Timer(TimerEvent),
        Ai(AiEvent),
        Voice(InboundVoice),
        Lagged(u64),
        Closed,
    }

    fn next<T>(result: Result<T, RecvError>, wrap: fn(T) -> Next) -> Next {
        match result {
            Ok(event) => wrap(event),
            Err(RecvError::Lagged(skipped)) => Next::Lagged(skipped),
            Err(RecvError::Closed) => Next::Closed,
        }
    }

    loop {
        let next = tokio::select! {
            r = audio_rx.recv() => next(r, Next::Audio),
            r = timer_rx.recv() => next(r, Next::Timer),
            r = ai_rx.recv() => next(r, Next::Ai),
            r = voice_rx.recv() => next(r, Next::Voice),
        };

        let Some(inner) = inner.upgrade() else {
            break;
        };

        match next {
            Next::Audio(event) => inner.on_audio_event(event).await,
            Next::Timer(event) => inner.on_timer_event(event),
            Next::Ai(event) => inner.on_ai_event(event),
            Next::Voice(voice) => inner.on_inbound_voice(voice),
            Next::Lagged(skipped) => warn!("Session event pump lagged, {} events dropped", skipped),
            Next::Closed => break,
        }
    }

    debug!("Session event pump stopped");
}
