use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backend::{select_mime_type, CaptureBackend, CaptureConstraints, CaptureEvent, CaptureOptions};
use super::playback::{PlaybackEvent, PlaybackSink, PlaybackSource};
use super::segment::{AudioSegment, DEFAULT_MIME_TYPE};
use super::wav;
use crate::config::AudioConfig;
use crate::error::{SessionError, SessionResult};
use crate::events::EventBus;

#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    /// Recorder activity plus the current input level (`0..=100`)
    RecordingState { is_recording: bool, level: u8 },
    /// A recorder stopped; the segment is also kept in the session list
    RecordingComplete(AudioSegment),
    /// Non-fatal condition, e.g. a suspiciously small recording
    Warning(SessionError),
    PlaybackState { is_playing: bool },
    /// Full-recording playback position, `progress` in percent
    PlaybackProgress {
        progress: f64,
        current_time: f64,
        duration: f64,
    },
    /// Playback failed after it had started
    PlaybackError(SessionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingMode {
    /// One utterance, short timeslices
    Single,
    /// Whole-match capture
    Continuous,
}

#[derive(Debug, Clone)]
pub struct AudioSettings {
    pub single_timeslice: Duration,
    pub continuous_timeslice: Duration,
    pub level_interval: Duration,
    pub constraints: CaptureConstraints,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self::from(&AudioConfig::default())
    }
}

impl From<&AudioConfig> for AudioSettings {
    fn from(cfg: &AudioConfig) -> Self {
        Self {
            single_timeslice: Duration::from_millis(cfg.single_timeslice_ms),
            continuous_timeslice: Duration::from_millis(cfg.continuous_timeslice_ms),
            level_interval: Duration::from_millis(cfg.level_interval_ms),
            constraints: CaptureConstraints::default(),
        }
    }
}

struct ActiveRecorder {
    mode: RecordingMode,
    task: JoinHandle<AudioSegment>,
}

/// Microphone capture, level metering and playback for one client.
///
/// Owns the capture backend and the playback sink; callers only see segments
/// and events.
pub struct AudioService {
    settings: AudioSettings,
    capture: Mutex<Box<dyn CaptureBackend>>,
    playback: Arc<dyn PlaybackSink>,
    events: EventBus<AudioEvent>,
    recorder: Mutex<Option<ActiveRecorder>>,
    player: StdMutex<Option<JoinHandle<()>>>,
    recorded_segments: Arc<StdMutex<Vec<AudioSegment>>>,
    live_sources: Arc<AtomicUsize>,
}

impl AudioService {
    pub fn new(
        capture: Box<dyn CaptureBackend>,
        playback: Arc<dyn PlaybackSink>,
        settings: AudioSettings,
    ) -> Self {
        info!(
            "Audio service initialized: capture={}, playback={}",
            capture.name(),
            playback.name()
        );

        Self {
            settings,
            capture: Mutex::new(capture),
            playback,
            events: EventBus::new(),
            recorder: Mutex::new(None),
            player: StdMutex::new(None),
            recorded_segments: Arc::new(StdMutex::new(Vec::new())),
            live_sources: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AudioEvent> {
        self.events.subscribe()
    }

    /// Acquire and release the capture device to prime permission
    pub async fn request_microphone_permission(&self) -> SessionResult<()> {
        info!("Requesting microphone permission");
        let mut capture = self.capture.lock().await;
        match capture.request_permission().await {
            Ok(()) => {
                info!("Microphone permission granted ({})", capture.name());
                Ok(())
            }
            Err(e) => {
                error!("Microphone permission failed: {}", e);
                Err(e)
            }
        }
    }

    pub async fn start_recording(&self) -> SessionResult<()> {
        self.start_capture(RecordingMode::Single).await
    }

    pub async fn start_continuous_recording(&self) -> SessionResult<()> {
        self.start_capture(RecordingMode::Continuous).await
    }

    async fn start_capture(&self, mode: RecordingMode) -> SessionResult<()> {
        let mut recorder = self.recorder.lock().await;
        if let Some(active) = recorder.as_ref() {
            if !active.task.is_finished() {
                warn!("Recording already active ({:?})", active.mode);
                return Ok(());
            }
        }

        let timeslice = match mode {
            RecordingMode::Single => self.settings.single_timeslice,
            RecordingMode::Continuous => self.settings.continuous_timeslice,
        };

        let (rx, negotiated) = {
            let mut capture = self.capture.lock().await;
            let negotiated = select_mime_type(&**capture).map(str::to_string);
            match &negotiated {
                Some(mime) => info!("Recording with {} ({:?}, {}ms slices)", mime, mode, timeslice.as_millis()),
                None => info!("Recording with backend default format ({:?}, {}ms slices)", mode, timeslice.as_millis()),
            }

            let options = CaptureOptions {
                mime_type: negotiated.clone(),
                timeslice,
                level_interval: self.settings.level_interval,
                constraints: self.settings.constraints.clone(),
            };

            let rx = capture.start(options).await.map_err(|e| {
                error!("Failed to start recording: {}", e);
                e
            })?;
            (rx, negotiated)
        };

        let task = tokio::spawn(run_recorder(
            rx,
            negotiated,
            self.events.clone(),
            Arc::clone(&self.recorded_segments),
        ));

        *recorder = Some(ActiveRecorder { mode, task });
        Ok(())
    }

    /// Stop whichever recorder is active and return its segment.
    ///
    /// Returns `None` when nothing was recording.
    pub async fn stop_recording(&self) -> Option<AudioSegment> {
        let active = self.recorder.lock().await.take();
        let Some(active) = active else {
            debug!("Stop requested but no recorder is active");
            return None;
        };

        info!("Stopping recording ({:?})", active.mode);

        if let Err(e) = self.capture.lock().await.stop().await {
            error!("Failed to stop capture: {}", e);
        }

        match active.task.await {
            Ok(segment) => Some(segment),
            Err(e) => {
                error!("Recorder task failed: {}", e);
                None
            }
        }
    }

    /// Stop the recorder only if it is the whole-match one
    pub async fn stop_continuous_recording(&self) -> Option<AudioSegment> {
        let continuous = matches!(
            self.recorder.lock().await.as_ref(),
            Some(ActiveRecorder { mode: RecordingMode::Continuous, .. })
        );
        if continuous {
            self.stop_recording().await
        } else {
            None
        }
    }

    pub async fn is_recording(&self) -> bool {
        self.recorder
            .lock()
            .await
            .as_ref()
            .is_some_and(|active| !active.task.is_finished())
    }

    pub async fn recording_mode(&self) -> Option<RecordingMode> {
        self.recorder.lock().await.as_ref().map(|active| active.mode)
    }

    /// Play a buffer, replacing any current playback.
    ///
    /// Resolves once playback has actually started; start failures are returned.
    pub async fn play_audio(&self, segment: &AudioSegment) -> SessionResult<()> {
        self.start_playback(segment, false).await
    }

    /// Merge every recorded segment and play it with progress events
    pub async fn play_full_recording_with_progress(&self) -> SessionResult<()> {
        let merged = self
            .merged_recording()?
            .ok_or_else(|| SessionError::DecodeOrFormat("no recording available".to_string()))?;
        self.start_playback(&merged, true).await
    }

    async fn start_playback(&self, segment: &AudioSegment, with_progress: bool) -> SessionResult<()> {
        self.abort_player();
        self.playback.stop().await;

        info!(
            "Starting playback: {} bytes, {}",
            segment.len(),
            segment.mime_type()
        );

        if segment.is_empty() {
            return Err(SessionError::DecodeOrFormat("audio buffer is empty".to_string()));
        }

        // Released on every exit path below, or by the forwarder once playback ends
        let source = PlaybackSource::new(segment.clone(), Arc::clone(&self.live_sources));

        let mut rx = match self.playback.play(source.segment()).await {
            Ok(rx) => rx,
            Err(e) => {
                error!("Playback failed to start: {}", e);
                self.events.emit(AudioEvent::PlaybackState { is_playing: false });
                return Err(e);
            }
        };

        let mut duration = Duration::ZERO;
        loop {
            match rx.recv().await {
                Some(PlaybackEvent::LoadedMetadata { duration: d }) => {
                    debug!("Playback metadata loaded: {:.2}s", d.as_secs_f64());
                    duration = d;
                    if with_progress {
                        self.events.emit(progress_event(Duration::ZERO, duration));
                    }
                }
                Some(PlaybackEvent::Play) => {
                    self.events.emit(AudioEvent::PlaybackState { is_playing: true });
                    break;
                }
                Some(PlaybackEvent::TimeUpdate { current, duration: d }) => {
                    if with_progress {
                        self.events.emit(progress_event(current, d));
                    }
                }
                Some(PlaybackEvent::Pause) => {}
                Some(PlaybackEvent::Error(e)) => {
                    error!("Playback failed to start: {}", e);
                    self.events.emit(AudioEvent::PlaybackState { is_playing: false });
                    return Err(e);
                }
                Some(PlaybackEvent::Ended) | None => {
                    self.events.emit(AudioEvent::PlaybackState { is_playing: false });
                    return Ok(());
                }
            }
        }

        let events = self.events.clone();
        let player = tokio::spawn(forward_playback(rx, source, events, with_progress));
        if let Ok(mut slot) = self.player.lock() {
            *slot = Some(player);
        }

        Ok(())
    }

    /// Safe to call when nothing is playing
    pub async fn stop_playback(&self) {
        debug!("Stopping playback");
        self.abort_player();
        self.playback.stop().await;
        self.events.emit(AudioEvent::PlaybackState { is_playing: false });
    }

    fn abort_player(&self) {
        if let Ok(mut slot) = self.player.lock() {
            if let Some(player) = slot.take() {
                player.abort();
            }
        }
    }

    pub fn is_playing(&self) -> bool {
        self.player
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|p| !p.is_finished()))
            .unwrap_or(false)
    }

    /// Transient playback resources not yet released
    pub fn live_playback_sources(&self) -> usize {
        self.live_sources.load(Ordering::SeqCst)
    }

    pub fn recorded_segments(&self) -> Vec<AudioSegment> {
        self.recorded_segments
            .lock()
            .map(|segments| segments.clone())
            .unwrap_or_default()
    }

    /// Hand over every recorded segment, leaving the list empty
    pub fn take_recorded_segments(&self) -> Vec<AudioSegment> {
        self.recorded_segments
            .lock()
            .map(|mut segments| std::mem::take(&mut *segments))
            .unwrap_or_default()
    }

    pub fn clear_recorded_segments(&self) {
        if let Ok(mut segments) = self.recorded_segments.lock() {
            segments.clear();
        }
    }

    pub fn merged_recording(&self) -> SessionResult<Option<AudioSegment>> {
        wav::merge_segments(&self.recorded_segments())
    }

    pub async fn cleanup(&self) {
        info!("Releasing audio resources");
        self.stop_recording().await;
        self.stop_playback().await;
    }
}

async fn run_recorder(
    mut rx: mpsc::Receiver<CaptureEvent>,
    negotiated: Option<String>,
    events: EventBus<AudioEvent>,
    recorded_segments: Arc<StdMutex<Vec<AudioSegment>>>,
) -> AudioSegment {
    let mut chunks: Vec<Vec<u8>> = Vec::new();
    let mut first_chunk_type: Option<String> = None;

    while let Some(event) = rx.recv().await {
        match event {
            CaptureEvent::Data { bytes, mime_type } => {
                debug!("Received {} bytes of audio", bytes.len());
                if first_chunk_type.is_none() {
                    first_chunk_type = mime_type;
                }
                if !bytes.is_empty() {
                    chunks.push(bytes);
                }
            }
            CaptureEvent::Level(level) => {
                events.emit(AudioEvent::RecordingState {
                    is_recording: true,
                    level,
                });
            }
        }
    }

    // Capture closed: either stopped or the device went away
    events.emit(AudioEvent::RecordingState {
        is_recording: false,
        level: 0,
    });

    let segment = assemble_segment(chunks, negotiated, first_chunk_type);

    if segment.is_probably_empty() {
        warn!(
            "Recording may be empty or corrupt: {} bytes",
            segment.len()
        );
        events.emit(AudioEvent::Warning(SessionError::EmptyRecording {
            bytes: segment.len(),
        }));
    }

    if let Ok(mut segments) = recorded_segments.lock() {
        segments.push(segment.clone());
    }
    events.emit(AudioEvent::RecordingComplete(segment.clone()));

    segment
}

/// Concatenate captured chunks under the recorder's type, else the first
/// chunk's type, else the default container
pub fn assemble_segment(
    chunks: Vec<Vec<u8>>,
    negotiated: Option<String>,
    first_chunk_type: Option<String>,
) -> AudioSegment {
    if chunks.is_empty() {
        warn!("No audio data captured");
    }

    let mime_type = negotiated
        .filter(|m| !m.is_empty())
        .or(first_chunk_type.filter(|m| !m.is_empty()))
        .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());

    let data: Vec<u8> = chunks.concat();
    info!(
        "Recording processed: {} chunks, {} bytes, {}",
        chunks.len(),
        data.len(),
        mime_type
    );

    AudioSegment::new(data, mime_type)
}

async fn forward_playback(
    mut rx: mpsc::Receiver<PlaybackEvent>,
    source: PlaybackSource,
    events: EventBus<AudioEvent>,
    with_progress: bool,
) {
    while let Some(event) = rx.recv().await {
        match event {
            PlaybackEvent::TimeUpdate { current, duration } => {
                if with_progress {
                    events.emit(progress_event(current, duration));
                }
            }
            PlaybackEvent::Pause => {
                events.emit(AudioEvent::PlaybackState { is_playing: false });
            }
            PlaybackEvent::Ended => {
                debug!("Playback ended ({} bytes)", source.segment().len());
                break;
            }
            PlaybackEvent::Error(e) => {
                error!("Playback error: {}", e);
                events.emit(AudioEvent::PlaybackError(e));
                break;
            }
            PlaybackEvent::LoadedMetadata { .. } | PlaybackEvent::Play => {}
        }
    }

    events.emit(AudioEvent::PlaybackState { is_playing: false });
    drop(source);
}

fn progress_event(current: Duration, duration: Duration) -> AudioEvent {
    let (progress, current_time) = playback_progress(current, duration);
    AudioEvent::PlaybackProgress {
        progress,
        current_time,
        duration: duration.as_secs_f64(),
    }
}

/// Percentage in `[0, 100]` and elapsed seconds in `[0, duration]`
pub fn playback_progress(current: Duration, duration: Duration) -> (f64, f64) {
    let total = duration.as_secs_f64();
    if total <= 0.0 {
        return (0.0, 0.0);
    }
    let current = current.as_secs_f64().clamp(0.0, total);
    ((current / total * 100.0).clamp(0.0, 100.0), current)
}
