use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::segment::AudioSegment;
use super::wav;
use crate::error::{SessionError, SessionResult};

/// Lifecycle of one playback, in the order a media element reports it
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    LoadedMetadata { duration: Duration },
    Play,
    TimeUpdate { current: Duration, duration: Duration },
    Pause,
    Ended,
    Error(SessionError),
}

/// Audio output abstraction
///
/// `play` replaces whatever the sink was playing. The receiver closes after
/// `Ended`, `Error` or `stop`.
#[async_trait::async_trait]
pub trait PlaybackSink: Send + Sync {
    async fn play(&self, segment: &AudioSegment) -> SessionResult<mpsc::Receiver<PlaybackEvent>>;

    async fn stop(&self);

    fn name(&self) -> &str;
}

/// Transient handle to a buffer being played.
///
/// Counts itself in the owner's live-source gauge until dropped, so a leaked
/// handle shows up as a non-zero count.
#[derive(Debug)]
pub struct PlaybackSource {
    segment: AudioSegment,
    live: Arc<AtomicUsize>,
}

impl PlaybackSource {
    pub fn new(segment: AudioSegment, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self { segment, live }
    }

    pub fn segment(&self) -> &AudioSegment {
        &self.segment
    }
}

impl Drop for PlaybackSource {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Playback clock without an output device.
///
/// Decodes WAV metadata and reports the media lifecycle in real time, which is
/// all the session runtime observes of playback.
pub struct HeadlessPlayback {
    update_interval: Duration,
    current: Mutex<Option<JoinHandle<()>>>,
}

impl HeadlessPlayback {
    pub fn new() -> Self {
        Self::with_update_interval(Duration::from_millis(250))
    }

    pub fn with_update_interval(update_interval: Duration) -> Self {
        Self {
            update_interval,
            current: Mutex::new(None),
        }
    }

    fn replace_current(&self, task: Option<JoinHandle<()>>) {
        if let Ok(mut slot) = self.current.lock() {
            if let Some(previous) = slot.take() {
                previous.abort();
            }
            *slot = task;
        }
    }
}

impl Default for HeadlessPlayback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PlaybackSink for HeadlessPlayback {
    async fn play(&self, segment: &AudioSegment) -> SessionResult<mpsc::Receiver<PlaybackEvent>> {
        self.replace_current(None);

        if !segment.is_wav() {
            return Err(SessionError::DecodeOrFormat(format!(
                "unsupported audio format: {}",
                segment.mime_type()
            )));
        }

        let audio = wav::decode(segment.data())?;
        let duration = audio.duration();
        let update_interval = self.update_interval;

        info!("Headless playback: {:.2}s", duration.as_secs_f64());

        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now();

            if tx.send(PlaybackEvent::LoadedMetadata { duration }).await.is_err() {
                return;
            }
            if tx.send(PlaybackEvent::Play).await.is_err() {
                return;
            }

            loop {
                let remaining = duration.saturating_sub(start.elapsed());
                if remaining.is_zero() {
                    break;
                }
                tokio::time::sleep(remaining.min(update_interval)).await;

                let current = start.elapsed().min(duration);
                if tx.send(PlaybackEvent::TimeUpdate { current, duration }).await.is_err() {
                    return;
                }
            }

            let _ = tx.send(PlaybackEvent::Ended).await;
            debug!("Headless playback ended");
        });

        self.replace_current(Some(task));
        Ok(rx)
    }

    async fn stop(&self) {
        self.replace_current(None);
    }

    fn name(&self) -> &str {
        "headless"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::{encode, WAV_MIME_TYPE};

    #[test]
    fn test_source_counts_until_dropped() {
        let live = Arc::new(AtomicUsize::new(0));
        let a = PlaybackSource::new(AudioSegment::empty("audio/wav"), Arc::clone(&live));
        let b = PlaybackSource::new(AudioSegment::empty("audio/wav"), Arc::clone(&live));
        assert_eq!(live.load(Ordering::SeqCst), 2);

        drop(a);
        drop(b);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_headless_lifecycle() {
        let sink = HeadlessPlayback::new();
        // 0.5s of audio
        let segment = AudioSegment::new(encode(&[0; 8000], 16000, 1).unwrap(), WAV_MIME_TYPE);

        let mut rx = sink.play(&segment).await.unwrap();
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        let duration = Duration::from_millis(500);
        assert_eq!(events.first(), Some(&PlaybackEvent::LoadedMetadata { duration }));
        assert_eq!(events.get(1), Some(&PlaybackEvent::Play));
        assert_eq!(events.last(), Some(&PlaybackEvent::Ended));
        assert!(events.contains(&PlaybackEvent::TimeUpdate { current: duration, duration }));
    }

    #[tokio::test]
    async fn test_headless_rejects_non_wav() {
        let sink = HeadlessPlayback::new();
        let segment = AudioSegment::new(vec![0u8; 512], "audio/webm;codecs=opus");

        let err = sink.play(&segment).await.unwrap_err();
        assert!(matches!(err, SessionError::DecodeOrFormat(_)));
    }
}
