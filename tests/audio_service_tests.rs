// Integration tests for the audio service
//
// Exercise recording, empty-recording warnings and playback resource release
// through a mock capture backend and headless playback.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use common::{audio_service, wav_segment, MockCapture};
use tokio::sync::{broadcast, mpsc};
use versus_session::audio::{AudioEvent, AudioService, AudioSettings, PlaybackEvent, PlaybackSink, RecordingMode};
use versus_session::{AudioSegment, SessionError, SessionResult};

/// Output that refuses to start, like a device held back by autoplay policy
struct BlockedPlayback;

#[async_trait::async_trait]
impl PlaybackSink for BlockedPlayback {
    async fn play(&self, _segment: &AudioSegment) -> SessionResult<mpsc::Receiver<PlaybackEvent>> {
        Err(SessionError::PlaybackBlocked("output not yet allowed".to_string()))
    }

    async fn stop(&self) {}

    fn name(&self) -> &str {
        "blocked"
    }
}

/// Collect audio events until `done` matches or the timeout passes
async fn collect_until(
    rx: &mut broadcast::Receiver<AudioEvent>,
    timeout: Duration,
    done: impl Fn(&AudioEvent) -> bool,
) -> Vec<AudioEvent> {
    let mut events = Vec::new();
    let _ = tokio::time::timeout(timeout, async {
        while let Ok(event) = rx.recv().await {
            let finished = done(&event);
            events.push(event);
            if finished {
                break;
            }
        }
    })
    .await;
    events
}

#[tokio::test]
async fn test_small_recordings_warn_but_complete() -> Result<()> {
    for size in [0usize, 50] {
        let audio = audio_service(MockCapture::new(vec![1u8; size]));
        let mut rx = audio.subscribe();

        audio.start_recording().await?;
        let segment = audio.stop_recording().await.expect("segment");
        assert_eq!(segment.len(), size);

        let events = collect_until(&mut rx, Duration::from_secs(1), |e| {
            matches!(e, AudioEvent::RecordingComplete(_))
        })
        .await;

        assert!(
            events.contains(&AudioEvent::Warning(SessionError::EmptyRecording { bytes: size })),
            "{} byte recording should warn",
            size
        );
        assert!(
            matches!(events.last(), Some(AudioEvent::RecordingComplete(seg)) if seg.len() == size),
            "{} byte recording should still complete",
            size
        );
        assert_eq!(audio.recorded_segments().len(), 1);
    }

    Ok(())
}

#[tokio::test]
async fn test_recording_reports_levels_and_mode() -> Result<()> {
    let audio = audio_service(MockCapture::new(vec![2u8; 400]));
    let mut rx = audio.subscribe();

    audio.start_continuous_recording().await?;
    assert!(audio.is_recording().await);
    assert_eq!(audio.recording_mode().await, Some(RecordingMode::Continuous));

    // Second start while active is ignored
    audio.start_recording().await?;
    assert_eq!(audio.recording_mode().await, Some(RecordingMode::Continuous));

    let segment = audio.stop_continuous_recording().await.expect("segment");
    assert_eq!(segment.mime_type(), "audio/webm;codecs=opus");
    assert!(!audio.is_recording().await);
    assert!(audio.stop_recording().await.is_none(), "Nothing left to stop");

    let events = collect_until(&mut rx, Duration::from_secs(1), |e| {
        matches!(e, AudioEvent::RecordingComplete(_))
    })
    .await;
    assert!(events.contains(&AudioEvent::RecordingState { is_recording: true, level: 40 }));
    assert!(events.contains(&AudioEvent::RecordingState { is_recording: false, level: 0 }));
    assert!(!events.iter().any(|e| matches!(e, AudioEvent::Warning(_))));

    Ok(())
}

#[tokio::test]
async fn test_take_recorded_segments_empties_list() -> Result<()> {
    let audio = audio_service(MockCapture::new(vec![3u8; 200]));

    for _ in 0..3 {
        audio.start_recording().await?;
        audio.stop_recording().await;
    }
    assert_eq!(audio.recorded_segments().len(), 3);

    let taken = audio.take_recorded_segments();
    assert_eq!(taken.len(), 3);
    assert!(audio.recorded_segments().is_empty());

    audio.start_recording().await?;
    audio.stop_recording().await;
    audio.clear_recorded_segments();
    assert!(audio.recorded_segments().is_empty());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_playback_releases_sources() -> Result<()> {
    let audio = audio_service(MockCapture::new(Vec::new()));
    let mut rx = audio.subscribe();

    // 0.5s clip
    audio.play_audio(&wav_segment(8000)).await?;
    assert!(audio.is_playing());
    assert_eq!(audio.live_playback_sources(), 1);

    let events = collect_until(&mut rx, Duration::from_secs(2), |e| {
        matches!(e, AudioEvent::PlaybackState { is_playing: false })
    })
    .await;
    assert_eq!(events.first(), Some(&AudioEvent::PlaybackState { is_playing: true }));
    assert!(!events.iter().any(|e| matches!(e, AudioEvent::PlaybackProgress { .. })));

    tokio::task::yield_now().await;
    assert_eq!(audio.live_playback_sources(), 0);
    assert!(!audio.is_playing());

    // Failed start releases immediately
    let webm = versus_session::AudioSegment::new(vec![0u8; 512], "audio/webm");
    let err = audio.play_audio(&webm).await.unwrap_err();
    assert!(matches!(err, SessionError::DecodeOrFormat(_)));
    assert_eq!(audio.live_playback_sources(), 0);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_playback_mid_clip() -> Result<()> {
    let audio = audio_service(MockCapture::new(Vec::new()));

    // 2s clip
    audio.play_audio(&wav_segment(32000)).await?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(audio.live_playback_sources(), 1);

    audio.stop_playback().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!audio.is_playing());
    assert_eq!(audio.live_playback_sources(), 0);

    // Stopping again is harmless
    audio.stop_playback().await;

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_full_recording_progress_events() -> Result<()> {
    // Two 0.5s utterances
    let audio = audio_service(MockCapture::wav(8000));
    for _ in 0..2 {
        audio.start_recording().await?;
        audio.stop_recording().await;
    }

    let mut rx = audio.subscribe();
    audio.play_full_recording_with_progress().await?;

    let events = collect_until(&mut rx, Duration::from_secs(3), |e| {
        matches!(e, AudioEvent::PlaybackState { is_playing: false })
    })
    .await;

    let progress: Vec<(f64, f64, f64)> = events
        .iter()
        .filter_map(|e| match e {
            AudioEvent::PlaybackProgress { progress, current_time, duration } => {
                Some((*progress, *current_time, *duration))
            }
            _ => None,
        })
        .collect();

    assert!(progress.len() >= 2);
    assert_eq!(progress.first().map(|p| p.0), Some(0.0));
    let (last_progress, last_time, duration) = progress[progress.len() - 1];
    assert!((duration - 1.0).abs() < 1e-6, "Merged recording should be 1s");
    assert!((last_progress - 100.0).abs() < 1e-6);
    assert!((last_time - 1.0).abs() < 1e-6);
    assert!(progress.windows(2).all(|w| w[0].0 <= w[1].0), "Progress should not go backwards");

    Ok(())
}

#[tokio::test]
async fn test_full_recording_without_segments() -> Result<()> {
    let audio = audio_service(MockCapture::new(Vec::new()));
    let err = audio.play_full_recording_with_progress().await.unwrap_err();
    assert!(matches!(err, SessionError::DecodeOrFormat(_)));
    Ok(())
}

#[tokio::test]
async fn test_blocked_output_is_reported_and_released() -> Result<()> {
    let audio = AudioService::new(
        Box::new(MockCapture::wav(8000)),
        Arc::new(BlockedPlayback),
        AudioSettings::default(),
    );
    let mut rx = audio.subscribe();

    let err = audio.play_audio(&wav_segment(8000)).await.unwrap_err();
    assert!(matches!(err, SessionError::PlaybackBlocked(_)), "{:?}", err);
    assert!(err.is_fatal());
    assert!(!audio.is_playing());
    assert_eq!(audio.live_playback_sources(), 0);
    assert_eq!(rx.try_recv().ok(), Some(AudioEvent::PlaybackState { is_playing: false }));

    // The full recording path reports it the same way
    audio.start_recording().await?;
    audio.stop_recording().await;
    let err = audio.play_full_recording_with_progress().await.unwrap_err();
    assert!(matches!(err, SessionError::PlaybackBlocked(_)));
    assert_eq!(audio.live_playback_sources(), 0);

    Ok(())
}
