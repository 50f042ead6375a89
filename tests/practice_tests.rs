// Integration tests for headless practice matches
//
// These tests drive a configured session with a WAV file standing in for the
// microphone, the way the `practice` command does.

mod common;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use common::{next_event, wait_for_state};
use tempfile::TempDir;
use versus_session::audio::wav;
use versus_session::{
    Config, MatchType, Participant, SessionEvent, SpeakingTurn, StrategyKind, VersusSessionController,
    WavFileBackend,
};

fn write_wav(path: &Path, seconds: u32) -> Result<PathBuf> {
    let samples: Vec<i16> = (0..16000 * seconds).map(|i| ((i % 100) as i16 - 50) * 200).collect();
    std::fs::write(path, wav::encode(&samples, 16000, 1)?)?;
    Ok(path.to_path_buf())
}

fn ai_config(duration: u32) -> Config {
    let mut cfg = Config::default();
    cfg.session.match_type = MatchType::AiAssisted;
    cfg.session.match_duration_secs = duration;
    cfg
}

#[tokio::test(start_paused = true)]
async fn test_file_input_match_runs_to_completion() -> Result<()> {
    let dir = TempDir::new()?;
    let input = write_wav(&dir.path().join("input.wav"), 3)?;

    let session = VersusSessionController::from_config(
        &ai_config(20),
        Box::new(WavFileBackend::new(&input)),
        Participant::anonymous(),
    );
    let mut events = session.subscribe();

    session.start_match().await?;
    assert!(!session.current_topic().await.is_empty());

    // The input runs out after 3s and completes the utterance on its own
    assert!(
        wait_for_state(&session, Duration::from_secs(5), |s| s.full_recording_available).await,
        "Exhausted input should complete a recording"
    );
    assert!(!session.audio().is_recording().await);

    let summary = next_event(&mut events, Duration::from_secs(30), |e| match e {
        SessionEvent::MatchEnded(summary) => Some(summary),
        _ => None,
    })
    .await
    .expect("Countdown should end the match");

    assert_eq!(summary.recorded_segments.len(), 1);
    let audio = wav::decode(summary.recorded_segments[0].data())?;
    assert_eq!(audio.samples.len(), 48000);
    assert_eq!(summary.transcript_messages.len(), 1);
    assert!(summary.transcript_messages[0].is_user);

    Ok(())
}

#[tokio::test]
async fn test_fixed_topic_overrides_bank_in_ai_mode() -> Result<()> {
    let dir = TempDir::new()?;
    let input = write_wav(&dir.path().join("input.wav"), 1)?;

    let mut cfg = ai_config(60);
    cfg.ai.fixed_topic = Some("Remote work".to_string());
    cfg.ai.fixed_prompts = vec!["Do you prefer working from home?".to_string()];

    let session = VersusSessionController::from_config(&cfg, Box::new(WavFileBackend::new(&input)), Participant::anonymous());
    session.start_match().await?;

    assert_eq!(session.current_topic().await, "Remote work");
    assert_eq!(session.current_prompt().await, "Do you prefer working from home?");
    assert_eq!(session.next_prompt().await, "Do you prefer working from home?");

    session.end_match().await;
    assert_ne!(session.current_topic().await, "Remote work", "Override ends with the match");

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_scripted_partner_plays_clips() -> Result<()> {
    let dir = TempDir::new()?;
    let input = write_wav(&dir.path().join("input.wav"), 10)?;
    let clips = dir.path().join("clips");
    std::fs::create_dir(&clips)?;
    write_wav(&clips.join("1.wav"), 1)?;

    let mut cfg = ai_config(120);
    cfg.ai.strategy = StrategyKind::Scripted;
    cfg.ai.clips_dir = Some(clips.to_string_lossy().into_owned());

    let session = VersusSessionController::from_config(&cfg, Box::new(WavFileBackend::new(&input)), Participant::anonymous());
    session.start_match().await?;

    tokio::time::sleep(Duration::from_millis(500)).await;
    session.toggle_recording().await?;

    assert!(wait_for_state(&session, Duration::from_secs(1), |s| s.speaking_turn == SpeakingTurn::Partner).await);
    assert!(wait_for_state(&session, Duration::from_secs(1), |s| s.is_partner_thinking).await);

    // First scripted turn thinks for 3s before the clip starts
    assert!(
        wait_for_state(&session, Duration::from_secs(4), |s| s.is_partner_speaking && !s.is_partner_thinking).await,
        "Clip should start after thinking"
    );
    assert!(
        wait_for_state(&session, Duration::from_secs(3), |s| s.speaking_turn == SpeakingTurn::User).await,
        "Turn should return once the clip ends"
    );

    let state = session.state();
    assert!(!state.is_partner_speaking);
    assert_eq!(state.transcript_messages.iter().filter(|m| !m.is_user).count(), 1);

    session.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_scripted_partner_hands_back_after_script_runs_out() -> Result<()> {
    let dir = TempDir::new()?;
    let input = write_wav(&dir.path().join("input.wav"), 10)?;
    let clips = dir.path().join("clips");
    std::fs::create_dir(&clips)?;
    for n in 1..=6 {
        write_wav(&clips.join(format!("{}.wav", n)), 1)?;
    }

    let mut cfg = ai_config(300);
    cfg.ai.strategy = StrategyKind::Scripted;
    cfg.ai.clips_dir = Some(clips.to_string_lossy().into_owned());

    let session = VersusSessionController::from_config(&cfg, Box::new(WavFileBackend::new(&input)), Participant::anonymous());
    session.start_match().await?;

    // Six scripted turns, then one more past the end of the script
    for turn in 1..=7 {
        if turn > 1 {
            session.toggle_recording().await?;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        session.toggle_recording().await?;

        assert!(
            wait_for_state(&session, Duration::from_secs(1), |s| s.speaking_turn == SpeakingTurn::Partner).await,
            "Turn {} should pass to the partner",
            turn
        );
        assert!(
            wait_for_state(&session, Duration::from_secs(10), |s| s.speaking_turn == SpeakingTurn::User).await,
            "Partner should hand turn {} back",
            turn
        );
    }

    let state = session.state();
    assert!(!state.is_partner_speaking && !state.is_partner_thinking);
    assert_eq!(state.transcript_messages.iter().filter(|m| !m.is_user).count(), 7);

    session.shutdown().await;
    Ok(())
}
