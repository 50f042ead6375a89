use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval_at, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use versus_session::audio::wav;
use versus_session::{
    format_time, AudioSegment, AudioSource, CaptureBackendFactory, Config, DifficultyLevel, MatchType,
    Participant, SessionEvent, SessionSummary, SpeakingTurn, VersusSessionController,
};

const DEFAULT_CONFIG: &str = "config/versus-session";

#[derive(Parser)]
#[command(name = "versus-session")]
#[command(about = "Timed conversation practice against a relayed peer or a simulated partner")]
struct Cli {
    /// Config file (defaults to config/versus-session.toml when present)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the audio relay server
    Relay {
        #[arg(long)]
        bind: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run a headless match with a WAV file standing in for the microphone
    Practice {
        /// WAV file used as microphone input
        #[arg(short, long)]
        input: Option<String>,

        /// Match type: human or ai
        #[arg(short, long)]
        mode: Option<MatchType>,

        /// Difficulty: beginner, intermediate or advanced
        #[arg(short, long)]
        difficulty: Option<DifficultyLevel>,

        /// Match length in seconds
        #[arg(long)]
        duration: Option<u32>,

        /// Seconds the user speaks before handing over the turn
        #[arg(long, default_value = "10")]
        turn_secs: u64,

        /// Directory to write the recorded segments to
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut cfg = load_config(cli.config.as_deref())?;

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Relay { bind, port } => {
            if let Some(bind) = bind {
                cfg.relay.bind = bind;
            }
            if let Some(port) = port {
                cfg.relay.port = port;
            }
            versus_session::relay::serve(&cfg.relay).await
        }
        Command::Practice {
            input,
            mode,
            difficulty,
            duration,
            turn_secs,
            output_dir,
        } => {
            if let Some(mode) = mode {
                cfg.session.match_type = mode;
            }
            if let Some(difficulty) = difficulty {
                cfg.session.difficulty_level = difficulty;
            }
            if let Some(duration) = duration {
                cfg.session.match_duration_secs = duration;
            }
            if input.is_some() {
                cfg.audio.input_file = input;
            }

            let summary = run_practice(&cfg, Duration::from_secs(turn_secs.max(1))).await?;
            print_transcript(&summary);

            if let Some(dir) = output_dir {
                write_segments(&dir, &summary)?;
            }
            Ok(())
        }
    }
}

fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => match Config::load(DEFAULT_CONFIG) {
            Ok(cfg) => Ok(cfg),
            Err(e) => {
                warn!("Using built-in defaults: {:#}", e);
                Ok(Config::default())
            }
        },
    }
}

async fn run_practice(cfg: &Config, turn: Duration) -> Result<SessionSummary> {
    let source = match &cfg.audio.input_file {
        Some(path) => AudioSource::File(path.clone()),
        None => AudioSource::Microphone,
    };
    let capture = CaptureBackendFactory::create(source).context("No capture input")?;

    let participant = Participant::anonymous();
    info!("Practicing as {} ({})", participant.display_name, participant.user_id);

    let controller = VersusSessionController::from_config(cfg, capture, participant);
    let mut events = controller.subscribe();

    controller.start_match().await.context("Failed to start match")?;

    info!(
        "Match running: {}, {}, {}",
        cfg.session.match_type.label(),
        cfg.session.difficulty_level.label(),
        format_time(cfg.session.match_duration_secs)
    );
    info!("Topic: {}", controller.current_topic().await);
    info!("Prompt: {}", controller.current_prompt().await);

    let mut turns = interval_at(Instant::now() + turn, turn);
    let mut last_reported = cfg.session.match_duration_secs;

    let summary = loop {
        tokio::select! {
            _ = turns.tick() => drive_turn(&controller).await?,
            event = events.recv() => match event {
                Ok(SessionEvent::MatchEnded(summary)) => break summary,
                Ok(SessionEvent::RelayUnavailable(reason)) => {
                    warn!("Practicing without a peer: {}", reason);
                }
                Ok(SessionEvent::StateChanged(state)) => {
                    if state.match_started && state.remaining_time % 30 == 0 && state.remaining_time != last_reported {
                        last_reported = state.remaining_time;
                        info!("Time left: {}", format_time(state.remaining_time));
                    }
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => bail!("Session closed unexpectedly"),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, ending match");
                break controller.end_match().await;
            }
        }
    };

    controller.shutdown().await;
    Ok(summary)
}

/// Act for the headless user: end or resume our turn, or skip a silent peer
async fn drive_turn(controller: &VersusSessionController) -> Result<()> {
    let state = controller.state();
    if !state.match_started {
        return Ok(());
    }

    match (state.speaking_turn, state.match_type) {
        (SpeakingTurn::User, _) => controller.toggle_recording().await?,
        (SpeakingTurn::Partner, MatchType::HumanVsHuman) => {
            if !state.is_partner_speaking {
                controller.skip_partner_turn().await;
            }
        }
        // The simulated partner hands the turn back when it is done
        (SpeakingTurn::Partner, MatchType::AiAssisted) => {}
    }
    Ok(())
}

fn print_transcript(summary: &SessionSummary) {
    println!("Transcript ({} messages):", summary.transcript_messages.len());
    for message in &summary.transcript_messages {
        let speaker = if message.is_user { "you" } else { "partner" };
        println!("  [{}] {}", speaker, message.text);
    }
    println!("Recorded segments: {}", summary.recorded_segments.len());
}

fn write_segments(dir: &Path, summary: &SessionSummary) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    for (idx, segment) in summary.recorded_segments.iter().enumerate() {
        let path = dir.join(format!("segment-{:02}.{}", idx + 1, extension(segment)));
        std::fs::write(&path, segment.data()).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Saved {} ({} bytes)", path.display(), segment.len());
    }

    match wav::merge_segments(&summary.recorded_segments) {
        Ok(Some(merged)) => {
            let path = dir.join(format!("full-session.{}", extension(&merged)));
            std::fs::write(&path, merged.data()).with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Saved full session to {}", path.display());
        }
        Ok(None) => {}
        Err(e) => warn!("Could not merge segments: {}", e),
    }

    Ok(())
}

fn extension(segment: &AudioSegment) -> &'static str {
    match segment.container() {
        c if segment.is_wav() || c.ends_with("wav") => "wav",
        "audio/webm" => "webm",
        "audio/mp4" => "m4a",
        "audio/ogg" => "ogg",
        _ => "bin",
    }
}
