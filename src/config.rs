use anyhow::{Context, Result};
use serde::Deserialize;

use crate::ai::StrategyKind;
use crate::session::{DifficultyLevel, MatchType};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub relay: RelayConfig,
    pub session: SessionConfig,
    pub audio: AudioConfig,
    pub ai: AiConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "versus-session".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Endpoint the session client connects to
    pub url: String,
    /// Handshake deadline for the session client
    pub connect_timeout_ms: u64,
    /// Relay server bind address
    pub bind: String,
    pub port: u16,
    /// Frames buffered per client before a slow client starts losing frames
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8090/ws/versus".to_string(),
            connect_timeout_ms: 10_000,
            bind: "127.0.0.1".to_string(),
            port: 8090,
            channel_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Countdown length of one match
    pub match_duration_secs: u32,
    /// Grace delay between the end of the user's turn and the turn switch
    pub turn_switch_delay_ms: u64,
    pub match_type: MatchType,
    pub difficulty_level: DifficultyLevel,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            match_duration_secs: 300,
            turn_switch_delay_ms: 300,
            match_type: MatchType::HumanVsHuman,
            difficulty_level: DifficultyLevel::Intermediate,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub single_timeslice_ms: u64,
    pub continuous_timeslice_ms: u64,
    /// How often capture backends report the input level
    pub level_interval_ms: u64,
    /// WAV file standing in for the microphone
    pub input_file: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            single_timeslice_ms: 250,
            continuous_timeslice_ms: 1000,
            level_interval_ms: 50,
            input_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub strategy: StrategyKind,
    /// Directory holding the scripted clips `1.wav` .. `6.wav`
    pub clips_dir: Option<String>,
    /// Topic forced in AI mode, overriding the question bank
    pub fixed_topic: Option<String>,
    pub fixed_prompts: Vec<String>,
}

impl Config {
    /// Load a config file (any format `config` understands), then apply
    /// `VERSUS__SECTION__KEY` environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("VERSUS").separator("__"))
            .build()
            .with_context(|| format!("Failed to read config {}", path))?;

        settings
            .try_deserialize()
            .context("Failed to parse configuration")
    }
}
