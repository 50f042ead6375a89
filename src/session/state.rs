use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::audio::AudioSegment;
pub use crate::questions::DifficultyLevel;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    #[default]
    #[serde(alias = "真人对战")]
    HumanVsHuman,
    #[serde(alias = "AI辅助")]
    AiAssisted,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::HumanVsHuman => "human_vs_human",
            MatchType::AiAssisted => "ai_assisted",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MatchType::HumanVsHuman => "真人对战",
            MatchType::AiAssisted => "AI辅助",
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "human_vs_human" | "human" | "真人对战" => Ok(MatchType::HumanVsHuman),
            "ai_assisted" | "ai" | "ai辅助" => Ok(MatchType::AiAssisted),
            other => Err(format!("unknown match type: {}", other)),
        }
    }
}

/// Who may transmit right now
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakingTurn {
    #[default]
    User,
    Partner,
}

impl SpeakingTurn {
    pub fn other(self) -> Self {
        match self {
            SpeakingTurn::User => SpeakingTurn::Partner,
            SpeakingTurn::Partner => SpeakingTurn::User,
        }
    }
}

/// Session lifecycle: `Idle -> Starting -> Running -> Ending -> Idle`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    #[default]
    Idle,
    Starting,
    Running,
    Ending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptMessage {
    pub is_user: bool,
    pub text: String,
}

impl TranscriptMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            is_user: true,
            text: text.into(),
        }
    }

    pub fn partner(text: impl Into<String>) -> Self {
        Self {
            is_user: false,
            text: text.into(),
        }
    }
}

/// Everything the presentation layer renders for one versus session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub phase: SessionPhase,
    pub match_started: bool,
    /// Seconds left on the countdown
    pub remaining_time: u32,
    pub match_type: MatchType,
    pub difficulty_level: DifficultyLevel,

    pub user_muted: bool,
    pub is_user_speaking: bool,
    pub is_partner_speaking: bool,
    pub is_partner_thinking: bool,

    pub is_recording: bool,
    pub audio_level: u8,
    #[serde(skip)]
    pub last_recorded_audio: Option<AudioSegment>,
    pub is_playing_audio: bool,

    pub full_recording_available: bool,
    pub full_recording_duration: f64,
    pub playback_progress: f64,
    pub current_playback_time: f64,

    pub speaking_turn: SpeakingTurn,
    pub current_prompt_index: usize,
    pub transcript_messages: Vec<TranscriptMessage>,
}

impl SessionState {
    pub fn new(match_duration_secs: u32, match_type: MatchType, difficulty_level: DifficultyLevel) -> Self {
        Self {
            phase: SessionPhase::Idle,
            match_started: false,
            remaining_time: match_duration_secs,
            match_type,
            difficulty_level,
            user_muted: false,
            is_user_speaking: false,
            is_partner_speaking: false,
            is_partner_thinking: false,
            is_recording: false,
            audio_level: 0,
            last_recorded_audio: None,
            is_playing_audio: false,
            full_recording_available: false,
            full_recording_duration: 0.0,
            playback_progress: 0.0,
            current_playback_time: 0.0,
            speaking_turn: SpeakingTurn::User,
            current_prompt_index: 0,
            transcript_messages: Vec::new(),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(300, MatchType::HumanVsHuman, DifficultyLevel::Intermediate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_type_accepts_labels() {
        assert_eq!("AI辅助".parse::<MatchType>().unwrap(), MatchType::AiAssisted);
        assert_eq!("human".parse::<MatchType>().unwrap(), MatchType::HumanVsHuman);

        let parsed: MatchType = serde_json::from_str("\"真人对战\"").unwrap();
        assert_eq!(parsed, MatchType::HumanVsHuman);
    }

    #[test]
    fn test_turn_complement() {
        assert_eq!(SpeakingTurn::User.other(), SpeakingTurn::Partner);
        assert_eq!(SpeakingTurn::Partner.other().other(), SpeakingTurn::Partner);
    }

    #[test]
    fn test_state_serializes_camel_case() {
        let json = serde_json::to_value(SessionState::default()).unwrap();
        assert_eq!(json["remainingTime"], 300);
        assert_eq!(json["speakingTurn"], "user");
        assert_eq!(json["matchType"], "human_vs_human");
        assert!(json.get("lastRecordedAudio").is_none());
    }
}
