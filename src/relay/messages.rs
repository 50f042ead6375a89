use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::audio::segment::DEFAULT_MIME_TYPE;
use crate::audio::AudioSegment;
use crate::error::{SessionError, SessionResult};

pub const VOICE: &str = "voice";
pub const USER_JOIN: &str = "user_join";

/// Recorded utterance relayed to the peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub user_id: String,
    pub audio_data: String, // Base64-encoded audio bytes
    pub format: String,
    pub metadata: VoiceMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceMetadata {
    pub size: usize,
    pub timestamp: i64, // Unix milliseconds
    pub mime_type: String,
}

impl VoiceMessage {
    pub fn new(user_id: &str, segment: &AudioSegment) -> Self {
        Self {
            message_type: VOICE.to_string(),
            user_id: user_id.to_string(),
            audio_data: base64::engine::general_purpose::STANDARD.encode(segment.data()),
            format: segment.mime_type().to_string(),
            metadata: VoiceMetadata {
                size: segment.len(),
                timestamp: chrono::Utc::now().timestamp_millis(),
                mime_type: segment.mime_type().to_string(),
            },
        }
    }

    /// Decode the payload back into a playable segment
    pub fn to_segment(&self) -> SessionResult<AudioSegment> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&self.audio_data)
            .map_err(|e| SessionError::DecodeOrFormat(format!("invalid voice payload: {}", e)))?;

        let mime_type = [&self.metadata.mime_type, &self.format]
            .into_iter()
            .find(|m| !m.is_empty())
            .map(String::as_str)
            .unwrap_or(DEFAULT_MIME_TYPE);

        Ok(AudioSegment::new(bytes, mime_type))
    }
}

/// Presence announcement sent first on every connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserJoinMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub user_id: String,
    pub user_name: String,
}

impl UserJoinMessage {
    pub fn new(user_id: &str, user_name: &str) -> Self {
        Self {
            message_type: USER_JOIN.to_string(),
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
        }
    }
}

/// The `type` field of an inbound frame, if it has one
pub fn message_type(value: &serde_json::Value) -> Option<&str> {
    value.get("type").and_then(|t| t.as_str())
}
