use super::state::{SessionPhase, SessionState, SpeakingTurn, TranscriptMessage};

/// Owner of `SessionState`; every mutation goes through here.
#[derive(Debug, Clone)]
pub struct VersusModel {
    state: SessionState,
    match_duration_secs: u32,
}

impl VersusModel {
    pub fn new(initial: SessionState) -> Self {
        Self {
            match_duration_secs: initial.remaining_time,
            state: initial,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn match_duration_secs(&self) -> u32 {
        self.match_duration_secs
    }

    pub fn update<R>(&mut self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        f(&mut self.state)
    }

    pub fn can_user_speak(&self) -> bool {
        self.state.speaking_turn == SpeakingTurn::User
    }

    pub fn switch_speaking_turn(&mut self) -> SpeakingTurn {
        self.state.speaking_turn = self.state.speaking_turn.other();
        self.state.speaking_turn
    }

    /// Raising one side's flag lowers the other's
    pub fn set_user_speaking(&mut self, speaking: bool) {
        self.state.is_user_speaking = speaking;
        if speaking {
            self.state.is_partner_speaking = false;
        }
    }

    pub fn set_partner_speaking(&mut self, speaking: bool) {
        self.state.is_partner_speaking = speaking;
        if speaking {
            self.state.is_user_speaking = false;
        }
    }

    pub fn clear_speaking_flags(&mut self) {
        self.state.is_user_speaking = false;
        self.state.is_partner_speaking = false;
    }

    pub fn add_transcript_message(&mut self, message: TranscriptMessage) {
        self.state.transcript_messages.push(message);
    }

    pub fn clear_transcript(&mut self) {
        self.state.transcript_messages.clear();
    }

    pub fn take_transcript(&mut self) -> Vec<TranscriptMessage> {
        std::mem::take(&mut self.state.transcript_messages)
    }

    /// Back to idle defaults, keeping match type and difficulty
    pub fn reset_match(&mut self) {
        self.state = SessionState::new(
            self.match_duration_secs,
            self.state.match_type,
            self.state.difficulty_level,
        );
        self.state.phase = SessionPhase::Idle;
    }
}
