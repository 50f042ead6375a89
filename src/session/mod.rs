//! Versus session management
//!
//! This module provides the `VersusSessionController` that manages:
//! - Match lifecycle (start, countdown, end)
//! - Speaking turns between the user and the partner
//! - Recording, playback and peer audio relay
//! - Topic and prompt selection
//! - Session state owned by `VersusModel`

mod controller;
mod model;
mod participant;
mod state;

pub use controller::{
    format_time, SessionEvent, SessionOptions, SessionServices, SessionSummary, VersusSessionController,
};
pub use model::VersusModel;
pub use participant::Participant;
pub use state::{DifficultyLevel, MatchType, SessionPhase, SessionState, SpeakingTurn, TranscriptMessage};
