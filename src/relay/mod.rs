//! Audio relay between the two sides of a human match
//!
//! - `client`: the session's persistent connection (`WebSocketService`)
//! - `messages`: JSON envelopes exchanged over the socket
//! - `server`: broadcast relay for local development and tests
//!   - GET /ws/versus - WebSocket, every text frame goes to every client
//!   - GET /health - Health check

pub mod client;
pub mod messages;
pub mod server;

pub use client::{InboundVoice, WebSocketService};
pub use messages::{UserJoinMessage, VoiceMessage, VoiceMetadata};
pub use server::{create_router, serve, serve_listener, RelayState};
