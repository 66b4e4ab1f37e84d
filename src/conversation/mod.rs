//! Conversation runtime
//!
//! This module ties the pipeline together:
//! - `TurnController`: the turn-taking state machine (listening, awaiting a
//!   response, speaking, barge-in)
//! - `ConversationSession`: owns capture, transport and playback and drives
//!   the controller from a single task
//! - Session statistics and the transcript log

mod config;
mod controller;
mod session;
mod stats;

pub use config::{AudioMode, SessionConfig};
pub use controller::{ConversationEvent, TurnController, TurnCounters, TurnState};
pub use session::ConversationSession;
pub use stats::{SessionStats, TranscriptSegment};
