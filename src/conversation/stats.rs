use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::controller::TurnState;

/// Statistics about a conversation session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Turn state at the time of the snapshot
    pub state: TurnState,

    /// When the session started
    pub started_at: DateTime<Utc>,

    /// Total duration in seconds
    pub duration_secs: f64,

    /// Utterances handed to the transport
    pub utterances_sent: usize,

    /// Response turns that reached "complete"
    pub responses_completed: usize,

    /// Barge-ins by the user
    pub interruptions: usize,

    /// Successful automatic reconnects
    pub reconnects: usize,

    /// Number of transcript segments received
    pub transcript_segments_count: usize,
}

/// A single transcript segment from the remote service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Transcribed text
    pub text: String,

    /// When this segment was received
    pub timestamp: DateTime<Utc>,

    /// Whether this is a partial (interim) result
    pub partial: bool,
}
