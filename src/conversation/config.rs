use serde::{Deserialize, Serialize};
use url::Url;

use crate::audio::VadConfig;
use crate::error::VoiceError;
use crate::transport::{SessionParams, TransportConfig, WireKind};

/// How utterance audio goes out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioMode {
    /// Each frame as it is captured, then an end marker
    Streaming,
    /// The whole utterance in one message, then an end marker
    Batched,
}

impl std::str::FromStr for AudioMode {
    type Err = VoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "streaming" => Ok(AudioMode::Streaming),
            "batched" => Ok(AudioMode::Batched),
            other => Err(VoiceError::Config(format!("Unknown audio mode: {}", other))),
        }
    }
}

/// Configuration for a conversation session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Identifier used in logs (e.g., "conversation-3f2a...")
    pub session_id: String,

    pub mode: AudioMode,

    pub wire: WireKind,

    /// Send an explicit interrupt message on barge-in
    pub send_interrupt: bool,

    pub vad: VadConfig,

    pub transport: TransportConfig,

    /// Negotiated in the setup message
    pub params: SessionParams,

    /// Descriptor for response audio that arrives without one
    pub output_descriptor: String,
}

impl SessionConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            session_id: format!("conversation-{}", uuid::Uuid::new_v4()),
            mode: AudioMode::Streaming,
            wire: WireKind::Envelope,
            send_interrupt: false,
            vad: VadConfig::default(),
            transport: TransportConfig::new(endpoint),
            params: SessionParams::default(),
            output_descriptor: "audio/L16;rate=24000".to_string(),
        }
    }
}
