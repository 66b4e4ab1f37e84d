use serde::{Deserialize, Serialize};

/// Message handed to the transport for delivery
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// One captured frame (streaming mode)
    AudioFrame(Vec<i16>),
    /// A whole utterance as 16-bit LE PCM (batched mode)
    AudioBatch(Vec<u8>),
    /// End of the current utterance's audio
    AudioEnd,
    /// User barged in on the remote response
    Interrupt,
    /// Graceful end of conversation
    Stop,
}

/// Remote status values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    /// Session ready; acknowledges the setup message
    Connected,
    Speaking,
    Complete,
    Interrupted,
    Listening,
    Other(String),
}

impl RemoteStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "connected" => RemoteStatus::Connected,
            "speaking" => RemoteStatus::Speaking,
            "complete" => RemoteStatus::Complete,
            "interrupted" => RemoteStatus::Interrupted,
            "listening" => RemoteStatus::Listening,
            other => RemoteStatus::Other(other.to_string()),
        }
    }
}

/// Decoded inbound message, delivered in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Status(RemoteStatus),
    Transcript { text: String, is_final: bool },
    TextChunk(String),
    AudioChunk {
        data: Vec<u8>,
        /// MIME-like descriptor when the wire carries one
        descriptor: Option<String>,
    },
    Error(String),
}

impl InboundEvent {
    pub fn is_handshake_ack(&self) -> bool {
        matches!(self, InboundEvent::Status(RemoteStatus::Connected))
    }
}

/// Outbound envelope of the JSON protocol
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    Setup {
        #[serde(rename = "sampleRate")]
        sample_rate: u32,
        channels: u16,
        voice: String,
        model: String,
    },
    /// Base64-encoded PCM bytes
    Audio { data: String },
    AudioEnd,
    Interrupt,
    Stop,
}

/// Inbound envelope of the JSON protocol, before validation
#[derive(Debug, Deserialize)]
pub struct ServerEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    /// Older servers put the transcript flag next to `data`
    #[serde(default)]
    pub is_final: Option<bool>,
}

/// Structured transcript payload
#[derive(Debug, Serialize, Deserialize)]
pub struct TranscriptData {
    pub text: String,
    #[serde(default)]
    pub is_final: bool,
}
