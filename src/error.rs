use std::time::Duration;
use thiserror::Error;

/// Errors produced by the voice pipeline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VoiceError {
    /// Capture or playback device could not be acquired
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Connection failure that the reconnect policy may recover from
    #[error("Connection error: {0}")]
    Connection(String),

    /// Reconnect attempts exhausted; an explicit `connect()` is required
    #[error("Connection lost after {attempts} reconnection attempts")]
    ConnectionLost { attempts: u32 },

    /// Inbound message that does not match any known message kind
    #[error("Protocol parse error: {0}")]
    ProtocolParse(String),

    #[error("Playback error: {0}")]
    Playback(String),

    /// Application-level error reported by the remote service
    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Handshake not acknowledged within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// How an error affects the running session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Session is torn down; the application must act
    Fatal,
    /// Retried internally
    Transient,
    /// Absorbed; the session continues
    Recoverable,
}

impl VoiceError {
    pub fn severity(&self) -> Severity {
        match self {
            VoiceError::DeviceUnavailable(_)
            | VoiceError::ConnectionLost { .. }
            | VoiceError::HandshakeTimeout(_) => Severity::Fatal,
            VoiceError::Connection(_) => Severity::Transient,
            VoiceError::ProtocolParse(_)
            | VoiceError::Playback(_)
            | VoiceError::Remote(_)
            | VoiceError::NotConnected
            | VoiceError::Config(_) => Severity::Recoverable,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl From<serde_json::Error> for VoiceError {
    fn from(e: serde_json::Error) -> Self {
        VoiceError::ProtocolParse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VoiceError>;
