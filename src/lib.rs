pub mod audio;
pub mod config;
pub mod conversation;
pub mod error;
pub mod playback;
pub mod transport;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFile, AudioFrame, AudioSource, Utterance,
    VadConfig, VadEvent, VoiceActivityDetector,
};
pub use config::Config;
pub use conversation::{
    AudioMode, ConversationEvent, ConversationSession, SessionConfig, SessionStats, TranscriptSegment,
    TurnController, TurnState,
};
pub use error::{Result, Severity, VoiceError};
pub use playback::{AssembledAudio, AudioDescriptor, PlaybackAssembler, PlaybackHandle, PlaybackSink, ResponseTurn};
pub use transport::{
    Connector, DuplexTransport, InboundEvent, OutboundMessage, RemoteStatus, Session, SessionParams,
    TransportConfig, TransportEvent, WebSocketConnector, WireKind,
};
