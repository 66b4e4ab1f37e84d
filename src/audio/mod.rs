pub mod backend;
pub mod file;
pub mod vad;

#[cfg(feature = "audio-io")]
pub mod microphone;

pub use backend::{rms_energy, AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource, ENERGY_SCALE};
pub use file::{AudioFile, FileBackend};
pub use vad::{Utterance, UtteranceBuilder, VadConfig, VadEvent, VoiceActivityDetector};

#[cfg(feature = "audio-io")]
pub use microphone::MicrophoneBackend;
