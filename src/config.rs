use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use url::Url;

use crate::audio::{AudioBackendConfig, VadConfig};
use crate::conversation::{AudioMode, SessionConfig};
use crate::error::VoiceError;
use crate::transport::{SessionParams, TransportConfig, WireKind};

/// Environment variables override file values, e.g. `DUPLEX_VOICE__VAD__SOUND_THRESHOLD=3.0`
pub const ENV_PREFIX: &str = "DUPLEX_VOICE";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceSection,
    pub audio: AudioSection,
    pub vad: VadSection,
    pub transport: TransportSection,
    pub voice: VoiceSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSection {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioSection {
    pub sample_rate: u32,
    pub frame_size: usize,
    pub channels: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VadSection {
    pub sound_threshold: f32,
    pub hangover_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportSection {
    pub endpoint: String,
    pub mode: AudioMode,
    pub wire: WireKind,
    pub handshake_timeout_ms: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_backoff_ms: u64,
    pub send_interrupt: bool,
    /// Passed to the service as the `material_id` query parameter
    pub material_id: Option<String>,
    /// Passed as the `key` query parameter on the live wire
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceSection {
    pub voice: String,
    pub model: String,
    pub system_instruction: Option<String>,
    pub output_descriptor: String,
}

impl Config {
    /// Load defaults, then the file at `path` (if given), then the environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("service.name", "duplex-voice")?
            .set_default("audio.sample_rate", 16000)?
            .set_default("audio.frame_size", 4096)?
            .set_default("audio.channels", 1)?
            .set_default("vad.sound_threshold", 2.5)?
            .set_default("vad.hangover_ms", 800)?
            .set_default("transport.endpoint", "ws://localhost:8000/ws")?
            .set_default("transport.mode", "streaming")?
            .set_default("transport.wire", "envelope")?
            .set_default("transport.handshake_timeout_ms", 5000)?
            .set_default("transport.max_reconnect_attempts", 3)?
            .set_default("transport.reconnect_backoff_ms", 1000)?
            .set_default("transport.send_interrupt", false)?
            .set_default("voice.voice", "Puck")?
            .set_default("voice.model", "models/gemini-2.0-flash-exp")?
            .set_default("voice.output_descriptor", "audio/L16;rate=24000")?;

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn validate(&self) -> std::result::Result<(), VoiceError> {
        if self.audio.sample_rate == 0 {
            return Err(VoiceError::Config("audio.sample_rate must be positive".into()));
        }
        if self.audio.frame_size == 0 {
            return Err(VoiceError::Config("audio.frame_size must be positive".into()));
        }
        if self.audio.channels != 1 {
            return Err(VoiceError::Config(format!(
                "audio.channels must be 1 (mono), got {}",
                self.audio.channels
            )));
        }
        if !(self.vad.sound_threshold > 0.0) {
            return Err(VoiceError::Config("vad.sound_threshold must be positive".into()));
        }
        self.endpoint_url()?;
        Ok(())
    }

    /// Endpoint with `material_id` and `key` query parameters applied
    pub fn endpoint_url(&self) -> std::result::Result<Url, VoiceError> {
        let mut url = Url::parse(&self.transport.endpoint).map_err(|e| {
            VoiceError::Config(format!("Invalid endpoint '{}': {}", self.transport.endpoint, e))
        })?;

        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(VoiceError::Config(format!(
                    "Endpoint scheme must be ws or wss, got {}",
                    other
                )))
            }
        }

        if let Some(material_id) = &self.transport.material_id {
            url.query_pairs_mut().append_pair("material_id", material_id);
        }
        if self.transport.wire == WireKind::Live {
            if let Some(key) = &self.transport.api_key {
                url.query_pairs_mut().append_pair("key", key);
            }
        }

        Ok(url)
    }

    pub fn backend_config(&self) -> AudioBackendConfig {
        AudioBackendConfig {
            sample_rate: self.audio.sample_rate,
            frame_size: self.audio.frame_size,
            ..Default::default()
        }
    }

    pub fn vad_config(&self) -> VadConfig {
        VadConfig {
            sound_threshold: self.vad.sound_threshold,
            hangover: Duration::from_millis(self.vad.hangover_ms),
        }
    }

    pub fn transport_config(&self) -> std::result::Result<TransportConfig, VoiceError> {
        let mut transport = TransportConfig::new(self.endpoint_url()?);
        transport.handshake_timeout = Duration::from_millis(self.transport.handshake_timeout_ms);
        transport.max_reconnect_attempts = self.transport.max_reconnect_attempts;
        transport.reconnect_backoff = Duration::from_millis(self.transport.reconnect_backoff_ms);
        Ok(transport)
    }

    pub fn session_params(&self) -> SessionParams {
        SessionParams {
            sample_rate: self.audio.sample_rate,
            channels: self.audio.channels,
            bit_depth: 16,
            voice: self.voice.voice.clone(),
            model: self.voice.model.clone(),
            system_instruction: self.voice.system_instruction.clone(),
        }
    }

    pub fn session_config(&self) -> std::result::Result<SessionConfig, VoiceError> {
        let mut session = SessionConfig::new(self.endpoint_url()?);
        session.mode = self.transport.mode;
        session.wire = self.transport.wire;
        session.send_interrupt = self.transport.send_interrupt;
        session.vad = self.vad_config();
        session.transport = self.transport_config()?;
        session.params = self.session_params();
        session.output_descriptor = self.voice.output_descriptor.clone();
        Ok(session)
    }
}
