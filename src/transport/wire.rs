//! Wire-format adapters
//!
//! The transport speaks one protocol per session. Each adapter turns outbound
//! messages into frames and validates inbound frames into `InboundEvent`s;
//! anything that does not match a known message kind becomes
//! `VoiceError::ProtocolParse`.

use base64::Engine;
use serde::{Deserialize, Serialize};

use super::client::SessionParams;
use super::connection::WireFrame;
use super::messages::{ClientEnvelope, InboundEvent, OutboundMessage, RemoteStatus, ServerEnvelope, TranscriptData};
use crate::error::{Result, VoiceError};

fn b64() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

pub trait WireFormat: Send + Sync {
    fn name(&self) -> &'static str;

    /// The first message of every connection
    fn encode_setup(&self, params: &SessionParams) -> Result<WireFrame>;

    /// Frames for one outbound message; empty if the protocol has no equivalent
    fn encode(&self, message: &OutboundMessage, params: &SessionParams) -> Result<Vec<WireFrame>>;

    /// Validate one inbound frame
    fn decode(&self, frame: &WireFrame) -> Result<Vec<InboundEvent>>;
}

/// Selects a wire format from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireKind {
    Envelope,
    Live,
}

impl WireKind {
    pub fn build(self) -> Box<dyn WireFormat> {
        match self {
            WireKind::Envelope => Box::new(EnvelopeWire::new()),
            WireKind::Live => Box::new(LiveWire::new()),
        }
    }
}

impl std::str::FromStr for WireKind {
    type Err = VoiceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "envelope" => Ok(WireKind::Envelope),
            "live" => Ok(WireKind::Live),
            other => Err(VoiceError::Config(format!("Unknown wire format: {}", other))),
        }
    }
}

// ============================================================================
// Typed JSON envelopes: {"type": "...", "data": ...}
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct EnvelopeWire;

impl EnvelopeWire {
    pub fn new() -> Self {
        Self
    }

    fn text(envelope: &ClientEnvelope) -> Result<WireFrame> {
        Ok(WireFrame::Text(serde_json::to_string(envelope)?))
    }

    fn string_data(envelope: &ServerEnvelope) -> Result<String> {
        match &envelope.data {
            Some(serde_json::Value::String(s)) => Ok(s.clone()),
            other => Err(VoiceError::ProtocolParse(format!(
                "'{}' message expects string data, got {:?}",
                envelope.kind, other
            ))),
        }
    }

    fn decode_envelope(envelope: ServerEnvelope) -> Result<InboundEvent> {
        match envelope.kind.as_str() {
            "status" => Ok(InboundEvent::Status(RemoteStatus::parse(&Self::string_data(&envelope)?))),
            "transcript" => match envelope.data {
                Some(serde_json::Value::String(text)) => Ok(InboundEvent::Transcript {
                    text,
                    is_final: envelope.is_final.unwrap_or(false),
                }),
                Some(data) => {
                    let transcript: TranscriptData = serde_json::from_value(data)?;
                    Ok(InboundEvent::Transcript {
                        text: transcript.text,
                        is_final: transcript.is_final,
                    })
                }
                None => Err(VoiceError::ProtocolParse("transcript without data".into())),
            },
            "text" | "text_chunk" => Ok(InboundEvent::TextChunk(Self::string_data(&envelope)?)),
            "audio" => {
                let encoded = Self::string_data(&envelope)?;
                let data = b64()
                    .decode(encoded.as_bytes())
                    .map_err(|e| VoiceError::ProtocolParse(format!("invalid base64 audio: {}", e)))?;
                Ok(InboundEvent::AudioChunk { data, descriptor: None })
            }
            "error" => Ok(InboundEvent::Error(match envelope.data {
                Some(serde_json::Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => "unknown remote error".to_string(),
            })),
            other => Err(VoiceError::ProtocolParse(format!("unknown message type '{}'", other))),
        }
    }
}

impl WireFormat for EnvelopeWire {
    fn name(&self) -> &'static str {
        "envelope"
    }

    fn encode_setup(&self, params: &SessionParams) -> Result<WireFrame> {
        Self::text(&ClientEnvelope::Setup {
            sample_rate: params.sample_rate,
            channels: params.channels,
            voice: params.voice.clone(),
            model: params.model.clone(),
        })
    }

    fn encode(&self, message: &OutboundMessage, _params: &SessionParams) -> Result<Vec<WireFrame>> {
        let frame = match message {
            OutboundMessage::AudioFrame(samples) => {
                WireFrame::Binary(samples.iter().flat_map(|s| s.to_le_bytes()).collect())
            }
            OutboundMessage::AudioBatch(pcm) => Self::text(&ClientEnvelope::Audio {
                data: b64().encode(pcm),
            })?,
            OutboundMessage::AudioEnd => Self::text(&ClientEnvelope::AudioEnd)?,
            OutboundMessage::Interrupt => Self::text(&ClientEnvelope::Interrupt)?,
            OutboundMessage::Stop => Self::text(&ClientEnvelope::Stop)?,
        };
        Ok(vec![frame])
    }

    fn decode(&self, frame: &WireFrame) -> Result<Vec<InboundEvent>> {
        match frame {
            WireFrame::Text(text) => {
                if text.trim().is_empty() {
                    return Ok(Vec::new());
                }
                let envelope: ServerEnvelope = serde_json::from_str(text)?;
                Ok(vec![Self::decode_envelope(envelope)?])
            }
            // Raw response audio
            WireFrame::Binary(data) => Ok(vec![InboundEvent::AudioChunk {
                data: data.clone(),
                descriptor: None,
            }]),
            WireFrame::Ping(_) | WireFrame::Pong(_) => Ok(Vec::new()),
        }
    }
}

// ============================================================================
// Live API style: {"setup": ...}, {"realtimeInput": ...}, {"serverContent": ...}
// ============================================================================

#[derive(Debug, Serialize)]
struct LiveSetupMessage {
    setup: LiveSetup,
}

#[derive(Debug, Serialize)]
struct LiveSetup {
    model: String,
    generation_config: LiveGenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<LiveContent>,
}

#[derive(Debug, Serialize)]
struct LiveGenerationConfig {
    response_modalities: Vec<String>,
    speech_config: LiveSpeechConfig,
}

#[derive(Debug, Serialize)]
struct LiveSpeechConfig {
    voice_config: LiveVoiceConfig,
}

#[derive(Debug, Serialize)]
struct LiveVoiceConfig {
    prebuilt_voice_config: LivePrebuiltVoice,
}

#[derive(Debug, Serialize)]
struct LivePrebuiltVoice {
    voice_name: String,
}

#[derive(Debug, Serialize)]
struct LiveContent {
    parts: Vec<LiveTextPart>,
}

#[derive(Debug, Serialize)]
struct LiveTextPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LiveRealtimeMessage {
    realtime_input: LiveRealtimeInput,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct LiveRealtimeInput {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    media_chunks: Vec<LiveBlob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_stream_end: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveBlob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveServerMessage {
    #[serde(default)]
    setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    server_content: Option<LiveServerContent>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveServerContent {
    #[serde(default)]
    model_turn: Option<LiveModelTurn>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    input_transcription: Option<LiveTranscription>,
    #[serde(default)]
    output_transcription: Option<LiveTranscription>,
}

#[derive(Debug, Default, Deserialize)]
struct LiveModelTurn {
    #[serde(default)]
    parts: Vec<LivePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LivePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<LiveBlob>,
}

#[derive(Debug, Deserialize)]
struct LiveTranscription {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Clone)]
pub struct LiveWire;

impl LiveWire {
    pub fn new() -> Self {
        Self
    }

    fn realtime(input: LiveRealtimeInput) -> Result<WireFrame> {
        Ok(WireFrame::Text(serde_json::to_string(&LiveRealtimeMessage {
            realtime_input: input,
        })?))
    }

    fn pcm_chunk(pcm: &[u8], sample_rate: u32) -> LiveBlob {
        LiveBlob {
            mime_type: format!("audio/pcm;rate={}", sample_rate),
            data: b64().encode(pcm),
        }
    }

    fn decode_text(text: &str) -> Result<Vec<InboundEvent>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let message: LiveServerMessage = serde_json::from_str(text)?;
        let mut events = Vec::new();

        if message.setup_complete.is_some() {
            events.push(InboundEvent::Status(RemoteStatus::Connected));
        }

        if let Some(content) = message.server_content {
            if let Some(transcription) = content.input_transcription {
                if !transcription.text.is_empty() {
                    events.push(InboundEvent::Transcript {
                        text: transcription.text,
                        is_final: false,
                    });
                }
            }

            if let Some(transcription) = content.output_transcription {
                if !transcription.text.is_empty() {
                    events.push(InboundEvent::TextChunk(transcription.text));
                }
            }

            if content.interrupted {
                events.push(InboundEvent::Status(RemoteStatus::Interrupted));
            }

            for part in content.model_turn.map(|t| t.parts).unwrap_or_default() {
                if let Some(text) = part.text {
                    events.push(InboundEvent::TextChunk(text));
                }
                if let Some(blob) = part.inline_data {
                    let data = b64()
                        .decode(blob.data.as_bytes())
                        .map_err(|e| VoiceError::ProtocolParse(format!("invalid base64 audio: {}", e)))?;
                    events.push(InboundEvent::AudioChunk {
                        data,
                        descriptor: Some(blob.mime_type),
                    });
                }
            }

            if content.turn_complete {
                events.push(InboundEvent::Status(RemoteStatus::Complete));
            }
        }

        if let Some(error) = message.error {
            let text = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            events.push(InboundEvent::Error(text));
        }

        Ok(events)
    }
}

impl WireFormat for LiveWire {
    fn name(&self) -> &'static str {
        "live"
    }

    fn encode_setup(&self, params: &SessionParams) -> Result<WireFrame> {
        let message = LiveSetupMessage {
            setup: LiveSetup {
                model: params.model.clone(),
                generation_config: LiveGenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: LiveSpeechConfig {
                        voice_config: LiveVoiceConfig {
                            prebuilt_voice_config: LivePrebuiltVoice {
                                voice_name: params.voice.clone(),
                            },
                        },
                    },
                },
                system_instruction: params.system_instruction.as_ref().map(|text| LiveContent {
                    parts: vec![LiveTextPart { text: text.clone() }],
                }),
            },
        };
        Ok(WireFrame::Text(serde_json::to_string(&message)?))
    }

    fn encode(&self, message: &OutboundMessage, params: &SessionParams) -> Result<Vec<WireFrame>> {
        match message {
            OutboundMessage::AudioFrame(samples) => {
                let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
                Ok(vec![Self::realtime(LiveRealtimeInput {
                    media_chunks: vec![Self::pcm_chunk(&pcm, params.sample_rate)],
                    ..Default::default()
                })?])
            }
            OutboundMessage::AudioBatch(pcm) => Ok(vec![Self::realtime(LiveRealtimeInput {
                media_chunks: vec![Self::pcm_chunk(pcm, params.sample_rate)],
                ..Default::default()
            })?]),
            OutboundMessage::AudioEnd => Ok(vec![Self::realtime(LiveRealtimeInput {
                audio_stream_end: Some(true),
                ..Default::default()
            })?]),
            // Barge-in and shutdown are handled server-side
            OutboundMessage::Interrupt | OutboundMessage::Stop => Ok(Vec::new()),
        }
    }

    fn decode(&self, frame: &WireFrame) -> Result<Vec<InboundEvent>> {
        match frame {
            WireFrame::Text(text) => Self::decode_text(text),
            // Some servers deliver JSON in binary frames
            WireFrame::Binary(data) => {
                let text = std::str::from_utf8(data)
                    .map_err(|e| VoiceError::ProtocolParse(format!("binary frame is not UTF-8: {}", e)))?;
                Self::decode_text(text)
            }
            WireFrame::Ping(_) | WireFrame::Pong(_) => Ok(Vec::new()),
        }
    }
}
