//! Audio descriptors and WAV container framing for raw PCM responses

use tracing::{debug, warn};

use crate::error::{Result, VoiceError};

/// Size of the canonical RIFF/WAVE header
pub const WAV_HEADER_LEN: usize = 44;

const DEFAULT_BITS_PER_SAMPLE: u16 = 16;
const DEFAULT_SAMPLE_RATE: u32 = 24000;
const MAX_SAMPLE_RATE: u32 = 384_000;
const SUPPORTED_BITS: [u16; 4] = [8, 16, 24, 32];

/// Encoding of response audio, parsed from a MIME-like descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioDescriptor {
    /// Headerless PCM (`audio/L16;rate=24000`, `audio/pcm`)
    RawPcm { sample_rate: u32, bits_per_sample: u16 },
    /// Already playable as-is (`audio/wav`, `audio/mpeg`, ...)
    Container { mime: String },
}

impl AudioDescriptor {
    /// Parse `audio/L16;rate=24000` style strings.
    ///
    /// Missing or out-of-range parameters fall back to 16-bit / 24000 Hz.
    pub fn parse(descriptor: &str) -> Self {
        let mut sample_rate = DEFAULT_SAMPLE_RATE;
        let mut bits_per_sample = DEFAULT_BITS_PER_SAMPLE;
        let mut mime = String::new();

        for (i, part) in descriptor.split(';').enumerate() {
            let trimmed = part.trim();

            if i == 0 {
                mime = trimmed.to_ascii_lowercase();
                if let Some(bits) = trimmed.strip_prefix("audio/L").and_then(|b| b.parse::<u16>().ok()) {
                    if SUPPORTED_BITS.contains(&bits) {
                        bits_per_sample = bits;
                    } else {
                        warn!("Unsupported bit depth {} in {:?}, using default", bits, descriptor);
                    }
                }
                continue;
            }

            if let Some((key, value)) = trimmed.split_once('=') {
                if key.trim().eq_ignore_ascii_case("rate") {
                    match value.trim().parse::<u32>() {
                        Ok(rate) if (1..=MAX_SAMPLE_RATE).contains(&rate) => sample_rate = rate,
                        _ => warn!("Invalid rate in {:?}, using {}", descriptor, DEFAULT_SAMPLE_RATE),
                    }
                }
            }
        }

        match mime.as_str() {
            "audio/wav" | "audio/x-wav" | "audio/wave" | "audio/mpeg" | "audio/mp3" | "audio/ogg"
            | "audio/webm" | "audio/flac" => AudioDescriptor::Container { mime },
            _ => AudioDescriptor::RawPcm {
                sample_rate,
                bits_per_sample,
            },
        }
    }

    pub fn is_raw_pcm(&self) -> bool {
        matches!(self, AudioDescriptor::RawPcm { .. })
    }
}

impl Default for AudioDescriptor {
    fn default() -> Self {
        AudioDescriptor::RawPcm {
            sample_rate: DEFAULT_SAMPLE_RATE,
            bits_per_sample: DEFAULT_BITS_PER_SAMPLE,
        }
    }
}

/// Whether `bytes` already start with a RIFF/WAVE header
pub fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

/// Whether `bytes` start with the signature of a compressed container
/// (ID3-tagged or bare MPEG audio, Ogg, FLAC)
pub fn is_compressed(bytes: &[u8]) -> bool {
    if bytes.starts_with(b"ID3") || bytes.starts_with(b"OggS") || bytes.starts_with(b"fLaC") {
        return true;
    }
    is_mpeg_frame_header(bytes)
}

/// 11-bit frame sync plus valid version, layer, bitrate and rate fields
fn is_mpeg_frame_header(bytes: &[u8]) -> bool {
    let &[b0, b1, b2, ..] = bytes else {
        return false;
    };
    let version = (b1 >> 3) & 0b11;
    let layer = (b1 >> 1) & 0b11;
    let bitrate = b2 >> 4;
    let rate = (b2 >> 2) & 0b11;

    b0 == 0xFF
        && b1 & 0xE0 == 0xE0
        && version != 0b01
        && layer != 0
        && bitrate != 0
        && bitrate != 0xF
        && rate != 0b11
}

/// Canonical 44-byte header for mono PCM.
///
/// Fails when the fields do not fit the header's 32-bit sizes.
pub fn wav_header(data_len: u32, sample_rate: u32, bits_per_sample: u16) -> Result<[u8; WAV_HEADER_LEN]> {
    let overflow = || {
        VoiceError::Playback(format!(
            "WAV header overflow ({} Hz, {} bits, {} bytes)",
            sample_rate, bits_per_sample, data_len
        ))
    };

    let channels: u16 = 1;
    let block_align = channels.checked_mul(bits_per_sample / 8).ok_or_else(overflow)?;
    let byte_rate = sample_rate.checked_mul(block_align as u32).ok_or_else(overflow)?;
    let riff_len = data_len.checked_add(36).ok_or_else(overflow)?;

    let mut header = [0u8; WAV_HEADER_LEN];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&riff_len.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM
    header[22..24].copy_from_slice(&channels.to_le_bytes());
    header[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&bits_per_sample.to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_len.to_le_bytes());
    Ok(header)
}

/// Prefix raw PCM with a WAV header
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32, bits_per_sample: u16) -> Result<Vec<u8>> {
    let data_len = u32::try_from(pcm.len())
        .map_err(|_| VoiceError::Playback(format!("{} bytes of PCM exceed the WAV size limit", pcm.len())))?;

    let mut wav = Vec::with_capacity(WAV_HEADER_LEN + pcm.len());
    wav.extend_from_slice(&wav_header(data_len, sample_rate, bits_per_sample)?);
    wav.extend_from_slice(pcm);
    Ok(wav)
}

/// Produce playable bytes for `audio` according to its descriptor.
///
/// Data that already carries a container signature passes through even when
/// the descriptor claims raw PCM.
pub fn to_playable(audio: Vec<u8>, descriptor: &AudioDescriptor) -> Result<Vec<u8>> {
    if is_wav(&audio) {
        return Ok(audio);
    }

    match descriptor {
        AudioDescriptor::RawPcm { .. } if is_compressed(&audio) => {
            debug!("Compressed audio under a raw PCM descriptor, passing through");
            Ok(audio)
        }
        AudioDescriptor::RawPcm {
            sample_rate,
            bits_per_sample,
        } => pcm_to_wav(&audio, *sample_rate, *bits_per_sample),
        AudioDescriptor::Container { .. } => Ok(audio),
    }
}
