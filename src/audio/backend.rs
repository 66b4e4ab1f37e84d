use crate::error::{Result, VoiceError};
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Scale applied to normalized RMS so thresholds read as small numbers (speech is ~2-30)
pub const ENERGY_SCALE: f32 = 100.0;

/// A block of captured audio (16-bit PCM, mono)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
    /// Scaled RMS energy of `samples`
    pub energy: f32,
}

impl AudioFrame {
    /// Build a frame and compute its energy
    pub fn new(samples: Vec<i16>, sample_rate: u32, timestamp_ms: u64) -> Self {
        let energy = rms_energy(&samples);
        Self {
            samples,
            sample_rate,
            channels: 1,
            timestamp_ms,
            energy,
        }
    }

    /// Frame duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / (self.sample_rate as u64 * self.channels.max(1) as u64)
    }

    /// Samples as interleaved little-endian bytes
    pub fn pcm_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

/// Root-mean-square of samples normalized to [-1, 1], times `ENERGY_SCALE`
pub fn rms_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let normalized = s as f64 / 32768.0;
            normalized * normalized
        })
        .sum();

    ((sum_squares / samples.len() as f64).sqrt() as f32) * ENERGY_SCALE
}

/// Timestamp of the frame starting at `sample_offset`
pub(crate) fn offset_to_ms(sample_offset: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    sample_offset * 1000 / sample_rate as u64
}

/// Configuration for audio backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Requested sample rate (device rate wins if it differs)
    pub sample_rate: u32,
    /// Samples per emitted frame
    pub frame_size: usize,
    /// Capacity of the frame channel between capture and consumer
    pub channel_capacity: usize,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_size: 4096,
            channel_capacity: 64,
        }
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - Microphone: default input device via cpal
/// - File: replay a WAV file (for testing/batch processing)
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames. Failing to
    /// acquire the device yields `VoiceError::DeviceUnavailable`.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio. Safe to call repeatedly.
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Device error that ended capture early, if any.
    ///
    /// Set before the frame channel closes, so a consumer that sees the
    /// channel end can tell a device failure from end of input.
    fn failure(&self) -> Option<VoiceError> {
        None
    }

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create audio backend based on platform and configuration
    pub fn create(source: AudioSource, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        match source {
            AudioSource::Microphone => {
                #[cfg(feature = "audio-io")]
                {
                    use super::microphone::MicrophoneBackend;
                    Ok(Box::new(MicrophoneBackend::new(config)))
                }

                #[cfg(not(feature = "audio-io"))]
                {
                    let _ = config;
                    Err(VoiceError::DeviceUnavailable(
                        "Microphone capture requires the audio-io feature".into(),
                    ))
                }
            }

            AudioSource::File { path, realtime } => {
                use super::file::FileBackend;
                Ok(Box::new(FileBackend::new(path, config, realtime)))
            }
        }
    }
}

/// Audio source type
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// Default input device (all platforms)
    Microphone,
    /// WAV file input, optionally paced at capture speed
    File { path: PathBuf, realtime: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_has_zero_energy() {
        assert_eq!(rms_energy(&[0; 512]), 0.0);
        assert_eq!(rms_energy(&[]), 0.0);
    }

    #[test]
    fn test_full_scale_energy() {
        let energy = rms_energy(&vec![i16::MIN; 1000]);
        assert!((energy - 100.0).abs() < 0.01, "energy was {}", energy);
    }

    #[test]
    fn test_energy_is_scaled_rms() {
        // Constant amplitude of 1% full scale -> RMS 0.01 -> energy 1.0
        let samples = vec![328i16; 4096];
        let energy = rms_energy(&samples);
        assert!((energy - 1.0).abs() < 0.01, "energy was {}", energy);
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::new(vec![0; 1600], 16000, 0);
        assert_eq!(frame.duration_ms(), 100);
        assert_eq!(frame.channels, 1);
    }

    #[test]
    fn test_pcm_bytes_little_endian() {
        let frame = AudioFrame::new(vec![1, -2], 16000, 0);
        assert_eq!(frame.pcm_bytes(), vec![0x01, 0x00, 0xFE, 0xFF]);
    }

    #[test]
    fn test_offset_to_ms() {
        assert_eq!(offset_to_ms(4096, 16000), 256);
        assert_eq!(offset_to_ms(0, 16000), 0);
        assert_eq!(offset_to_ms(100, 0), 0);
    }
}
