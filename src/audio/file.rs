use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::backend::{offset_to_ms, AudioBackend, AudioBackendConfig, AudioFrame};
use crate::error::VoiceError;

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
            anyhow::bail!(
                "Unsupported WAV format: {} bits {:?} (expected 16-bit integer PCM)",
                spec.bits_per_sample,
                spec.sample_format
            );
        }

        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Samples averaged down to a single channel
    pub fn to_mono(&self) -> Vec<i16> {
        if self.channels <= 1 {
            return self.samples.clone();
        }

        self.samples
            .chunks(self.channels as usize)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / frame.len() as i32) as i16
            })
            .collect()
    }

    /// Split into capture frames; the trailing partial block is zero-padded
    pub fn frames(&self, frame_size: usize) -> Vec<AudioFrame> {
        let frame_size = frame_size.max(1);
        let mono = self.to_mono();
        let mut offset = 0u64;

        mono.chunks(frame_size)
            .map(|block| {
                let mut samples = block.to_vec();
                samples.resize(frame_size, 0);
                let frame = AudioFrame::new(samples, self.sample_rate, offset_to_ms(offset, self.sample_rate));
                offset += frame_size as u64;
                frame
            })
            .collect()
    }
}

/// Replays a WAV file as if it were captured live
pub struct FileBackend {
    path: PathBuf,
    config: AudioBackendConfig,
    realtime: bool,
    task: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>, config: AudioBackendConfig, realtime: bool) -> Self {
        Self {
            path: path.into(),
            config,
            realtime,
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> crate::error::Result<mpsc::Receiver<AudioFrame>> {
        if self.task.is_some() {
            return Err(VoiceError::DeviceUnavailable("Already capturing".into()));
        }

        let audio = AudioFile::open(&self.path)
            .map_err(|e| VoiceError::DeviceUnavailable(format!("{:#}", e)))?;

        if audio.sample_rate != self.config.sample_rate {
            warn!(
                "File {} is {}Hz, requested {}Hz; frames carry the file rate",
                audio.path, audio.sample_rate, self.config.sample_rate
            );
        }

        let frames = audio.frames(self.config.frame_size);
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let realtime = self.realtime;

        info!("Replaying {} frames from {}", frames.len(), audio.path);

        self.task = Some(tokio::spawn(async move {
            for frame in frames {
                let pace = Duration::from_millis(frame.duration_ms());
                if tx.send(frame).await.is_err() {
                    break;
                }
                if realtime {
                    tokio::time::sleep(pace).await;
                }
            }
        }));

        Ok(rx)
    }

    async fn stop(&mut self) -> crate::error::Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("File replay stopped");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn name(&self) -> &str {
        "WAV file replay"
    }
}
