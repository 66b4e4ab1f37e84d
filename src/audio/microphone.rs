// Microphone backend using the default cpal input device

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::backend::{offset_to_ms, AudioBackend, AudioBackendConfig, AudioFrame};
use crate::error::{Result, VoiceError};

/// Re-blocks device callbacks into fixed-size mono i16 frames
pub(crate) struct FrameAssembler {
    frame_size: usize,
    sample_rate: u32,
    pending: Vec<i16>,
    samples_emitted: u64,
}

impl FrameAssembler {
    pub(crate) fn new(frame_size: usize, sample_rate: u32) -> Self {
        Self {
            frame_size,
            sample_rate,
            pending: Vec::with_capacity(frame_size),
            samples_emitted: 0,
        }
    }

    /// Push interleaved f32 device samples; returns every completed frame
    pub(crate) fn push(&mut self, data: &[f32], channels: usize) -> Vec<AudioFrame> {
        let channels = channels.max(1);
        let mut frames = Vec::new();

        for block in data.chunks(channels) {
            // Average all channels to create mono
            let mono = block.iter().sum::<f32>() / block.len() as f32;
            let clamped = mono.clamp(-1.0, 1.0);
            let sample = if clamped < 0.0 {
                (clamped * 32768.0) as i16
            } else {
                (clamped * 32767.0) as i16
            };
            self.pending.push(sample);

            if self.pending.len() == self.frame_size {
                let samples = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
                let timestamp_ms = offset_to_ms(self.samples_emitted, self.sample_rate);
                self.samples_emitted += samples.len() as u64;
                frames.push(AudioFrame::new(samples, self.sample_rate, timestamp_ms));
            }
        }

        frames
    }
}

enum Control {
    Stop,
    Failed(String),
}

/// Captures the default input device.
///
/// The cpal stream lives on a dedicated capture thread that owns it from
/// creation to drop; the backend only holds the control channel.
pub struct MicrophoneBackend {
    config: AudioBackendConfig,
    control: Option<std_mpsc::Sender<Control>>,
    thread: Option<std::thread::JoinHandle<()>>,
    capturing: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<VoiceError>>>,
}

impl MicrophoneBackend {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self {
            config,
            control: None,
            thread: None,
            capturing: Arc::new(AtomicBool::new(false)),
            failure: Arc::new(Mutex::new(None)),
        }
    }
}

/// Open and start the input stream. Runs on the capture thread.
fn open_stream(
    config: &AudioBackendConfig,
    frames: mpsc::Sender<AudioFrame>,
    capturing: Arc<AtomicBool>,
    control: std_mpsc::Sender<Control>,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| VoiceError::DeviceUnavailable("No input device available".into()))?;

    info!(
        "Using input device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let stream_config: cpal::StreamConfig = device
        .default_input_config()
        .map_err(|e| VoiceError::DeviceUnavailable(format!("Failed to get input config: {}", e)))?
        .into();

    let device_rate = stream_config.sample_rate.0;
    if device_rate != config.sample_rate {
        warn!(
            "Input device runs at {}Hz, requested {}Hz; frames carry the device rate",
            device_rate, config.sample_rate
        );
    }

    let channels = stream_config.channels as usize;
    let mut assembler = FrameAssembler::new(config.frame_size, device_rate);

    let err_fn = move |err: cpal::StreamError| {
        error!("Audio input stream error: {}", err);
        let _ = control.send(Control::Failed(err.to_string()));
    };

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if !capturing.load(Ordering::Relaxed) {
                    return;
                }

                for frame in assembler.push(data, channels) {
                    if let Err(e) = frames.try_send(frame) {
                        debug!("Dropping audio frame: {}", e);
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| VoiceError::DeviceUnavailable(format!("Failed to build input stream: {}", e)))?;

    stream
        .play()
        .map_err(|e| VoiceError::DeviceUnavailable(format!("Failed to start input stream: {}", e)))?;

    Ok((stream, device_rate))
}

#[async_trait::async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.capturing.load(Ordering::SeqCst) {
            return Err(VoiceError::DeviceUnavailable("Already capturing".into()));
        }

        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<u32>>();
        let (control_tx, control_rx) = std_mpsc::channel();

        let config = self.config.clone();
        let capturing = Arc::clone(&self.capturing);
        let failure = Arc::clone(&self.failure);
        let stream_control = control_tx.clone();

        if let Ok(mut slot) = self.failure.lock() {
            *slot = None;
        }
        // Frames flow as soon as the stream plays
        self.capturing.store(true, Ordering::SeqCst);

        let thread = std::thread::Builder::new()
            .name("mic-capture".into())
            .spawn(move || {
                let stream = match open_stream(&config, tx, Arc::clone(&capturing), stream_control) {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Ok(Control::Failed(reason)) = control_rx.recv() {
                    // Recorded before the stream (and its frame sender) is dropped
                    if let Ok(mut slot) = failure.lock() {
                        *slot = Some(VoiceError::DeviceUnavailable(format!("Input stream failed: {}", reason)));
                    }
                }
                capturing.store(false, Ordering::SeqCst);
                drop(stream);
                debug!("Capture thread exiting");
            })
            .map_err(|e| {
                self.capturing.store(false, Ordering::SeqCst);
                VoiceError::DeviceUnavailable(format!("Failed to spawn capture thread: {}", e))
            })?;

        let opened = ready_rx
            .await
            .unwrap_or_else(|_| Err(VoiceError::DeviceUnavailable("Capture thread exited".into())));

        match opened {
            Ok(rate) => {
                self.control = Some(control_tx);
                self.thread = Some(thread);
                info!(
                    "Microphone capture started ({}Hz, {} samples/frame)",
                    rate, self.config.frame_size
                );
                Ok(rx)
            }
            Err(e) => {
                self.capturing.store(false, Ordering::SeqCst);
                let _ = thread.join();
                Err(e)
            }
        }
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing.store(false, Ordering::SeqCst);

        if let Some(control) = self.control.take() {
            let _ = control.send(Control::Stop);
        }
        if let Some(thread) = self.thread.take() {
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
            info!("Microphone capture stopped");
        }

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn failure(&self) -> Option<VoiceError> {
        self.failure.lock().ok().and_then(|slot| slot.clone())
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

impl Drop for MicrophoneBackend {
    fn drop(&mut self) {
        self.capturing.store(false, Ordering::SeqCst);
        if let Some(control) = self.control.take() {
            let _ = control.send(Control::Stop);
        }
    }
}
