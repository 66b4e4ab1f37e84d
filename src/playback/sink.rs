use crate::error::Result;

use super::container::AudioDescriptor;

/// A finished response ready for the playback device
#[derive(Debug, Clone)]
pub struct AssembledAudio {
    pub turn_id: u64,
    /// Playable bytes (container-framed)
    pub bytes: Vec<u8>,
    pub descriptor: AudioDescriptor,
    pub text: String,
}

/// Running playback job
pub trait PlaybackHandle: Send {
    /// Stop immediately. Safe to call repeatedly.
    fn stop(&mut self);

    fn is_finished(&self) -> bool;
}

/// Playback device
///
/// `play` must return promptly; audio is rendered in the background.
pub trait PlaybackSink: Send {
    fn play(&mut self, audio: &AssembledAudio) -> Result<Box<dyn PlaybackHandle>>;

    fn name(&self) -> &str;
}

/// Discards audio. Used when no output device is wanted.
#[derive(Debug, Default)]
pub struct NullSink;

struct FinishedHandle;

impl PlaybackHandle for FinishedHandle {
    fn stop(&mut self) {}

    fn is_finished(&self) -> bool {
        true
    }
}

impl PlaybackSink for NullSink {
    fn play(&mut self, audio: &AssembledAudio) -> Result<Box<dyn PlaybackHandle>> {
        tracing::debug!("Discarding {} bytes of turn {}", audio.bytes.len(), audio.turn_id);
        Ok(Box::new(FinishedHandle))
    }

    fn name(&self) -> &str {
        "null"
    }
}

#[cfg(feature = "audio-io")]
pub use self::rodio_sink::RodioSink;

#[cfg(feature = "audio-io")]
mod rodio_sink {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc as std_mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    use rodio::{Decoder, OutputStreamBuilder, Sink};
    use tracing::{error, info};

    use super::{AssembledAudio, PlaybackHandle, PlaybackSink};
    use crate::error::{Result, VoiceError};

    const DEVICE_OPEN_TIMEOUT: Duration = Duration::from_secs(2);

    /// Plays through the default output device.
    ///
    /// Each job runs on its own OS thread that owns the output stream.
    /// `play` returns once the device is open, so a missing device is
    /// reported as `DeviceUnavailable`.
    #[derive(Debug, Default)]
    pub struct RodioSink;

    impl RodioSink {
        pub fn new() -> Self {
            Self
        }
    }

    struct RodioHandle {
        stop: Arc<AtomicBool>,
        finished: Arc<AtomicBool>,
    }

    impl PlaybackHandle for RodioHandle {
        fn stop(&mut self) {
            self.stop.store(true, Ordering::SeqCst);
        }

        fn is_finished(&self) -> bool {
            self.finished.load(Ordering::SeqCst)
        }
    }

    impl PlaybackSink for RodioSink {
        fn play(&mut self, audio: &AssembledAudio) -> Result<Box<dyn PlaybackHandle>> {
            let decoder = Decoder::new(Cursor::new(audio.bytes.clone()))
                .map_err(|e| VoiceError::Playback(format!("Failed to decode response audio: {}", e)))?;

            let stop = Arc::new(AtomicBool::new(false));
            let finished = Arc::new(AtomicBool::new(false));
            let thread_stop = Arc::clone(&stop);
            let thread_finished = Arc::clone(&finished);
            let turn_id = audio.turn_id;

            let (opened_tx, opened_rx) = std_mpsc::sync_channel::<Result<()>>(1);

            std::thread::spawn(move || {
                let stream = match OutputStreamBuilder::open_default_stream() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = opened_tx.send(Err(VoiceError::DeviceUnavailable(format!(
                            "Failed to open output device: {}",
                            e
                        ))));
                        thread_finished.store(true, Ordering::SeqCst);
                        return;
                    }
                };

                let sink = Sink::connect_new(stream.mixer());
                sink.append(decoder);
                let _ = opened_tx.send(Ok(()));
                info!("Playing response turn {}", turn_id);

                while !sink.empty() {
                    if thread_stop.load(Ordering::SeqCst) {
                        sink.stop();
                        info!("Playback of turn {} cancelled", turn_id);
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }

                thread_finished.store(true, Ordering::SeqCst);
            });

            match opened_rx.recv_timeout(DEVICE_OPEN_TIMEOUT) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("{}", e);
                    return Err(e);
                }
                Err(_) => {
                    stop.store(true, Ordering::SeqCst);
                    return Err(VoiceError::Playback(format!(
                        "Output device did not open within {:?}",
                        DEVICE_OPEN_TIMEOUT
                    )));
                }
            }

            Ok(Box::new(RodioHandle { stop, finished }))
        }

        fn name(&self) -> &str {
            "rodio default output"
        }
    }
}
