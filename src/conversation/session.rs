use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::controller::{ConversationEvent, TurnController, TurnCounters, TurnState};
use super::stats::{SessionStats, TranscriptSegment};
use crate::audio::{AudioBackend, AudioFrame};
use crate::error::{Result, VoiceError};
use crate::playback::{PlaybackAssembler, PlaybackSink};
use crate::transport::{
    Connector, DuplexTransport, InboundEvent, Session, SessionParams, TransportEvent,
};

#[derive(Debug)]
enum Command {
    Resume,
    Reconnect,
    Stop,
}

/// Counters shared between the driver task and the session handle
#[derive(Default)]
struct SharedStats {
    utterances_sent: AtomicUsize,
    responses_completed: AtomicUsize,
    interruptions: AtomicUsize,
    reconnects: AtomicUsize,
}

impl SharedStats {
    fn record(&self, counters: TurnCounters) {
        self.utterances_sent.store(counters.utterances_sent, Ordering::SeqCst);
        self.responses_completed
            .store(counters.responses_completed, Ordering::SeqCst);
        self.interruptions.store(counters.interruptions, Ordering::SeqCst);
    }
}

/// A live conversation: capture, transport, turn-taking and playback
pub struct ConversationSession {
    /// Session configuration
    config: SessionConfig,

    /// Transport session established by `start`
    session: Session,

    /// When the session started
    started_at: DateTime<Utc>,

    /// Whether the driver task is running
    is_running: Arc<AtomicBool>,

    /// Current turn state, published by the driver
    state: watch::Receiver<TurnState>,

    stats: Arc<SharedStats>,

    /// Accumulated transcript segments
    transcript_segments: Arc<Mutex<Vec<TranscriptSegment>>>,

    commands: mpsc::Sender<Command>,

    events: Option<mpsc::UnboundedReceiver<ConversationEvent>>,

    /// Handle for the driver task
    driver_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ConversationSession {
    /// Connect, start capture and begin listening
    pub async fn start(
        config: SessionConfig,
        mut backend: Box<dyn AudioBackend>,
        sink: Box<dyn PlaybackSink>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        info!(
            "Starting conversation session: {} ({:?} mode, capture from {}, playback to {})",
            config.session_id,
            config.mode,
            backend.name(),
            sink.name()
        );

        let mut transport = DuplexTransport::new(connector, Arc::from(config.wire.build()), config.transport.clone());
        let transport_events = transport
            .take_events()
            .ok_or_else(|| VoiceError::Connection("transport events already taken".to_string()))?;

        let session = transport.connect(config.params.clone()).await?;

        let frames = match backend.start().await {
            Ok(frames) => frames,
            Err(e) => {
                error!("Failed to start capture: {}", e);
                let _ = transport.disconnect().await;
                return Err(e);
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let assembler = PlaybackAssembler::new(sink, config.output_descriptor.clone());
        let mut controller = TurnController::new(
            config.vad.clone(),
            config.mode,
            config.send_interrupt,
            assembler,
            events_tx,
        );
        controller.on_connected();

        let (state_tx, state_rx) = watch::channel(controller.state());
        let (command_tx, command_rx) = mpsc::channel(8);
        let stats = Arc::new(SharedStats::default());
        let transcript_segments = Arc::new(Mutex::new(Vec::new()));
        let is_running = Arc::new(AtomicBool::new(true));

        let driver = Driver {
            controller,
            transport,
            backend,
            params: config.params.clone(),
            frames,
            transport_events,
            commands: command_rx,
            state: state_tx,
            stats: Arc::clone(&stats),
            transcript_segments: Arc::clone(&transcript_segments),
        };

        let running = Arc::clone(&is_running);
        let driver_task = tokio::spawn(async move {
            driver.run().await;
            running.store(false, Ordering::SeqCst);
        });

        info!("Conversation session {} started", config.session_id);

        Ok(Self {
            config,
            session,
            started_at: Utc::now(),
            is_running,
            state: state_rx,
            stats,
            transcript_segments,
            commands: command_tx,
            events: Some(events_rx),
            driver_handle: Arc::new(Mutex::new(Some(driver_task))),
        })
    }

    /// Take the conversation event receiver. There is exactly one consumer.
    pub fn events(&mut self) -> Option<mpsc::UnboundedReceiver<ConversationEvent>> {
        self.events.take()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> TurnState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Return to listening after a remote error
    pub async fn resume(&self) -> Result<()> {
        self.command(Command::Resume).await
    }

    /// Connect again after the connection was lost for good
    pub async fn reconnect(&self) -> Result<()> {
        self.command(Command::Reconnect).await
    }

    /// Disconnect and release the devices. Safe to call repeatedly.
    pub async fn stop(&self) -> Result<SessionStats> {
        let handle = self.driver_handle.lock().await.take();
        let Some(task) = handle else {
            debug!("Session {} already stopped", self.config.session_id);
            return Ok(self.stats().await);
        };

        info!("Stopping conversation session: {}", self.config.session_id);
        let _ = self.commands.send(Command::Stop).await;

        if let Err(e) = task.await {
            error!("Driver task panicked: {}", e);
        }
        self.is_running.store(false, Ordering::SeqCst);

        let stats = self.stats().await;
        info!("Conversation session stopped: {:?}", stats);
        Ok(stats)
    }

    /// Current session statistics
    pub async fn stats(&self) -> SessionStats {
        let duration = Utc::now().signed_duration_since(self.started_at);

        let transcript_count = {
            let segments = self.transcript_segments.lock().await;
            segments.len()
        };

        SessionStats {
            state: self.state(),
            started_at: self.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            utterances_sent: self.stats.utterances_sent.load(Ordering::SeqCst),
            responses_completed: self.stats.responses_completed.load(Ordering::SeqCst),
            interruptions: self.stats.interruptions.load(Ordering::SeqCst),
            reconnects: self.stats.reconnects.load(Ordering::SeqCst),
            transcript_segments_count: transcript_count,
        }
    }

    /// Accumulated transcript
    pub async fn transcript(&self) -> Vec<TranscriptSegment> {
        let segments = self.transcript_segments.lock().await;
        segments.clone()
    }

    async fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| VoiceError::NotConnected)
    }
}

/// Owns every component and serializes all state changes
struct Driver {
    controller: TurnController,
    transport: DuplexTransport,
    backend: Box<dyn AudioBackend>,
    params: SessionParams,
    frames: mpsc::Receiver<AudioFrame>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    commands: mpsc::Receiver<Command>,
    state: watch::Sender<TurnState>,
    stats: Arc<SharedStats>,
    transcript_segments: Arc<Mutex<Vec<TranscriptSegment>>>,
}

impl Driver {
    async fn run(self) {
        let Driver {
            mut controller,
            mut transport,
            mut backend,
            params,
            mut frames,
            mut transport_events,
            mut commands,
            state,
            stats,
            transcript_segments,
        } = self;

        info!("Conversation driver started");
        let mut capture_open = true;

        loop {
            let out = tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Resume) => controller.resume(),
                    Some(Command::Reconnect) => match transport.connect(params.clone()).await {
                        Ok(session) => {
                            info!("Session {} connected", session.id);
                            controller.on_connected()
                        }
                        Err(e) => controller.on_fatal(e),
                    },
                    Some(Command::Stop) | None => break,
                },

                frame = frames.recv(), if capture_open => match frame {
                    Some(frame) => controller.on_frame(frame),
                    None => {
                        capture_open = false;
                        match backend.failure() {
                            Some(err) => controller.on_fatal(err),
                            None => {
                                info!("Capture stream ended");
                                Vec::new()
                            }
                        }
                    }
                },

                event = transport_events.recv() => match event {
                    Some(TransportEvent::Inbound(inbound)) => {
                        if let InboundEvent::Transcript { text, is_final } = &inbound {
                            transcript_segments.lock().await.push(TranscriptSegment {
                                text: text.clone(),
                                timestamp: Utc::now(),
                                partial: !is_final,
                            });
                        }
                        controller.on_inbound(inbound)
                    }
                    Some(TransportEvent::Disconnected { reason }) => {
                        warn!("Transport disconnected: {}", reason);
                        controller.on_disconnected()
                    }
                    Some(TransportEvent::Reconnecting { attempt, delay }) => {
                        debug!("Transport reconnect attempt {} in {:?}", attempt, delay);
                        Vec::new()
                    }
                    Some(TransportEvent::Reconnected(session)) => {
                        info!("Session {} reconnected", session.id);
                        stats.reconnects.fetch_add(1, Ordering::SeqCst);
                        controller.on_connected()
                    }
                    Some(TransportEvent::Fatal(e)) => controller.on_fatal(e),
                    None => Vec::new(),
                },
            };

            for message in out {
                if let Err(e) = transport.send(message).await {
                    debug!("Outbound message not sent: {}", e);
                }
            }

            stats.record(controller.counters());
            state.send_replace(controller.state());
        }

        controller.disconnect();
        stats.record(controller.counters());
        state.send_replace(controller.state());

        if let Err(e) = transport.disconnect().await {
            error!("Failed to disconnect transport: {}", e);
        }
        if let Err(e) = backend.stop().await {
            error!("Failed to stop audio backend: {}", e);
        }

        info!("Conversation driver stopped");
    }
}
