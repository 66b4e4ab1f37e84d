use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::config::AudioMode;
use crate::audio::{AudioFrame, UtteranceBuilder, VadConfig, VadEvent, VoiceActivityDetector};
use crate::error::VoiceError;
use crate::playback::PlaybackAssembler;
use crate::transport::{InboundEvent, OutboundMessage, RemoteStatus};

/// Turn-taking state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnState {
    /// Nothing forwarded, nothing playing
    Idle,
    /// Capture forwarded into the current utterance
    Listening,
    /// Utterance sent, capture paused until the response starts
    AwaitingResponse,
    /// Response audio is arriving
    Speaking,
    /// Barge-in in progress; always followed by `Listening`
    Interrupted,
}

/// Notifications for the application
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    StateChanged { from: TurnState, to: TurnState },
    Transcript { text: String, is_final: bool },
    ResponseText(String),
    ResponseComplete { turn_id: u64, text: String, audio_bytes: usize },
    Interrupted { turn_id: Option<u64> },
    Error(VoiceError),
}

/// Running totals kept by the controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnCounters {
    pub utterances_sent: usize,
    pub responses_completed: usize,
    pub interruptions: usize,
}

/// Single-writer turn-taking state machine.
///
/// Every input (capture frame, inbound event, connection change) goes
/// through one `&mut self` method, which returns the messages to send in
/// order. The controller never touches the transport or the capture device
/// itself; the driver task owns those.
pub struct TurnController {
    state: TurnState,
    mode: AudioMode,
    send_interrupt: bool,
    vad: VoiceActivityDetector,
    utterance: UtteranceBuilder,
    assembler: PlaybackAssembler,
    events: mpsc::UnboundedSender<ConversationEvent>,
    counters: TurnCounters,
}

impl TurnController {
    pub fn new(
        vad: VadConfig,
        mode: AudioMode,
        send_interrupt: bool,
        assembler: PlaybackAssembler,
        events: mpsc::UnboundedSender<ConversationEvent>,
    ) -> Self {
        Self {
            state: TurnState::Idle,
            mode,
            send_interrupt,
            vad: VoiceActivityDetector::new(vad),
            utterance: UtteranceBuilder::new(),
            assembler,
            events,
            counters: TurnCounters::default(),
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn counters(&self) -> TurnCounters {
        self.counters
    }

    pub fn assembler(&self) -> &PlaybackAssembler {
        &self.assembler
    }

    /// Handshake completed (initially or after a reconnect)
    pub fn on_connected(&mut self) -> Vec<OutboundMessage> {
        if self.state == TurnState::Idle {
            self.reset_capture();
            self.transition(TurnState::Listening);
        }
        Vec::new()
    }

    /// Feed one capture frame
    pub fn on_frame(&mut self, frame: AudioFrame) -> Vec<OutboundMessage> {
        match self.state {
            TurnState::Idle | TurnState::Interrupted => Vec::new(),
            TurnState::AwaitingResponse => {
                self.vad.reset();
                Vec::new()
            }
            TurnState::Speaking => match self.vad.process(&frame) {
                Some(VadEvent::Start { timestamp_ms }) => {
                    info!("Barge-in at {}ms", timestamp_ms);
                    let mut out = self.interrupt_response();
                    out.extend(self.capture(frame));
                    out
                }
                _ => Vec::new(),
            },
            TurnState::Listening => match self.vad.process(&frame) {
                Some(VadEvent::Start { timestamp_ms }) => {
                    let mut out = Vec::new();
                    if self.assembler.is_playing() {
                        info!("Barge-in on playing response at {}ms", timestamp_ms);
                        out.extend(self.cancel_playback());
                    }
                    self.assembler.discard_pending_text();
                    debug!("Utterance opened at {}ms", timestamp_ms);
                    out.extend(self.capture(frame));
                    out
                }
                Some(VadEvent::End { start_ms, end_ms }) => self.finish_utterance(start_ms, end_ms),
                None if self.vad.is_active() => self.capture(frame),
                None => Vec::new(),
            },
        }
    }

    /// Apply one inbound event, in arrival order
    pub fn on_inbound(&mut self, event: InboundEvent) -> Vec<OutboundMessage> {
        match event {
            InboundEvent::Status(status) => self.on_status(status),
            InboundEvent::Transcript { text, is_final } => {
                self.emit(ConversationEvent::Transcript { text, is_final });
                Vec::new()
            }
            InboundEvent::TextChunk(text) => {
                // Text may precede the speaking status of the turn it belongs to
                if self.expects_response() || self.awaits_next_turn() {
                    self.assembler.push_text(&text);
                    self.emit(ConversationEvent::ResponseText(text));
                } else {
                    debug!("Dropping response text in {:?}", self.state);
                }
                Vec::new()
            }
            InboundEvent::AudioChunk { data, descriptor } => {
                match self.state {
                    TurnState::Speaking => {
                        self.assembler.push_chunk(data, descriptor);
                    }
                    TurnState::AwaitingResponse => {
                        // No speaking status on this wire; the first chunk opens the turn
                        self.begin_response();
                        self.assembler.push_chunk(data, descriptor);
                    }
                    state => debug!("Discarding {} response bytes in {:?}", data.len(), state),
                }
                Vec::new()
            }
            InboundEvent::Error(message) => {
                error!("Remote error: {}", message);
                self.abandon_turn();
                self.transition(TurnState::Idle);
                self.emit(ConversationEvent::Error(VoiceError::Remote(message)));
                Vec::new()
            }
        }
    }

    /// Connection dropped; hold at `Idle` until reconnected
    pub fn on_disconnected(&mut self) -> Vec<OutboundMessage> {
        self.abandon_turn();
        self.transition(TurnState::Idle);
        Vec::new()
    }

    /// Unrecoverable failure (device or connection)
    pub fn on_fatal(&mut self, err: VoiceError) -> Vec<OutboundMessage> {
        error!("Fatal: {}", err);
        self.abandon_turn();
        self.transition(TurnState::Idle);
        self.emit(ConversationEvent::Error(err));
        Vec::new()
    }

    /// End of conversation. Idempotent.
    pub fn disconnect(&mut self) -> Vec<OutboundMessage> {
        self.abandon_turn();
        self.transition(TurnState::Idle);
        Vec::new()
    }

    /// Return to `Listening` after a remote error
    pub fn resume(&mut self) -> Vec<OutboundMessage> {
        self.on_connected()
    }

    fn on_status(&mut self, status: RemoteStatus) -> Vec<OutboundMessage> {
        match status {
            RemoteStatus::Speaking => match self.state {
                TurnState::AwaitingResponse | TurnState::Speaking => self.begin_response(),
                TurnState::Listening if !self.vad.is_active() => self.begin_response(),
                state => debug!("Ignoring speaking status in {:?}", state),
            },
            RemoteStatus::Complete => {
                if self.expects_response() {
                    self.complete_response();
                } else {
                    debug!("Ignoring complete status in {:?}", self.state);
                }
            }
            RemoteStatus::Interrupted => {
                if self.expects_response() {
                    info!("Remote interrupted the response");
                    self.transition(TurnState::Interrupted);
                    let turn_id = self.assembler.cancel_active();
                    self.emit(ConversationEvent::Interrupted { turn_id });
                    self.reset_capture();
                    self.transition(TurnState::Listening);
                }
            }
            RemoteStatus::Listening => {
                if self.state == TurnState::Idle {
                    self.reset_capture();
                    self.transition(TurnState::Listening);
                }
            }
            RemoteStatus::Connected => {}
            RemoteStatus::Other(status) => debug!("Remote status: {}", status),
        }
        Vec::new()
    }

    fn expects_response(&self) -> bool {
        matches!(self.state, TurnState::AwaitingResponse | TurnState::Speaking)
    }

    /// Listening with no utterance open: the remote may start another turn
    fn awaits_next_turn(&self) -> bool {
        self.state == TurnState::Listening && !self.vad.is_active()
    }

    /// Buffer a frame of the open utterance; streaming mode forwards it too
    fn capture(&mut self, frame: AudioFrame) -> Vec<OutboundMessage> {
        let out = match self.mode {
            AudioMode::Streaming => vec![OutboundMessage::AudioFrame(frame.samples.clone())],
            AudioMode::Batched => Vec::new(),
        };
        self.utterance.push(frame);
        out
    }

    fn finish_utterance(&mut self, start_ms: u64, end_ms: u64) -> Vec<OutboundMessage> {
        let utterance = self.utterance.finish(start_ms, end_ms);
        info!(
            "Utterance {}ms-{}ms ({} frames)",
            utterance.start_ms,
            utterance.end_ms,
            utterance.frames.len()
        );

        let mut out = Vec::with_capacity(2);
        if self.mode == AudioMode::Batched {
            out.push(OutboundMessage::AudioBatch(utterance.pcm_bytes()));
        }
        out.push(OutboundMessage::AudioEnd);

        self.counters.utterances_sent += 1;
        self.vad.reset();
        self.transition(TurnState::AwaitingResponse);
        out
    }

    fn begin_response(&mut self) {
        self.assembler.begin_turn();
        self.transition(TurnState::Speaking);
    }

    fn complete_response(&mut self) {
        match self.assembler.complete() {
            Ok(Some(audio)) => {
                self.counters.responses_completed += 1;
                self.emit(ConversationEvent::ResponseComplete {
                    turn_id: audio.turn_id,
                    text: audio.text,
                    audio_bytes: audio.bytes.len(),
                });
            }
            Ok(None) => debug!("Complete status without an open response turn"),
            Err(e) if e.is_fatal() => {
                self.on_fatal(e);
                return;
            }
            Err(e) => {
                warn!("Playback failed: {}", e);
                self.emit(ConversationEvent::Error(e));
            }
        }
        self.reset_capture();
        self.transition(TurnState::Listening);
    }

    /// Barge-in while the response is still streaming
    fn interrupt_response(&mut self) -> Vec<OutboundMessage> {
        self.transition(TurnState::Interrupted);
        let out = self.cancel_playback();
        // The detector stays open: the triggering frame starts the next utterance
        self.utterance.discard();
        self.transition(TurnState::Listening);
        out
    }

    fn cancel_playback(&mut self) -> Vec<OutboundMessage> {
        let turn_id = self.assembler.cancel_active();
        self.counters.interruptions += 1;
        self.emit(ConversationEvent::Interrupted { turn_id });

        if self.send_interrupt {
            vec![OutboundMessage::Interrupt]
        } else {
            Vec::new()
        }
    }

    /// Drop the in-flight utterance and response
    fn abandon_turn(&mut self) {
        if let Some(turn_id) = self.assembler.cancel_active() {
            debug!("Abandoned response turn {}", turn_id);
        }
        self.reset_capture();
    }

    fn reset_capture(&mut self) {
        self.utterance.discard();
        self.vad.reset();
    }

    fn transition(&mut self, to: TurnState) {
        let from = self.state;
        if from == to {
            return;
        }
        info!("Turn state {:?} -> {:?}", from, to);
        self.state = to;
        self.emit(ConversationEvent::StateChanged { from, to });
    }

    fn emit(&self, event: ConversationEvent) {
        let _ = self.events.send(event);
    }
}
