use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::container::{to_playable, AudioDescriptor};
use super::sink::{AssembledAudio, PlaybackHandle, PlaybackSink};
use crate::error::Result;

/// One remote-generated reply
#[derive(Debug, Clone)]
pub struct ResponseTurn {
    pub id: u64,
    /// Audio byte chunks in receipt order
    pub chunks: Vec<Vec<u8>>,
    pub text: String,
    /// Descriptor of the first chunk that carried one
    pub descriptor: Option<String>,
    pub completed: bool,
    pub interrupted: bool,
    pub started_at: DateTime<Utc>,
}

impl ResponseTurn {
    fn new(id: u64) -> Self {
        Self {
            id,
            chunks: Vec::new(),
            text: String::new(),
            descriptor: None,
            completed: false,
            interrupted: false,
            started_at: Utc::now(),
        }
    }

    pub fn audio_len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    /// Byte-exact concatenation of all chunks
    pub fn concat(&self) -> Vec<u8> {
        let mut audio = Vec::with_capacity(self.audio_len());
        for chunk in &self.chunks {
            audio.extend_from_slice(chunk);
        }
        audio
    }
}

/// Accumulates response audio and owns the playback device
pub struct PlaybackAssembler {
    sink: Box<dyn PlaybackSink>,
    default_descriptor: String,
    active: Option<ResponseTurn>,
    /// Text received before the turn it belongs to was opened
    pending_text: String,
    playing: Option<(u64, Box<dyn PlaybackHandle>)>,
    next_turn_id: u64,
}

impl PlaybackAssembler {
    /// `default_descriptor` applies to chunks that arrive without one
    pub fn new(sink: Box<dyn PlaybackSink>, default_descriptor: impl Into<String>) -> Self {
        Self {
            sink,
            default_descriptor: default_descriptor.into(),
            active: None,
            pending_text: String::new(),
            playing: None,
            next_turn_id: 1,
        }
    }

    /// Open a new turn, discarding any unfinished one
    pub fn begin_turn(&mut self) -> u64 {
        if let Some(previous) = self.active.take() {
            debug!(
                "Discarding {} buffered chunks of turn {}",
                previous.chunks.len(),
                previous.id
            );
        }

        let id = self.next_turn_id;
        self.next_turn_id += 1;
        let mut turn = ResponseTurn::new(id);
        turn.text = std::mem::take(&mut self.pending_text);
        self.active = Some(turn);
        debug!("Response turn {} opened", id);
        id
    }

    /// Append audio to the active turn. Returns false when no turn is open.
    pub fn push_chunk(&mut self, bytes: Vec<u8>, descriptor: Option<String>) -> bool {
        match self.active.as_mut() {
            Some(turn) => {
                if turn.descriptor.is_none() {
                    turn.descriptor = descriptor;
                }
                turn.chunks.push(bytes);
                true
            }
            None => {
                warn!("Audio chunk without an open response turn, dropping");
                false
            }
        }
    }

    /// Append response text. Text arriving before the turn opens is held
    /// for the next `begin_turn`.
    pub fn push_text(&mut self, text: &str) {
        match self.active.as_mut() {
            Some(turn) => turn.text.push_str(text),
            None => self.pending_text.push_str(text),
        }
    }

    /// Drop text held for a turn that has not opened yet
    pub fn discard_pending_text(&mut self) {
        if !self.pending_text.is_empty() {
            debug!("Discarding {} bytes of pending response text", self.pending_text.len());
            self.pending_text.clear();
        }
    }

    pub fn active_turn(&self) -> Option<&ResponseTurn> {
        self.active.as_ref()
    }

    pub fn has_active_turn(&self) -> bool {
        self.active.is_some()
    }

    /// Finalize the active turn and start playing it.
    ///
    /// Returns `Ok(None)` when no turn is open. A turn without audio completes
    /// without touching the device.
    pub fn complete(&mut self) -> Result<Option<AssembledAudio>> {
        let Some(mut turn) = self.active.take() else {
            return Ok(None);
        };
        turn.completed = true;

        let descriptor = AudioDescriptor::parse(
            turn.descriptor.as_deref().unwrap_or(&self.default_descriptor),
        );
        let raw = turn.concat();
        let assembled = AssembledAudio {
            turn_id: turn.id,
            bytes: if raw.is_empty() { raw } else { to_playable(raw, &descriptor)? },
            descriptor,
            text: turn.text,
        };

        if assembled.bytes.is_empty() {
            info!("Response turn {} completed without audio", assembled.turn_id);
            return Ok(Some(assembled));
        }

        self.stop_playback();
        info!(
            "Response turn {} complete ({} chunks, {} bytes)",
            assembled.turn_id,
            turn.chunks.len(),
            assembled.bytes.len()
        );

        let handle = self.sink.play(&assembled)?;
        self.playing = Some((assembled.turn_id, handle));

        Ok(Some(assembled))
    }

    /// Stop playback and drop any unflushed chunks.
    ///
    /// Returns the id of the turn that was cancelled, if any.
    pub fn cancel_active(&mut self) -> Option<u64> {
        self.discard_pending_text();
        let buffered = self.active.take().map(|mut turn| {
            turn.interrupted = true;
            debug!(
                "Turn {} interrupted, {} chunks discarded",
                turn.id,
                turn.chunks.len()
            );
            turn.id
        });
        let played = self.stop_playback();
        buffered.or(played)
    }

    /// Whether a completed turn is still audible
    pub fn is_playing(&self) -> bool {
        self.playing
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    fn stop_playback(&mut self) -> Option<u64> {
        let (turn_id, mut handle) = self.playing.take()?;
        let was_playing = !handle.is_finished();
        handle.stop();
        was_playing.then_some(turn_id)
    }
}
