// Shared fixtures for integration tests: an in-memory connector standing in
// for the remote service, plus WAV helpers.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use duplex_voice::transport::{Connection, Connector, FrameSink, FrameStream, WireFrame};
use duplex_voice::{Result, VoiceError};
use tokio::sync::mpsc;
use url::Url;

pub const ENVELOPE_ACK: &str = r#"{"type":"status","data":"connected"}"#;

/// The service side of one in-memory connection
pub struct Peer {
    /// Frames the client sent, in order
    pub sent: mpsc::UnboundedReceiver<WireFrame>,
    incoming: mpsc::UnboundedSender<WireFrame>,
}

impl Peer {
    pub fn push(&self, frame: WireFrame) {
        let _ = self.incoming.send(frame);
    }

    pub fn push_text(&self, text: &str) {
        self.push(WireFrame::Text(text.to_string()));
    }

    /// Next frame the client sent; panics after a second of silence
    pub async fn next_sent(&mut self) -> WireFrame {
        tokio::time::timeout(Duration::from_secs(1), self.sent.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client connection dropped")
    }

    /// Next frame as JSON, skipping binary audio
    pub async fn next_json(&mut self) -> serde_json::Value {
        loop {
            if let WireFrame::Text(text) = self.next_sent().await {
                return serde_json::from_str(&text).expect("client sent invalid JSON");
            }
        }
    }

    /// Everything the client has sent so far
    pub fn drain_sent(&mut self) -> Vec<WireFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.sent.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Drop the connection as a crashed server would
    pub fn close(self) {}
}

struct PeerSink {
    tx: mpsc::UnboundedSender<WireFrame>,
}

#[async_trait::async_trait]
impl FrameSink for PeerSink {
    async fn send(&mut self, frame: WireFrame) -> Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| VoiceError::Connection("peer gone".to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct PeerStream {
    rx: mpsc::UnboundedReceiver<WireFrame>,
}

#[async_trait::async_trait]
impl FrameStream for PeerStream {
    async fn next(&mut self) -> Option<Result<WireFrame>> {
        self.rx.recv().await.map(Ok)
    }
}

/// Hands out in-memory connections and reports each one as a [`Peer`]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<Peer>,
    /// Queued on every new connection so the handshake completes on its own
    auto_ack: Option<WireFrame>,
    refuse: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new(auto_ack: Option<&str>) -> (Self, mpsc::UnboundedReceiver<Peer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (
            Self {
                peers,
                auto_ack: auto_ack.map(|s| WireFrame::Text(s.to_string())),
                refuse: Arc::new(AtomicBool::new(false)),
                attempts: Arc::new(AtomicUsize::new(0)),
            },
            rx,
        )
    }

    /// Shared switch: while set, every connect attempt fails
    pub fn refuse_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.refuse)
    }

    pub fn attempts_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.attempts)
    }
}

#[async_trait::async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, _endpoint: &Url) -> Result<Connection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(VoiceError::Connection("connection refused".to_string()));
        }

        let (client_tx, peer_rx) = mpsc::unbounded_channel();
        let (peer_tx, client_rx) = mpsc::unbounded_channel();

        if let Some(ack) = &self.auto_ack {
            let _ = peer_tx.send(ack.clone());
        }

        let _ = self.peers.send(Peer {
            sent: peer_rx,
            incoming: peer_tx,
        });

        Ok(Connection {
            sink: Box::new(PeerSink { tx: client_tx }),
            stream: Box::new(PeerStream { rx: client_rx }),
        })
    }
}

pub fn endpoint() -> Url {
    Url::parse("ws://localhost:8000/ws").unwrap()
}

pub async fn next_peer(peers: &mut mpsc::UnboundedReceiver<Peer>) -> Peer {
    tokio::time::timeout(Duration::from_secs(5), peers.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}

/// Write a 16-bit WAV file
pub fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[i16]) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &sample in samples {
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
}

/// `n` samples of a loud square wave followed by `silence` zero samples
pub fn speech_then_silence(n: usize, silence: usize) -> Vec<i16> {
    let mut samples: Vec<i16> = (0..n).map(|i| if i % 2 == 0 { 8000 } else { -8000 }).collect();
    samples.extend(std::iter::repeat(0).take(silence));
    samples
}

/// Playback sink that records what it was asked to play
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub played: Arc<std::sync::Mutex<Vec<duplex_voice::AssembledAudio>>>,
}

struct DoneHandle;

impl duplex_voice::PlaybackHandle for DoneHandle {
    fn stop(&mut self) {}

    fn is_finished(&self) -> bool {
        true
    }
}

impl duplex_voice::PlaybackSink for RecordingSink {
    fn play(&mut self, audio: &duplex_voice::AssembledAudio) -> Result<Box<dyn duplex_voice::PlaybackHandle>> {
        self.played.lock().unwrap().push(audio.clone());
        Ok(Box::new(DoneHandle))
    }

    fn name(&self) -> &str {
        "recording"
    }
}
