// End-to-end conversation tests
//
// A WAV file stands in for the microphone and an in-memory peer for the
// remote service; the whole driver runs as in production.

mod common;

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use common::{endpoint, next_peer, speech_then_silence, write_wav, MemoryConnector, RecordingSink, ENVELOPE_ACK};
use duplex_voice::audio::{AudioBackend, AudioBackendConfig, AudioFrame, FileBackend};
use duplex_voice::transport::WireFrame;
use duplex_voice::{AudioMode, ConversationEvent, ConversationSession, SessionConfig, TurnState, VoiceError};
use tempfile::TempDir;
use tokio::sync::mpsc;

const FRAME: usize = 160; // 10ms at 16kHz

fn session_config(mode: AudioMode) -> SessionConfig {
    let mut config = SessionConfig::new(endpoint());
    config.mode = mode;
    config.vad.hangover = Duration::from_millis(50);
    config
}

fn backend_for(dir: &TempDir, samples: &[i16]) -> Box<FileBackend> {
    let path = dir.path().join("input.wav");
    write_wav(&path, 16000, 1, samples);
    let config = AudioBackendConfig {
        sample_rate: 16000,
        frame_size: FRAME,
        channel_capacity: 16,
    };
    Box::new(FileBackend::new(path, config, false))
}

async fn wait_for<F>(events: &mut mpsc::UnboundedReceiver<ConversationEvent>, mut matches: F) -> ConversationEvent
where
    F: FnMut(&ConversationEvent) -> bool,
{
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for a conversation event")
            .expect("conversation ended");
        if matches(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn test_streaming_turn_round_trip() {
    let dir = TempDir::new().unwrap();
    let (connector, mut peers) = MemoryConnector::new(Some(ENVELOPE_ACK));
    let sink = RecordingSink::default();

    let mut session = ConversationSession::start(
        session_config(AudioMode::Streaming),
        backend_for(&dir, &speech_then_silence(3 * FRAME, 50 * FRAME)),
        Box::new(sink.clone()),
        Arc::new(connector),
    )
    .await
    .unwrap();
    let mut events = session.events().unwrap();

    let mut peer = next_peer(&mut peers).await;
    assert_eq!(peer.next_json().await["type"], "setup");

    // Speech frames stream as binary, then the end marker
    let mut binary_frames = 0;
    loop {
        match peer.next_sent().await {
            WireFrame::Binary(pcm) => {
                assert_eq!(pcm.len(), FRAME * 2);
                binary_frames += 1;
            }
            WireFrame::Text(text) => {
                let json: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(json["type"], "audio_end");
                break;
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }
    assert!(binary_frames >= 3);

    wait_for(&mut events, |e| {
        matches!(e, ConversationEvent::StateChanged { to: TurnState::AwaitingResponse, .. })
    })
    .await;

    peer.push_text(r#"{"type":"transcript","data":{"text":"what is rust","is_final":true}}"#);
    peer.push_text(r#"{"type":"status","data":"speaking"}"#);
    peer.push_text(r#"{"type":"text","data":"A language."}"#);
    peer.push_text(r#"{"type":"audio","data":"AQIDBA=="}"#);
    peer.push(WireFrame::Binary(vec![5, 6]));
    peer.push_text(r#"{"type":"status","data":"complete"}"#);

    let complete = wait_for(&mut events, |e| matches!(e, ConversationEvent::ResponseComplete { .. })).await;
    match complete {
        ConversationEvent::ResponseComplete { text, audio_bytes, .. } => {
            assert_eq!(text, "A language.");
            assert_eq!(audio_bytes, 44 + 6);
        }
        _ => unreachable!(),
    }

    let played = sink.played.lock().unwrap().clone();
    assert_eq!(played.len(), 1);
    assert_eq!(&played[0].bytes[44..], &[1, 2, 3, 4, 5, 6]);

    let stats = session.stop().await.unwrap();
    assert_eq!(stats.utterances_sent, 1);
    assert_eq!(stats.responses_completed, 1);
    assert_eq!(stats.transcript_segments_count, 1);
    assert_eq!(stats.state, TurnState::Idle);

    let transcript = session.transcript().await;
    assert_eq!(transcript[0].text, "what is rust");
    assert!(!transcript[0].partial);

    // Graceful close tells the service to stop
    let sent = peer.drain_sent();
    assert_eq!(sent.last(), Some(&WireFrame::Text(r#"{"type":"stop"}"#.to_string())));
}

#[tokio::test]
async fn test_batched_utterance_sent_whole() {
    let dir = TempDir::new().unwrap();
    let (connector, mut peers) = MemoryConnector::new(Some(ENVELOPE_ACK));

    let session = ConversationSession::start(
        session_config(AudioMode::Batched),
        backend_for(&dir, &speech_then_silence(3 * FRAME, 50 * FRAME)),
        Box::new(RecordingSink::default()),
        Arc::new(connector),
    )
    .await
    .unwrap();

    let mut peer = next_peer(&mut peers).await;
    assert_eq!(peer.next_json().await["type"], "setup");

    let audio = peer.next_json().await;
    assert_eq!(audio["type"], "audio");
    let pcm = base64::engine::general_purpose::STANDARD
        .decode(audio["data"].as_str().unwrap())
        .unwrap();
    // Three speech frames; trailing silence is trimmed
    assert_eq!(pcm.len(), 3 * FRAME * 2);

    assert_eq!(peer.next_json().await["type"], "audio_end");

    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_remote_error_then_resume() {
    let dir = TempDir::new().unwrap();
    let (connector, mut peers) = MemoryConnector::new(Some(ENVELOPE_ACK));

    let mut session = ConversationSession::start(
        session_config(AudioMode::Streaming),
        backend_for(&dir, &vec![0; 20 * FRAME]),
        Box::new(RecordingSink::default()),
        Arc::new(connector),
    )
    .await
    .unwrap();
    let mut events = session.events().unwrap();
    let peer = next_peer(&mut peers).await;

    peer.push_text(r#"{"type":"error","data":"quota exceeded"}"#);

    let error = wait_for(&mut events, |e| matches!(e, ConversationEvent::Error(_))).await;
    match error {
        ConversationEvent::Error(e) => {
            assert_eq!(e, VoiceError::Remote("quota exceeded".to_string()));
            assert!(!e.is_fatal());
        }
        _ => unreachable!(),
    }

    // The connection stays open
    assert!(session.is_running());

    session.resume().await.unwrap();
    wait_for(&mut events, |e| {
        matches!(e, ConversationEvent::StateChanged { from: TurnState::Idle, to: TurnState::Listening })
    })
    .await;

    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_twice() {
    let dir = TempDir::new().unwrap();
    let (connector, _peers) = MemoryConnector::new(Some(ENVELOPE_ACK));

    let session = ConversationSession::start(
        session_config(AudioMode::Streaming),
        backend_for(&dir, &vec![0; 4 * FRAME]),
        Box::new(RecordingSink::default()),
        Arc::new(connector),
    )
    .await
    .unwrap();

    let first = session.stop().await.unwrap();
    let second = session.stop().await.unwrap();

    assert_eq!(first.state, TurnState::Idle);
    assert_eq!(second.state, TurnState::Idle);
    assert!(!session.is_running());
}

#[tokio::test]
async fn test_missing_capture_device_is_reported() {
    let (connector, mut peers) = MemoryConnector::new(Some(ENVELOPE_ACK));
    let backend = Box::new(FileBackend::new(
        "/nonexistent/input.wav",
        AudioBackendConfig::default(),
        false,
    ));

    let result = ConversationSession::start(
        session_config(AudioMode::Streaming),
        backend,
        Box::new(RecordingSink::default()),
        Arc::new(connector),
    )
    .await;

    match result {
        Err(e @ VoiceError::DeviceUnavailable(_)) => assert!(e.is_fatal()),
        Err(other) => panic!("expected DeviceUnavailable, got {}", other),
        Ok(_) => panic!("session started without a capture device"),
    }

    // The connection opened for the session was closed again
    let mut peer = next_peer(&mut peers).await;
    assert_eq!(peer.next_json().await["type"], "setup");
    assert_eq!(peer.next_json().await["type"], "stop");
}

/// Capture device that delivers a little silence, then fails
struct FailingDevice {
    failed: bool,
}

#[async_trait::async_trait]
impl AudioBackend for FailingDevice {
    async fn start(&mut self) -> duplex_voice::Result<mpsc::Receiver<AudioFrame>> {
        let (tx, rx) = mpsc::channel(4);
        tx.send(AudioFrame::new(vec![0; FRAME], 16000, 0)).await.unwrap();
        self.failed = true;
        // Sender dropped here: the stream ends after one frame
        Ok(rx)
    }

    async fn stop(&mut self) -> duplex_voice::Result<()> {
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        false
    }

    fn failure(&self) -> Option<VoiceError> {
        self.failed
            .then(|| VoiceError::DeviceUnavailable("input device unplugged".to_string()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

#[tokio::test]
async fn test_capture_failure_mid_session_is_fatal() {
    let (connector, _peers) = MemoryConnector::new(Some(ENVELOPE_ACK));

    let mut session = ConversationSession::start(
        session_config(AudioMode::Streaming),
        Box::new(FailingDevice { failed: false }),
        Box::new(RecordingSink::default()),
        Arc::new(connector),
    )
    .await
    .unwrap();
    let mut events = session.events().unwrap();

    let error = wait_for(&mut events, |e| matches!(e, ConversationEvent::Error(_))).await;
    match error {
        ConversationEvent::Error(e) => {
            assert!(matches!(e, VoiceError::DeviceUnavailable(_)));
            assert!(e.is_fatal());
        }
        _ => unreachable!(),
    }

    let stats = session.stop().await.unwrap();
    assert_eq!(stats.state, TurnState::Idle);
}

#[tokio::test]
async fn test_answer_text_follows_filler_turn() {
    let dir = TempDir::new().unwrap();
    let (connector, mut peers) = MemoryConnector::new(Some(ENVELOPE_ACK));

    let mut session = ConversationSession::start(
        session_config(AudioMode::Batched),
        backend_for(&dir, &speech_then_silence(3 * FRAME, 50 * FRAME)),
        Box::new(RecordingSink::default()),
        Arc::new(connector),
    )
    .await
    .unwrap();
    let mut events = session.events().unwrap();
    let peer = next_peer(&mut peers).await;

    wait_for(&mut events, |e| {
        matches!(e, ConversationEvent::StateChanged { to: TurnState::AwaitingResponse, .. })
    })
    .await;

    for text in ["Let me check that for you...", "Rust is a systems language."] {
        peer.push_text(r#"{"type":"status","data":"generating"}"#);
        peer.push_text(&format!(r#"{{"type":"text","data":"{}"}}"#, text));
        peer.push_text(r#"{"type":"status","data":"speaking"}"#);
        peer.push_text(r#"{"type":"audio","data":"AQI="}"#);
        peer.push_text(r#"{"type":"status","data":"complete"}"#);
    }

    let mut completed = Vec::new();
    while completed.len() < 2 {
        if let ConversationEvent::ResponseComplete { text, .. } =
            wait_for(&mut events, |e| matches!(e, ConversationEvent::ResponseComplete { .. })).await
        {
            completed.push(text);
        }
    }
    assert_eq!(completed, vec!["Let me check that for you...", "Rust is a systems language."]);

    session.stop().await.unwrap();
}
