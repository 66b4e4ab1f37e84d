// Replay Example: send a recorded WAV file through a conversation
//
// Useful for exercising a voice service without a microphone. The file is
// replayed at capture speed, each detected utterance is sent as one batch,
// and responses are logged instead of played.
//
// Usage: cargo run --example replay_wav -- recording.wav [ws://localhost:8000/ws]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use duplex_voice::audio::AudioFile;
use duplex_voice::playback::NullSink;
use duplex_voice::{
    AudioBackendFactory, AudioMode, AudioSource, Config, ConversationEvent, ConversationSession, TurnState,
    WebSocketConnector,
};
use tokio::time::timeout;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let path = PathBuf::from(args.next().context("usage: replay_wav <file.wav> [endpoint]")?);

    let mut cfg = Config::load(None)?;
    if let Some(endpoint) = args.next() {
        cfg.transport.endpoint = endpoint;
    }
    cfg.transport.mode = AudioMode::Batched;
    cfg.validate()?;

    let audio = AudioFile::open(&path)?;
    info!(
        "Replaying {:.1}s of audio from {} to {}",
        audio.duration_seconds, audio.path, cfg.transport.endpoint
    );

    let backend = AudioBackendFactory::create(
        AudioSource::File {
            path,
            realtime: true,
        },
        cfg.backend_config(),
    )?;

    let mut session = ConversationSession::start(
        cfg.session_config()?,
        backend,
        Box::new(NullSink),
        Arc::new(WebSocketConnector::new()),
    )
    .await?;
    let mut events = session.events().context("events already taken")?;

    // Run for the length of the file plus time for the last response
    let budget = Duration::from_secs_f64(audio.duration_seconds) + Duration::from_secs(15);
    let run = async {
        while let Some(event) = events.recv().await {
            match event {
                ConversationEvent::Transcript { text, is_final: true } => info!("Heard: {}", text),
                ConversationEvent::ResponseComplete { text, audio_bytes, .. } => {
                    info!("Response ({} bytes of audio): {}", audio_bytes, text);
                }
                ConversationEvent::StateChanged { to: TurnState::AwaitingResponse, .. } => {
                    info!("Utterance sent");
                }
                ConversationEvent::Error(e) => warn!("{}", e),
                _ => {}
            }
        }
    };

    if timeout(budget, run).await.is_err() {
        info!("Replay finished");
    }

    let stats = session.stop().await?;
    info!(
        "{} utterances sent, {} responses received",
        stats.utterances_sent, stats.responses_completed
    );

    Ok(())
}
