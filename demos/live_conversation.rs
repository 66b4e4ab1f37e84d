// Live Conversation Example: talk to a voice service from the microphone
//
// This example runs the whole duplex pipeline:
// 1. The default input device is captured in 4096-sample mono frames
// 2. Energy-based VAD cuts the stream into utterances
// 3. Utterances are streamed to the service over a WebSocket
// 4. Response audio is reassembled and played on the default output device
// 5. Speaking over a response interrupts it
//
// Prerequisites:
// - A voice service speaking the typed JSON envelope protocol, e.g. at
//   ws://localhost:8000/ws
// - Microphone permission for the terminal
//
// Usage: cargo run --example live_conversation -- ws://localhost:8000/ws

use std::sync::Arc;

use anyhow::{Context, Result};
use duplex_voice::playback::RodioSink;
use duplex_voice::{
    AudioBackendFactory, AudioSource, Config, ConversationEvent, ConversationSession, WebSocketConnector,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let mut cfg = Config::load(None)?;
    if let Some(endpoint) = std::env::args().nth(1) {
        cfg.transport.endpoint = endpoint;
    }
    cfg.transport.send_interrupt = true;
    cfg.validate()?;

    info!("Connecting to {}", cfg.transport.endpoint);

    let backend = AudioBackendFactory::create(AudioSource::Microphone, cfg.backend_config())?;
    let mut session = ConversationSession::start(
        cfg.session_config()?,
        backend,
        Box::new(RodioSink::new()),
        Arc::new(WebSocketConnector::new()),
    )
    .await
    .context("Failed to start conversation")?;

    let mut events = session.events().context("events already taken")?;

    info!("Say something. Press Ctrl-C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(ConversationEvent::StateChanged { from, to }) => info!("{:?} -> {:?}", from, to),
                Some(ConversationEvent::Transcript { text, is_final }) => {
                    info!("You{}: {}", if is_final { "" } else { " (partial)" }, text);
                }
                Some(ConversationEvent::ResponseText(text)) => info!("Assistant: {}", text),
                Some(ConversationEvent::ResponseComplete { audio_bytes, .. }) => {
                    info!("Playing {} bytes of response audio", audio_bytes);
                }
                Some(ConversationEvent::Interrupted { .. }) => info!("Response interrupted"),
                Some(ConversationEvent::Error(e)) => {
                    info!("Error: {}", e);
                    if e.is_fatal() {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    let stats = session.stop().await?;
    info!("Session stats: {}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}
