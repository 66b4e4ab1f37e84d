use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use duplex_voice::playback::{NullSink, PlaybackSink};
use duplex_voice::{
    AudioBackendFactory, AudioMode, AudioSource, Config, ConversationEvent, ConversationSession,
    WebSocketConnector, WireKind,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Real-time voice conversation with a remote inference service
#[derive(Debug, Parser)]
#[command(name = "duplex-voice", version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<String>,

    /// Service endpoint (ws:// or wss://)
    #[arg(long)]
    endpoint: Option<String>,

    /// streaming | batched
    #[arg(long)]
    mode: Option<AudioMode>,

    /// envelope | live
    #[arg(long)]
    wire: Option<WireKind>,

    /// Replay a WAV file instead of capturing from the microphone
    #[arg(long)]
    input: Option<PathBuf>,

    /// Material the conversation is about
    #[arg(long)]
    material_id: Option<String>,

    /// Do not play responses
    #[arg(long)]
    mute: bool,
}

fn playback_sink(mute: bool) -> Box<dyn PlaybackSink> {
    if mute {
        return Box::new(NullSink);
    }

    #[cfg(feature = "audio-io")]
    {
        Box::new(duplex_voice::playback::RodioSink::new())
    }

    #[cfg(not(feature = "audio-io"))]
    {
        warn!("Built without audio-io, responses will not be played");
        Box::new(NullSink)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "duplex_voice=info,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut cfg = Config::load(args.config.as_deref())?;
    if let Some(endpoint) = args.endpoint {
        cfg.transport.endpoint = endpoint;
    }
    if let Some(mode) = args.mode {
        cfg.transport.mode = mode;
    }
    if let Some(wire) = args.wire {
        cfg.transport.wire = wire;
    }
    if let Some(material_id) = args.material_id {
        cfg.transport.material_id = Some(material_id);
    }
    cfg.validate()?;

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    let source = match args.input {
        Some(path) => AudioSource::File { path, realtime: true },
        None => AudioSource::Microphone,
    };
    let backend = AudioBackendFactory::create(source, cfg.backend_config())?;

    let mut session = ConversationSession::start(
        cfg.session_config()?,
        backend,
        playback_sink(args.mute),
        Arc::new(WebSocketConnector::new()),
    )
    .await
    .context("Failed to start conversation")?;

    let mut events = session
        .events()
        .context("Conversation events already taken")?;

    info!("Listening. Press Ctrl-C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received");
                break;
            }
            event = events.recv() => match event {
                Some(ConversationEvent::Transcript { text, is_final: true }) => info!("You: {}", text),
                Some(ConversationEvent::ResponseComplete { turn_id, text, audio_bytes }) => {
                    info!("Response {} ({} bytes): {}", turn_id, audio_bytes, text);
                }
                Some(ConversationEvent::Interrupted { turn_id }) => info!("Interrupted response {:?}", turn_id),
                Some(ConversationEvent::Error(e)) if e.is_fatal() => {
                    error!("Conversation failed: {}", e);
                    break;
                }
                Some(ConversationEvent::Error(e)) => warn!("{}", e),
                Some(_) => {}
                None => break,
            },
        }
    }

    let stats = session.stop().await?;
    info!(
        "Session finished after {:.1}s: {} utterances, {} responses, {} interruptions, {} reconnects",
        stats.duration_secs,
        stats.utterances_sent,
        stats.responses_completed,
        stats.interruptions,
        stats.reconnects
    );

    Ok(())
}
