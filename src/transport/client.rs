use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use super::connection::{redact, Connection, Connector, WireFrame};
use super::messages::{InboundEvent, OutboundMessage};
use super::wire::WireFormat;
use crate::error::{Result, VoiceError};

/// Connection and retry settings
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub endpoint: Url,
    /// How long `connect()` waits for the setup acknowledgement
    pub handshake_timeout: Duration,
    pub max_reconnect_attempts: u32,
    /// Attempt `n` waits `n × reconnect_backoff`
    pub reconnect_backoff: Duration,
    /// Outbound queue depth before `send()` applies backpressure
    pub outbound_capacity: usize,
}

impl TransportConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            handshake_timeout: Duration::from_secs(5),
            max_reconnect_attempts: 3,
            reconnect_backoff: Duration::from_secs(1),
            outbound_capacity: 64,
        }
    }
}

/// Audio parameters and remote behaviour negotiated by the setup message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    pub voice: String,
    pub model: String,
    pub system_instruction: Option<String>,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            bit_depth: 16,
            voice: "Puck".to_string(),
            model: "models/gemini-2.0-flash-exp".to_string(),
            system_instruction: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnect attempts exhausted
    Failed,
}

/// One duplex connection's lifetime
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: Uuid,
    pub endpoint: Url,
    pub params: SessionParams,
    pub connected_at: DateTime<Utc>,
    pub state: ConnectionState,
    /// Consecutive reconnect attempts since the last successful handshake
    pub reconnect_attempts: u32,
}

/// Everything the transport reports, in order, on a single channel
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Inbound(InboundEvent),
    Disconnected { reason: String },
    Reconnecting { attempt: u32, delay: Duration },
    Reconnected(Session),
    Fatal(VoiceError),
}

struct ActiveConnection {
    session: watch::Receiver<Session>,
    outbound: mpsc::Sender<OutboundMessage>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Persistent duplex connection to the inference service.
///
/// The setup message always precedes audio: `connect()` sends it and waits
/// for the acknowledgement before the send loop exists. Unexpected closes
/// are retried with linear backoff; see [`TransportConfig`].
pub struct DuplexTransport {
    connector: Arc<dyn Connector>,
    wire: Arc<dyn WireFormat>,
    config: TransportConfig,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    active: Option<ActiveConnection>,
}

impl DuplexTransport {
    pub fn new(connector: Arc<dyn Connector>, wire: Arc<dyn WireFormat>, config: TransportConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            connector,
            wire,
            config,
            events_tx,
            events_rx: Some(events_rx),
            active: None,
        }
    }

    /// Take the event receiver. There is exactly one consumer.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.take()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Connect and complete the handshake.
    ///
    /// Returns the current session if a connection is already running.
    pub async fn connect(&mut self, params: SessionParams) -> Result<Session> {
        if let Some(active) = &self.active {
            if !active.task.is_finished() {
                debug!("connect() while connected, returning current session");
                return Ok(active.session.borrow().clone());
            }
        }
        self.active = None;

        let endpoint = self.config.endpoint.clone();
        info!(
            "Connecting to {} ({} wire, {} Hz, voice {})",
            redact(&endpoint),
            self.wire.name(),
            params.sample_rate,
            params.voice
        );

        let connection = establish(
            self.connector.as_ref(),
            self.wire.as_ref(),
            &self.config,
            &params,
            &self.events_tx,
        )
        .await?;

        let session = Session {
            id: Uuid::new_v4(),
            endpoint,
            params: params.clone(),
            connected_at: Utc::now(),
            state: ConnectionState::Connected,
            reconnect_attempts: 0,
        };
        info!("Session {} established", session.id);

        let (session_tx, session_rx) = watch::channel(session.clone());
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let io = IoLoop {
            connector: Arc::clone(&self.connector),
            wire: Arc::clone(&self.wire),
            config: self.config.clone(),
            params,
            events: self.events_tx.clone(),
            session: session_tx,
            outbound: outbound_rx,
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(io.run(connection));

        self.active = Some(ActiveConnection {
            session: session_rx,
            outbound: outbound_tx,
            shutdown: shutdown_tx,
            task,
        });

        Ok(session)
    }

    /// Queue a message for delivery.
    ///
    /// Waits while the outbound queue is full. Fails with `NotConnected`
    /// unless the connection is up.
    pub async fn send(&self, message: OutboundMessage) -> Result<()> {
        let active = self.active.as_ref().ok_or(VoiceError::NotConnected)?;
        if active.session.borrow().state != ConnectionState::Connected {
            return Err(VoiceError::NotConnected);
        }

        active
            .outbound
            .send(message)
            .await
            .map_err(|_| VoiceError::NotConnected)
    }

    /// Close the connection and cancel pending sends and reconnect timers.
    ///
    /// Safe to call any number of times.
    pub async fn disconnect(&mut self) -> Result<()> {
        let Some(active) = self.active.take() else {
            debug!("disconnect() without an active connection");
            return Ok(());
        };

        info!("Disconnecting session {}", active.session.borrow().id);
        let _ = active.shutdown.send(true);
        drop(active.outbound);

        let mut task = active.task;
        if tokio::time::timeout(Duration::from_secs(1), &mut task).await.is_err() {
            warn!("Transport task did not stop in time, aborting");
            task.abort();
        }

        Ok(())
    }

    pub fn session(&self) -> Option<Session> {
        self.active.as_ref().map(|a| a.session.borrow().clone())
    }

    pub fn state(&self) -> ConnectionState {
        self.active
            .as_ref()
            .map(|a| a.session.borrow().state)
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

impl Drop for DuplexTransport {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.shutdown.send(true);
            active.task.abort();
        }
    }
}

/// Open a connection, send setup and wait for the acknowledgement
async fn establish(
    connector: &dyn Connector,
    wire: &dyn WireFormat,
    config: &TransportConfig,
    params: &SessionParams,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> Result<Connection> {
    let mut connection = connector.connect(&config.endpoint).await?;

    connection.sink.send(wire.encode_setup(params)?).await?;
    debug!("Setup sent, waiting for acknowledgement");

    let outcome = tokio::time::timeout(
        config.handshake_timeout,
        await_ack(&mut connection, wire, events),
    )
    .await;

    match outcome {
        Ok(Ok(())) => {
            info!("Handshake acknowledged");
            Ok(connection)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => {
            let _ = connection.sink.close().await;
            Err(VoiceError::HandshakeTimeout(config.handshake_timeout))
        }
    }
}

async fn await_ack(
    connection: &mut Connection,
    wire: &dyn WireFormat,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> Result<()> {
    loop {
        let frame = match connection.stream.next().await {
            Some(frame) => frame?,
            None => return Err(VoiceError::Connection("closed during handshake".to_string())),
        };

        if let WireFrame::Ping(data) = frame {
            connection.sink.send(WireFrame::Pong(data)).await?;
            continue;
        }

        let decoded = match wire.decode(&frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Dropping malformed message during handshake: {}", e);
                continue;
            }
        };

        let mut acknowledged = false;
        for event in decoded {
            if event.is_handshake_ack() {
                acknowledged = true;
            } else {
                let _ = events.send(TransportEvent::Inbound(event));
            }
        }
        if acknowledged {
            return Ok(());
        }
    }
}

/// Resolves once shutdown is requested or the transport is dropped
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

enum LoopExit {
    Shutdown,
    Lost(String),
}

struct IoLoop {
    connector: Arc<dyn Connector>,
    wire: Arc<dyn WireFormat>,
    config: TransportConfig,
    params: SessionParams,
    events: mpsc::UnboundedSender<TransportEvent>,
    session: watch::Sender<Session>,
    outbound: mpsc::Receiver<OutboundMessage>,
    shutdown: watch::Receiver<bool>,
}

impl IoLoop {
    async fn run(mut self, mut connection: Connection) {
        loop {
            match self.pump(&mut connection).await {
                LoopExit::Shutdown => {
                    self.close_gracefully(&mut connection).await;
                    self.session.send_modify(|s| s.state = ConnectionState::Disconnected);
                    info!("Transport closed");
                    return;
                }
                LoopExit::Lost(reason) => {
                    warn!("Connection lost: {}", reason);
                    self.session.send_modify(|s| s.state = ConnectionState::Reconnecting);
                    let _ = self.events.send(TransportEvent::Disconnected { reason });
                    self.discard_queued();

                    match self.reconnect().await {
                        Some(next) => connection = next,
                        None => return,
                    }
                }
            }
        }
    }

    async fn pump(&mut self, connection: &mut Connection) -> LoopExit {
        let wire = Arc::clone(&self.wire);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_requested(&mut self.shutdown) => return LoopExit::Shutdown,

                message = self.outbound.recv() => {
                    let Some(message) = message else {
                        return LoopExit::Shutdown;
                    };

                    let frames = match wire.encode(&message, &self.params) {
                        Ok(frames) => frames,
                        Err(e) => {
                            error!("Failed to encode {:?}: {}", message, e);
                            continue;
                        }
                    };

                    for frame in frames {
                        if let Err(e) = connection.sink.send(frame).await {
                            return LoopExit::Lost(e.to_string());
                        }
                    }
                }

                frame = connection.stream.next() => match frame {
                    None => return LoopExit::Lost("closed by peer".to_string()),
                    Some(Err(e)) => return LoopExit::Lost(e.to_string()),
                    Some(Ok(WireFrame::Ping(data))) => {
                        if let Err(e) = connection.sink.send(WireFrame::Pong(data)).await {
                            return LoopExit::Lost(e.to_string());
                        }
                    }
                    Some(Ok(WireFrame::Pong(_))) => {}
                    Some(Ok(frame)) => match wire.decode(&frame) {
                        Ok(decoded) => {
                            for event in decoded {
                                if event.is_handshake_ack() {
                                    debug!("Ignoring repeated handshake acknowledgement");
                                    continue;
                                }
                                let _ = self.events.send(TransportEvent::Inbound(event));
                            }
                        }
                        Err(e) => warn!("Dropping malformed inbound message: {}", e),
                    },
                },
            }
        }
    }

    /// Drop messages queued for the lost connection
    fn discard_queued(&mut self) {
        let mut dropped = 0usize;
        while self.outbound.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            info!("Discarded {} queued outbound messages", dropped);
        }
    }

    async fn reconnect(&mut self) -> Option<Connection> {
        let max = self.config.max_reconnect_attempts;

        for attempt in 1..=max {
            let delay = self.config.reconnect_backoff * attempt;
            self.session.send_modify(|s| {
                s.state = ConnectionState::Reconnecting;
                s.reconnect_attempts = attempt;
            });
            info!("Reconnect attempt {}/{} in {:?}", attempt, max, delay);
            let _ = self.events.send(TransportEvent::Reconnecting { attempt, delay });

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_requested(&mut self.shutdown) => {
                    info!("Reconnect cancelled");
                    self.session.send_modify(|s| s.state = ConnectionState::Disconnected);
                    return None;
                }
            }

            let established = tokio::select! {
                result = establish(
                    self.connector.as_ref(),
                    self.wire.as_ref(),
                    &self.config,
                    &self.params,
                    &self.events,
                ) => result,
                _ = shutdown_requested(&mut self.shutdown) => {
                    info!("Reconnect cancelled");
                    self.session.send_modify(|s| s.state = ConnectionState::Disconnected);
                    return None;
                }
            };

            match established {
                Ok(connection) => {
                    self.session.send_modify(|s| {
                        s.state = ConnectionState::Connected;
                        s.reconnect_attempts = 0;
                        s.connected_at = Utc::now();
                    });
                    let session = self.session.borrow().clone();
                    info!("Reconnected session {} on attempt {}", session.id, attempt);
                    let _ = self.events.send(TransportEvent::Reconnected(session));
                    return Some(connection);
                }
                Err(e) => warn!("Reconnect attempt {}/{} failed: {}", attempt, max, e),
            }
        }

        error!("Connection lost after {} reconnect attempts", max);
        self.session.send_modify(|s| s.state = ConnectionState::Failed);
        let _ = self.events.send(TransportEvent::Fatal(VoiceError::ConnectionLost { attempts: max }));
        None
    }

    async fn close_gracefully(&mut self, connection: &mut Connection) {
        match self.wire.encode(&OutboundMessage::Stop, &self.params) {
            Ok(frames) => {
                for frame in frames {
                    if let Err(e) = connection.sink.send(frame).await {
                        debug!("Stop message not delivered: {}", e);
                        break;
                    }
                }
            }
            Err(e) => debug!("Failed to encode stop message: {}", e),
        }

        if let Err(e) = connection.sink.close().await {
            debug!("Close failed: {}", e);
        }
    }
}
