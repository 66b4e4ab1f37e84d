// Message-oriented duplex connections

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

use crate::error::{Result, VoiceError};

/// One message on the wire
#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
}

/// Outgoing half of a connection
#[async_trait::async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: WireFrame) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Incoming half of a connection
#[async_trait::async_trait]
pub trait FrameStream: Send {
    /// Next frame, or `None` once the peer closed the connection
    async fn next(&mut self) -> Option<Result<WireFrame>>;
}

/// An open connection, split so sending and receiving can run concurrently
pub struct Connection {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

/// Opens connections to the remote service
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Url) -> Result<Connection>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connector (ws:// and wss://)
#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &Url) -> Result<Connection> {
        info!("Opening WebSocket to {}", redact(endpoint));

        let (ws_stream, _response) = tokio_tungstenite::connect_async(endpoint.as_str())
            .await
            .map_err(|e| VoiceError::Connection(e.to_string()))?;

        let (sink, stream) = ws_stream.split();

        Ok(Connection {
            sink: Box::new(WebSocketSink { sink }),
            stream: Box::new(WebSocketFrames { stream }),
        })
    }
}

struct WebSocketSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait::async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, frame: WireFrame) -> Result<()> {
        let message = match frame {
            WireFrame::Text(text) => Message::text(text),
            WireFrame::Binary(data) => Message::binary(data),
            WireFrame::Ping(data) => Message::Ping(data.into()),
            WireFrame::Pong(data) => Message::Pong(data.into()),
        };

        self.sink
            .send(message)
            .await
            .map_err(|e| VoiceError::Connection(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.sink
            .close()
            .await
            .map_err(|e| VoiceError::Connection(e.to_string()))
    }
}

struct WebSocketFrames {
    stream: SplitStream<WsStream>,
}

#[async_trait::async_trait]
impl FrameStream for WebSocketFrames {
    async fn next(&mut self) -> Option<Result<WireFrame>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(VoiceError::Connection(e.to_string()))),
            };

            return Some(Ok(match message {
                Message::Text(text) => WireFrame::Text(text.as_str().to_owned()),
                Message::Binary(data) => WireFrame::Binary(data.to_vec()),
                Message::Ping(data) => WireFrame::Ping(data.to_vec()),
                Message::Pong(data) => WireFrame::Pong(data.to_vec()),
                Message::Close(frame) => {
                    debug!("Close frame received: {:?}", frame);
                    return None;
                }
                Message::Frame(_) => continue,
            }));
        }
    }
}

/// Endpoint with credentials stripped, for logging
pub(crate) fn redact(endpoint: &Url) -> String {
    let mut shown = endpoint.clone();
    let pairs: Vec<(String, String)> = endpoint
        .query_pairs()
        .map(|(k, v)| {
            let value = if k == "key" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), value)
        })
        .collect();

    if pairs.is_empty() {
        return shown.to_string();
    }

    shown.query_pairs_mut().clear().extend_pairs(pairs);
    shown.to_string()
}
