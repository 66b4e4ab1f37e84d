//! Duplex transport to the remote inference service
//!
//! A [`DuplexTransport`] owns one persistent message-oriented connection.
//! Wire formats are pluggable ([`WireFormat`]) and so is the connection
//! itself ([`Connector`]), which lets tests run the full handshake and
//! reconnect logic against an in-memory peer.

pub mod client;
pub mod connection;
pub mod messages;
pub mod wire;

pub use client::{ConnectionState, DuplexTransport, Session, SessionParams, TransportConfig, TransportEvent};
pub use connection::{Connection, Connector, FrameSink, FrameStream, WebSocketConnector, WireFrame};
pub use messages::{InboundEvent, OutboundMessage, RemoteStatus};
pub use wire::{EnvelopeWire, LiveWire, WireFormat, WireKind};
