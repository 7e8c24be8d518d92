//! Transport Layer
//!
//! One byte pipe to one gateway endpoint. Transports know nothing about
//! frames or messages: inbound bytes are reported as arbitrary chunks on
//! an event channel handed out by [`Transport::connect`].

use crate::{Result, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;

pub mod gateway;

pub use gateway::{GatewayTransport, GatewayTransportConfig};

/// Something that happened on the byte stream
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A chunk of received bytes, with no message-boundary guarantee
    Data(Bytes),
    /// A read-side fault; a `Closed` event follows
    Error(TransportError),
    /// The session ended, locally or by the peer. Sent exactly once.
    Closed,
}

/// Receiving half of a connected transport's event stream
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Byte-pipe abstraction used by the connection facade
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the pipe; resolves once the handshake completes
    async fn connect(&self) -> Result<TransportEvents>;

    /// Write bytes as-is
    async fn send(&self, data: Bytes) -> Result<()>;

    /// Close the pipe; calling it again is a no-op
    async fn disconnect(&self) -> Result<()>;

    /// Live socket state
    fn is_connected(&self) -> bool;

    /// Get transport-specific information
    fn transport_info(&self) -> TransportInfo;
}

/// Transport information for monitoring
#[derive(Debug, Clone, Serialize)]
pub struct TransportInfo {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub connected: bool,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}
