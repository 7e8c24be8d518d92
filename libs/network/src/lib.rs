//! Broker Network Layer
//!
//! Everything between the codec and the caller: the gateway byte pipe,
//! the pending-command table, the event bus and the connection facade
//! that drives them.

pub mod connection;
pub mod correlator;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod transports;

// Re-export commonly used types
pub use connection::{BrokerConnection, ConnectionOptions, ConnectionState};
pub use correlator::{CommandCorrelator, CommandReply, PendingCommand, PendingReply};
pub use dispatch::{Inbound, UnroutableReason};
pub use error::{BrokerError, BrokerResult, Result, TransportError};
pub use events::{BrokerEvent, EventBus, EventHandler, SubscriptionId};
pub use transports::{
    GatewayTransport, GatewayTransportConfig, Transport, TransportEvent, TransportEvents,
    TransportInfo,
};
